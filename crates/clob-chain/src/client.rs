//! The chain client seam the pipeline submits through.

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use crate::error::ChainResult;
use crate::types::{FeeData, SettlementCall, TxReceipt};

/// Blockchain RPC operations used by the settlement pipeline.
///
/// All methods are point-in-time queries or single submissions; retry and
/// backoff policy lives in the pipeline, not here.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current network fee level.
    async fn fee_data(&self) -> ChainResult<FeeData>;

    /// Estimate gas units for a settlement call, unpadded.
    async fn estimate_gas(&self, call: &SettlementCall) -> ChainResult<u64>;

    /// Sign and submit a settlement call. Returns the transaction hash.
    async fn send_transaction(
        &self,
        call: &SettlementCall,
        gas_limit: u64,
        gas_price: u128,
    ) -> ChainResult<TxHash>;

    /// Fetch the receipt for a submitted transaction, if mined.
    async fn transaction_receipt(&self, tx_hash: TxHash) -> ChainResult<Option<TxReceipt>>;

    /// Current chain height.
    async fn block_number(&self) -> ChainResult<u64>;

    /// Timestamp (Unix seconds) of the given block, if known.
    async fn block_timestamp(&self, block_number: u64) -> ChainResult<Option<u64>>;

    /// Native-token balance of an address.
    async fn balance(&self, address: Address) -> ChainResult<U256>;
}
