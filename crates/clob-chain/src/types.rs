//! Wire-facing chain types.

use alloy::primitives::{Address, Bytes, TxHash, B256};

/// Current network fee level.
#[derive(Debug, Clone, Copy)]
pub struct FeeData {
    /// Legacy gas price, wei.
    pub gas_price: u128,
}

/// A prepared call against the settlement contract.
#[derive(Debug, Clone)]
pub struct SettlementCall {
    /// Contract address.
    pub to: Address,
    /// ABI-encoded calldata.
    pub calldata: Bytes,
}

/// One log entry from a transaction receipt.
#[derive(Debug, Clone)]
pub struct ReceiptLog {
    /// Emitting contract.
    pub address: Address,
    /// Log topics (topic0 is the event signature hash).
    pub topics: Vec<B256>,
    /// ABI-encoded log data.
    pub data: Bytes,
    /// Position of the log within its block.
    pub log_index: u64,
}

/// A mined transaction receipt.
///
/// A receipt is only surfaced once the transaction has a block number;
/// pending transactions appear as "no receipt yet" to the caller.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    /// Transaction hash.
    pub tx_hash: TxHash,
    /// Block the transaction landed in.
    pub block_number: u64,
    /// Gas consumed, units.
    pub gas_used: u128,
    /// Logs emitted by the transaction.
    pub logs: Vec<ReceiptLog>,
}
