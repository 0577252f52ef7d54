//! Blockchain connectivity for the settlement relayer.
//!
//! Provides the [`ChainClient`] seam the pipeline submits through, the
//! `batchFill` calldata codec for the settlement contract, and
//! [`EthereumClient`]: a JSON-RPC implementation that signs legacy
//! transactions locally with the operator key.

pub mod client;
pub mod contract;
pub mod error;
pub mod rpc;
pub mod types;

pub use client::ChainClient;
pub use contract::{decode_trade_events, encode_batch_fill, TradeEvent};
pub use error::{ChainError, ChainResult};
pub use rpc::EthereumClient;
pub use types::{FeeData, ReceiptLog, SettlementCall, TxReceipt};

#[cfg(feature = "mocks")]
pub use client::MockChainClient;
