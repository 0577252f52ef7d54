//! Row shapes exchanged with the durable store.

use alloy::primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};

use clob_core::{BatchId, BatchStatus, FillId, SettlementBatch};

fn ms_to_datetime(ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(Utc::now)
}

/// Durable snapshot of a batch, written at every lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub id: BatchId,
    pub chain_id: u64,
    pub market_address: Address,
    pub fill_count: u32,
    pub status: BatchStatus,
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub gas_used: Option<u128>,
    pub block_number: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl BatchRecord {
    /// Snapshot the current state of an in-memory batch.
    #[must_use]
    pub fn from_batch(batch: &SettlementBatch) -> Self {
        Self {
            id: batch.id.clone(),
            chain_id: batch.chain_id,
            market_address: batch.market_address,
            fill_count: batch.fill_count() as u32,
            status: batch.status,
            tx_hash: batch.tx_hash,
            error: batch.error.clone(),
            retry_count: batch.retry_count,
            gas_used: batch.gas_used,
            block_number: batch.block_number,
            created_at: ms_to_datetime(batch.created_at),
            submitted_at: batch.submitted_at.map(ms_to_datetime),
            confirmed_at: batch.confirmed_at.map(ms_to_datetime),
        }
    }
}

/// A fill entering the recovery table after its batch terminally failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFailedFill {
    pub fill_id: FillId,
    pub batch_id: BatchId,
    pub error: String,
    pub chain_id: u64,
    pub market_address: Address,
    /// Versioned self-contained payload, see `clob_core::FailedFillPayload`.
    pub payload: serde_json::Value,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A recovery-table row as read back for a retry sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFillRow {
    pub fill_id: FillId,
    pub batch_id: BatchId,
    pub error: Option<String>,
    pub chain_id: u64,
    pub market_address: Address,
    pub payload: serde_json::Value,
    pub retry_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A decoded on-chain trade execution keyed by its receipt position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeEventRecord {
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub chain_id: u64,
    pub market_address: Address,
    pub maker: Address,
    pub taker: Address,
    pub outcome_index: u32,
    pub is_buy: bool,
    pub price: U256,
    pub amount: U256,
    pub fee: U256,
    pub salt: U256,
    pub block_number: u64,
    pub block_timestamp: Option<DateTime<Utc>>,
}
