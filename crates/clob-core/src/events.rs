//! Lifecycle events and running statistics.

use alloy::primitives::TxHash;
use serde::Serialize;

use crate::batch::{BatchId, SettlementBatch};
use crate::fill::{Fill, FillId};

/// Lifecycle event published on the settlement event stream.
///
/// Events are notifications, not the source of truth: every terminal
/// failure is durably persisted before the corresponding event is emitted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettlementEvent {
    /// A batch was carved off the fill queue.
    BatchCreated { batch: SettlementBatch },
    /// The settlement transaction is on the wire.
    BatchSubmitted { batch_id: BatchId, tx_hash: TxHash },
    /// The batch reached the required confirmation depth.
    BatchConfirmed { batch_id: BatchId, block_number: u64 },
    /// The batch terminally failed; its fills went to recovery.
    BatchFailed { batch_id: BatchId, error: String },
    /// A fill settled on-chain.
    FillSettled {
        fill_id: FillId,
        tx_hash: TxHash,
        fill: Fill,
    },
    /// A fill permanently failed (retry ceiling or unrecoverable payload).
    FillFailed { fill_id: FillId, error: String },
}

/// Process-local settlement counters.
///
/// Derived, not authoritative: rebuilt from zero on restart.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SettlementStats {
    /// Fills waiting in the queue.
    pub pending_fills: usize,
    /// Batches created but not yet submitted.
    pub pending_batches: usize,
    /// Batches on the wire awaiting confirmation.
    pub submitted_batches: usize,
    /// Batches confirmed since process start.
    pub confirmed_batches: u64,
    /// Batches terminally failed since process start.
    pub failed_batches: u64,
    /// Fills settled on-chain since process start.
    pub total_fills_settled: u64,
    /// Total gas consumed by confirmed batches.
    pub total_gas_used: u128,
    /// Running average fills per confirmed batch.
    pub average_batch_size: f64,
    /// Running average submission-to-confirmation latency, milliseconds.
    pub average_confirmation_ms: f64,
}

impl SettlementStats {
    /// Fold one confirmed batch into the running averages.
    pub fn record_confirmation(&mut self, fill_count: usize, gas_used: u128, latency_ms: u64) {
        self.confirmed_batches += 1;
        self.total_fills_settled += fill_count as u64;
        self.total_gas_used += gas_used;

        let n = self.confirmed_batches as f64;
        self.average_batch_size =
            (self.average_batch_size * (n - 1.0) + fill_count as f64) / n;
        self.average_confirmation_ms =
            (self.average_confirmation_ms * (n - 1.0) + latency_ms as f64) / n;
    }
}
