//! Settlement batch types and the batch state machine.

use alloy::primitives::{Address, TxHash};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fill::Fill;

/// Unique identifier of a settlement batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Generate a fresh batch id: `batch-{epoch_ms}-{9-char suffix}`.
    #[must_use]
    pub fn generate(now_ms: u64) -> Self {
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
        Self(format!("batch-{now_ms}-{suffix}"))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BatchId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Batch lifecycle status.
///
/// ```text
/// pending -> submitting -> submitted -> confirmed
///                |  ^            \
///                v  |             `-> failed
///             retrying -> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Created, not yet handed to the submitter.
    Pending,
    /// Submission attempt in progress.
    Submitting,
    /// On the wire, awaiting confirmation depth.
    Submitted,
    /// Confirmed at the required depth; terminal success.
    Confirmed,
    /// Terminal failure; fills handed to recovery.
    Failed,
    /// Waiting out a backoff delay before the next attempt.
    Retrying,
}

impl BatchStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// A group of fills submitted together in one settlement transaction.
///
/// Scoped to one chain and one settlement contract. Owned by the pipeline
/// for its lifetime: created by the batch builder, mutated by the submitter
/// and the confirmation tracker, dropped from the in-memory table once
/// terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementBatch {
    /// Batch id.
    pub id: BatchId,
    /// Chain the settlement transaction targets.
    pub chain_id: u64,
    /// Settlement contract address.
    pub market_address: Address,
    /// Fills in queue removal order (oldest first).
    pub fills: Vec<Fill>,
    /// Current lifecycle status.
    pub status: BatchStatus,
    /// Submission attempts so far.
    pub retry_count: u32,
    /// Last error observed, if any.
    pub error: Option<String>,
    /// Settlement transaction hash once submitted.
    pub tx_hash: Option<TxHash>,
    /// Block the transaction landed in.
    pub block_number: Option<u64>,
    /// Gas consumed by the confirmed transaction.
    pub gas_used: Option<u128>,
    /// Creation timestamp, Unix milliseconds.
    pub created_at: u64,
    /// Submission timestamp, Unix milliseconds.
    pub submitted_at: Option<u64>,
    /// Confirmation timestamp, Unix milliseconds.
    pub confirmed_at: Option<u64>,
}

impl SettlementBatch {
    /// Create a new pending batch over the given fills.
    #[must_use]
    pub fn new(chain_id: u64, market_address: Address, fills: Vec<Fill>, now_ms: u64) -> Self {
        Self {
            id: BatchId::generate(now_ms),
            chain_id,
            market_address,
            fills,
            status: BatchStatus::Pending,
            retry_count: 0,
            error: None,
            tx_hash: None,
            block_number: None,
            gas_used: None,
            created_at: now_ms,
            submitted_at: None,
            confirmed_at: None,
        }
    }

    /// Number of fills in the batch.
    #[must_use]
    pub fn fill_count(&self) -> usize {
        self.fills.len()
    }
}
