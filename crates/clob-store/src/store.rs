//! Storage seams the settlement pipeline persists through.

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use clob_core::FillId;

use crate::error::StoreResult;
use crate::records::{BatchRecord, FailedFillRow, NewFailedFill, TradeEventRecord};

/// Durable settlement records.
///
/// Writes are keyed by natural ids (batch id, fill id, receipt position) so
/// every operation is an idempotent upsert; replaying a transition after a
/// crash is harmless.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Persist the current state of a batch, replacing any prior snapshot.
    async fn upsert_batch(&self, record: &BatchRecord) -> StoreResult<()>;

    /// Record a fill for recovery. Re-recording an already-known fill
    /// resets its retry count and clears any prior resolution.
    async fn upsert_failed_fill(&self, record: &NewFailedFill) -> StoreResult<()>;

    /// Unresolved fills for one market whose next retry is due, oldest
    /// first, capped at `limit`.
    async fn due_failed_fills(
        &self,
        chain_id: u64,
        market_address: Address,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<FailedFillRow>>;

    /// Advance a fill's retry counter and schedule its next attempt.
    async fn bump_failed_fill_retry(
        &self,
        fill_id: &FillId,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Mark a fill resolved, optionally recording a final error (retry
    /// budget exhausted or unrecoverable payload). No-op if the fill is
    /// unknown or already resolved.
    async fn resolve_failed_fill(&self, fill_id: &FillId, error: Option<&str>) -> StoreResult<()>;

    /// Record one decoded trade execution. Idempotent on
    /// `(tx_hash, log_index)`.
    async fn ingest_trade_event(&self, record: &TradeEventRecord) -> StoreResult<()>;
}

/// Opaque proof of lock ownership, required to release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub(crate) String);

impl LockToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cross-process mutual exclusion for recovery sweeps.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Try to take the named lock for `ttl_ms`. On contention, waits
    /// `wait_ms` between up to `retries` extra attempts; returns `None`
    /// once every attempt loses.
    async fn acquire(
        &self,
        key: &str,
        ttl_ms: u64,
        wait_ms: u64,
        retries: u32,
    ) -> StoreResult<Option<LockToken>>;

    /// Release a held lock. Releasing with a stale token (TTL expired and
    /// the lock re-acquired elsewhere) is a no-op.
    async fn release(&self, key: &str, token: &LockToken) -> StoreResult<()>;
}
