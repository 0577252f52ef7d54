//! In-memory store and lock, used by tests and single-process deployments.

use std::collections::HashMap;
use std::time::Duration;

use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use clob_core::{BatchId, FillId};

use crate::error::StoreResult;
use crate::records::{BatchRecord, FailedFillRow, NewFailedFill, TradeEventRecord};
use crate::store::{LockService, LockToken, SettlementStore};

#[derive(Debug, Clone)]
struct FailedFillEntry {
    row: FailedFillRow,
    resolved_at: Option<DateTime<Utc>>,
}

/// Hash-map backed [`SettlementStore`].
#[derive(Default)]
pub struct MemoryStore {
    batches: Mutex<HashMap<BatchId, BatchRecord>>,
    failed_fills: Mutex<HashMap<FillId, FailedFillEntry>>,
    trade_events: Mutex<HashMap<(TxHash, u64), TradeEventRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot of a batch, if any was persisted.
    #[must_use]
    pub fn batch(&self, id: &BatchId) -> Option<BatchRecord> {
        self.batches.lock().get(id).cloned()
    }

    /// Recovery row for a fill, resolved or not.
    #[must_use]
    pub fn failed_fill(&self, fill_id: &FillId) -> Option<FailedFillRow> {
        self.failed_fills
            .lock()
            .get(fill_id)
            .map(|entry| entry.row.clone())
    }

    /// Whether a fill's recovery row has been resolved.
    #[must_use]
    pub fn is_resolved(&self, fill_id: &FillId) -> bool {
        self.failed_fills
            .lock()
            .get(fill_id)
            .is_some_and(|entry| entry.resolved_at.is_some())
    }

    /// Count of unresolved recovery rows.
    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        self.failed_fills
            .lock()
            .values()
            .filter(|entry| entry.resolved_at.is_none())
            .count()
    }

    /// All recorded trade executions.
    #[must_use]
    pub fn trade_events(&self) -> Vec<TradeEventRecord> {
        self.trade_events.lock().values().cloned().collect()
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn upsert_batch(&self, record: &BatchRecord) -> StoreResult<()> {
        self.batches
            .lock()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn upsert_failed_fill(&self, record: &NewFailedFill) -> StoreResult<()> {
        let entry = FailedFillEntry {
            row: FailedFillRow {
                fill_id: record.fill_id.clone(),
                batch_id: record.batch_id.clone(),
                error: Some(record.error.clone()),
                chain_id: record.chain_id,
                market_address: record.market_address,
                payload: record.payload.clone(),
                retry_count: 0,
                next_retry_at: record.next_retry_at,
                created_at: record.created_at,
            },
            resolved_at: None,
        };
        self.failed_fills
            .lock()
            .insert(record.fill_id.clone(), entry);
        Ok(())
    }

    async fn due_failed_fills(
        &self,
        chain_id: u64,
        market_address: Address,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<FailedFillRow>> {
        let mut due: Vec<FailedFillRow> = self
            .failed_fills
            .lock()
            .values()
            .filter(|entry| {
                entry.resolved_at.is_none()
                    && entry.row.chain_id == chain_id
                    && entry.row.market_address == market_address
                    && entry.row.next_retry_at <= now
            })
            .map(|entry| entry.row.clone())
            .collect();
        due.sort_by_key(|row| row.created_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn bump_failed_fill_retry(
        &self,
        fill_id: &FillId,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        if let Some(entry) = self.failed_fills.lock().get_mut(fill_id) {
            entry.row.retry_count = retry_count;
            entry.row.next_retry_at = next_retry_at;
        }
        Ok(())
    }

    async fn resolve_failed_fill(&self, fill_id: &FillId, error: Option<&str>) -> StoreResult<()> {
        if let Some(entry) = self.failed_fills.lock().get_mut(fill_id) {
            if entry.resolved_at.is_none() {
                entry.resolved_at = Some(Utc::now());
                if let Some(error) = error {
                    entry.row.error = Some(error.to_owned());
                }
            }
        }
        Ok(())
    }

    async fn ingest_trade_event(&self, record: &TradeEventRecord) -> StoreResult<()> {
        self.trade_events
            .lock()
            .entry((record.tx_hash, record.log_index))
            .or_insert_with(|| record.clone());
        Ok(())
    }
}

/// Process-local [`LockService`].
///
/// TTL expiry uses tokio's clock so paused-time tests see deterministic
/// expirations.
#[derive(Default)]
pub struct MemoryLockService {
    locks: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLockService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire(&self, key: &str, ttl_ms: u64) -> Option<LockToken> {
        let mut locks = self.locks.lock();
        let now = Instant::now();
        if let Some((_, expires)) = locks.get(key) {
            if *expires > now {
                return None;
            }
        }
        let token = Uuid::new_v4().simple().to_string();
        locks.insert(
            key.to_owned(),
            (token.clone(), now + Duration::from_millis(ttl_ms)),
        );
        Some(LockToken(token))
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn acquire(
        &self,
        key: &str,
        ttl_ms: u64,
        wait_ms: u64,
        retries: u32,
    ) -> StoreResult<Option<LockToken>> {
        for attempt in 0..=retries {
            if let Some(token) = self.try_acquire(key, ttl_ms) {
                return Ok(Some(token));
            }
            if attempt < retries && wait_ms > 0 {
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
        }
        Ok(None)
    }

    async fn release(&self, key: &str, token: &LockToken) -> StoreResult<()> {
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(|(held, _)| held == &token.0) {
            locks.remove(key);
        }
        Ok(())
    }
}
