//! The batch settlement pipeline.
//!
//! Fills enter through [`BatchSettler::add_fill`], are carved into batches
//! by size/age policy, submitted on-chain with gas-price gating, tracked to
//! confirmation depth, and recovered through a durable retry queue when a
//! batch terminally fails. Three timer-driven tasks (batch formation,
//! confirmation polling, failed-fill recovery) run independently, each with
//! an in-flight guard against re-entrant overlap with itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use clob_chain::ChainClient;
use clob_core::{
    BatchId, BatchStatus, FailedFillPayload, Fill, SettlementBatch, SettlementEvent,
    SettlementStats,
};
use clob_store::{LockService, NewFailedFill, SettlementStore};

use crate::config::SettlementConfig;
use crate::error::{SettlementError, SettlementResult};
use crate::queue::FillQueue;

/// Batch-formation tick.
pub(crate) const BATCH_TICK_MS: u64 = 1_000;
/// Confirmation-polling tick.
pub(crate) const CONFIRM_TICK_MS: u64 = 3_000;
/// Recovery lock TTL.
pub(crate) const RECOVERY_LOCK_TTL_MS: u64 = 15_000;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Current wall-clock time, Unix milliseconds.
pub(crate) fn now_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

pub(crate) fn datetime_from_ms(ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(Utc::now)
}

pub(crate) struct SettlerInner<C, S, L> {
    pub(crate) config: SettlementConfig,
    pub(crate) operator: Address,
    pub(crate) chain: Arc<C>,
    pub(crate) store: Arc<S>,
    pub(crate) locks: Arc<L>,
    pub(crate) queue: FillQueue,
    /// Live (non-terminal) batches by id.
    pub(crate) batches: DashMap<BatchId, SettlementBatch>,
    pub(crate) stats: Mutex<SettlementStats>,
    pub(crate) events: broadcast::Sender<SettlementEvent>,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) batch_build_in_flight: AtomicBool,
    pub(crate) confirm_in_flight: AtomicBool,
    pub(crate) recovery_in_flight: AtomicBool,
    pub(crate) cancel: CancellationToken,
}

/// Cloneable handle to the settlement pipeline.
pub struct BatchSettler<C, S, L> {
    pub(crate) inner: Arc<SettlerInner<C, S, L>>,
}

impl<C, S, L> Clone for BatchSettler<C, S, L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, S, L> BatchSettler<C, S, L>
where
    C: ChainClient + 'static,
    S: SettlementStore + 'static,
    L: LockService + 'static,
{
    #[must_use]
    pub fn new(
        config: SettlementConfig,
        operator: Address,
        chain: Arc<C>,
        store: Arc<S>,
        locks: Arc<L>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SettlerInner {
                config,
                operator,
                chain,
                store,
                locks,
                queue: FillQueue::new(),
                batches: DashMap::new(),
                stats: Mutex::new(SettlementStats::default()),
                events,
                shutting_down: AtomicBool::new(false),
                batch_build_in_flight: AtomicBool::new(false),
                confirm_in_flight: AtomicBool::new(false),
                recovery_in_flight: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    // ========================================================================
    // Producer surface
    // ========================================================================

    /// Accept a fill for settlement.
    ///
    /// Re-adding a fill with a known id overwrites in place (recovery
    /// re-injection is idempotent). Rejects once shutdown has begun.
    pub async fn add_fill(&self, fill: Fill) -> SettlementResult<()> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(SettlementError::ShuttingDown);
        }

        let fill_id = fill.id.clone();
        if !self.inner.queue.insert(fill) {
            debug!(fill_id = %fill_id, "Duplicate fill overwritten in queue");
        } else {
            debug!(fill_id = %fill_id, queued = self.inner.queue.len(), "Fill queued");
        }

        // The size trigger is also checked inline so a full queue does not
        // wait for the next tick.
        if self.inner.queue.len() >= self.inner.config.max_batch_size {
            self.try_build_batch().await;
        }
        Ok(())
    }

    /// Subscribe to the settlement event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.inner.events.subscribe()
    }

    /// Current pipeline counters.
    #[must_use]
    pub fn stats(&self) -> SettlementStats {
        let mut stats = self.inner.stats.lock().clone();
        stats.pending_fills = self.inner.queue.len();
        stats.pending_batches = self
            .inner
            .batches
            .iter()
            .filter(|entry| entry.value().status != BatchStatus::Submitted)
            .count();
        stats.submitted_batches = self
            .inner
            .batches
            .iter()
            .filter(|entry| entry.value().status == BatchStatus::Submitted)
            .count();
        stats
    }

    /// Address the settlement transactions are sent from.
    #[must_use]
    pub fn operator_address(&self) -> Address {
        self.inner.operator
    }

    /// Native-token balance of the operator.
    pub async fn operator_balance(&self) -> SettlementResult<U256> {
        Ok(self.inner.chain.balance(self.inner.operator).await?)
    }

    // ========================================================================
    // Task loops
    // ========================================================================

    /// Spawn the three periodic tasks. Returns immediately.
    pub fn start(&self) {
        let settler = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(BATCH_TICK_MS));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = settler.inner.cancel.cancelled() => break,
                    _ = tick.tick() => settler.try_build_batch().await,
                }
            }
            debug!("Batch builder loop stopped");
        });

        let settler = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(CONFIRM_TICK_MS));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = settler.inner.cancel.cancelled() => break,
                    _ = tick.tick() => settler.check_confirmations().await,
                }
            }
            debug!("Confirmation loop stopped");
        });

        let settler = self.clone();
        let interval_ms = self.inner.config.failed_fill_retry_interval_ms;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = settler.inner.cancel.cancelled() => break,
                    _ = tick.tick() => settler.retry_failed_fills().await,
                }
            }
            debug!("Recovery loop stopped");
        });

        info!(
            chain_id = self.inner.config.chain_id,
            market = %self.inner.config.market_address,
            "Settlement pipeline started"
        );
    }

    /// Graceful drain: stop the ticks, flush the queue into one final
    /// batch, then poll confirmations for a bounded grace period.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Settlement pipeline shutting down");
        self.inner.cancel.cancel();

        // Wait out any in-progress build, then flush everything still
        // queued, bypassing the size and age triggers.
        while self
            .inner
            .batch_build_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let fills = self.inner.queue.drain_all();
        if !fills.is_empty() {
            info!(fills = fills.len(), "Flushing remaining fills into a final batch");
            self.build_and_submit(fills).await;
        }
        self.inner.batch_build_in_flight.store(false, Ordering::SeqCst);

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.inner.config.shutdown_grace_ms);
        while tokio::time::Instant::now() < deadline && !self.inner.batches.is_empty() {
            self.check_confirmations().await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let abandoned = self.inner.batches.len();
        if abandoned > 0 {
            // Submitted batches without a failure record are picked up by
            // the next process's confirmation/recovery cycle.
            warn!(abandoned, "Batches left unresolved at shutdown");
        }
    }

    // ========================================================================
    // Batch formation
    // ========================================================================

    /// Evaluate the formation triggers and build a batch if one fired.
    /// Exclusive: an overlapping call is a no-op.
    pub(crate) async fn try_build_batch(&self) {
        if self
            .inner
            .batch_build_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if self.batch_trigger_met() {
            let fills = self.inner.queue.take(self.inner.config.max_batch_size);
            if !fills.is_empty() {
                self.build_and_submit(fills).await;
            }
        }

        self.inner.batch_build_in_flight.store(false, Ordering::SeqCst);
    }

    fn batch_trigger_met(&self) -> bool {
        let len = self.inner.queue.len();
        if len == 0 {
            return false;
        }
        if len >= self.inner.config.max_batch_size {
            return true;
        }
        if len >= self.inner.config.min_batch_size {
            if let Some(oldest) = self.inner.queue.oldest_timestamp_ms() {
                return now_ms().saturating_sub(oldest) >= self.inner.config.max_batch_wait_ms;
            }
        }
        false
    }

    /// Register a new batch over the given fills and hand it to the
    /// submitter without waiting for the outcome.
    pub(crate) async fn build_and_submit(&self, fills: Vec<Fill>) {
        let batch = SettlementBatch::new(
            self.inner.config.chain_id,
            self.inner.config.market_address,
            fills,
            now_ms(),
        );
        info!(batch_id = %batch.id, fills = batch.fill_count(), "Batch created");

        self.inner.batches.insert(batch.id.clone(), batch.clone());
        self.persist_batch(&batch).await;
        self.emit(SettlementEvent::BatchCreated {
            batch: batch.clone(),
        });

        let settler = self.clone();
        tokio::spawn(async move {
            settler.submit_batch(batch).await;
        });
    }

    // ========================================================================
    // Shared transitions
    // ========================================================================

    /// Terminal failure: persist the batch and its fills for recovery,
    /// then emit `batch_failed` and drop the batch.
    pub(crate) async fn fail_batch(&self, mut batch: SettlementBatch, error: String) {
        let now = now_ms();
        batch.status = BatchStatus::Failed;
        batch.error = Some(error.clone());
        self.update_batch(&batch);
        self.persist_batch(&batch).await;

        let next_retry_at = datetime_from_ms(now + self.inner.config.retry_delay_ms);
        for fill in &batch.fills {
            let payload = FailedFillPayload::new(
                self.inner.config.chain_id,
                self.inner.config.market_address,
                fill.clone(),
            );
            let payload = match payload.to_value() {
                Ok(value) => value,
                Err(e) => {
                    error!(fill_id = %fill.id, error = %e, "Recovery payload serialization failed");
                    continue;
                }
            };
            let record = NewFailedFill {
                fill_id: fill.id.clone(),
                batch_id: batch.id.clone(),
                error: error.clone(),
                chain_id: self.inner.config.chain_id,
                market_address: self.inner.config.market_address,
                payload,
                next_retry_at,
                created_at: datetime_from_ms(now),
            };
            if let Err(e) = self.inner.store.upsert_failed_fill(&record).await {
                // Not masked as success: the fill survives in memory only
                // and is lost if the process exits before a later retry.
                warn!(fill_id = %fill.id, error = %e, "Recovery record persistence failed");
            }
        }

        self.inner.stats.lock().failed_batches += 1;
        warn!(batch_id = %batch.id, error = %error, "Batch terminally failed");
        self.emit(SettlementEvent::BatchFailed {
            batch_id: batch.id.clone(),
            error,
        });
        self.inner.batches.remove(&batch.id);
    }

    pub(crate) fn update_batch(&self, batch: &SettlementBatch) {
        self.inner.batches.insert(batch.id.clone(), batch.clone());
    }

    /// Snapshot a batch to the durable store. Store unavailability is
    /// logged, never fatal.
    pub(crate) async fn persist_batch(&self, batch: &SettlementBatch) {
        let record = clob_store::BatchRecord::from_batch(batch);
        if let Err(e) = self.inner.store.upsert_batch(&record).await {
            warn!(batch_id = %batch.id, error = %e, "Batch record persistence failed");
        }
    }

    pub(crate) fn emit(&self, event: SettlementEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}
