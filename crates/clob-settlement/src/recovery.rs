//! Failed-fill recovery.
//!
//! A periodic sweep, mutually excluded across relayer instances by a
//! zero-wait advisory lock, that re-injects due recovery records into the
//! fill queue. Recovery is safe to skip for a tick but never safe to run
//! twice concurrently for the same market.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use clob_chain::ChainClient;
use clob_core::{FailedFillPayload, FillId, SettlementEvent};
use clob_store::{LockService, SettlementStore};

use crate::error::SettlementError;
use crate::settler::{datetime_from_ms, now_ms, BatchSettler, RECOVERY_LOCK_TTL_MS};

impl<C, S, L> BatchSettler<C, S, L>
where
    C: ChainClient + 'static,
    S: SettlementStore + 'static,
    L: LockService + 'static,
{
    /// One recovery sweep. Non-reentrant: an overlapping call is a no-op.
    pub(crate) async fn retry_failed_fills(&self) {
        if self
            .inner
            .recovery_in_flight
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        self.run_recovery_sweep().await;

        self.inner
            .recovery_in_flight
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }

    async fn run_recovery_sweep(&self) {
        let config = &self.inner.config;
        let key = config.recovery_lock_key();

        // Zero wait, zero retries: contention means another instance is
        // sweeping, so this tick is simply skipped.
        let token = match self
            .inner
            .locks
            .acquire(&key, RECOVERY_LOCK_TTL_MS, 0, 0)
            .await
        {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(key, "Recovery lock held elsewhere, skipping sweep");
                return;
            }
            Err(e) => {
                warn!(key, error = %e, "Recovery lock acquisition failed");
                return;
            }
        };

        match self
            .inner
            .store
            .due_failed_fills(
                config.chain_id,
                config.market_address,
                Utc::now(),
                config.failed_fill_retry_batch_size,
            )
            .await
        {
            Ok(rows) => {
                if !rows.is_empty() {
                    debug!(due = rows.len(), "Recovery sweep started");
                }
                for row in rows {
                    self.process_recovery_row(row).await;
                }
            }
            Err(e) => warn!(error = %e, "Failed to load due recovery records"),
        }

        if let Err(e) = self.inner.locks.release(&key, &token).await {
            warn!(key, error = %e, "Recovery lock release failed");
        }
    }

    async fn process_recovery_row(&self, row: clob_store::FailedFillRow) {
        let config = &self.inner.config;

        if row.retry_count + 1 > config.failed_fill_max_retries {
            info!(
                fill_id = %row.fill_id,
                retries = row.retry_count,
                "Fill exhausted its recovery budget"
            );
            self.resolve_permanently(&row.fill_id, "max retries exceeded")
                .await;
            return;
        }

        let payload = match FailedFillPayload::from_value(&row.payload) {
            Ok(payload) => payload,
            Err(e) => {
                error!(fill_id = %row.fill_id, error = %e, "Unrecoverable payload");
                self.resolve_permanently(&row.fill_id, &format!("unrecoverable payload: {e}"))
                    .await;
                return;
            }
        };

        let retry_count = row.retry_count + 1;
        let next_retry_at = datetime_from_ms(now_ms() + config.backoff_delay_ms(retry_count));
        if let Err(e) = self
            .inner
            .store
            .bump_failed_fill_retry(&row.fill_id, retry_count, next_retry_at)
            .await
        {
            warn!(fill_id = %row.fill_id, error = %e, "Retry bookkeeping update failed");
        }

        match self.add_fill(payload.fill).await {
            Ok(()) => {
                debug!(fill_id = %row.fill_id, retry = retry_count, "Fill re-queued for settlement");
            }
            Err(SettlementError::ShuttingDown) => {
                debug!(fill_id = %row.fill_id, "Shutdown began mid-sweep, leaving fill for the next process");
            }
            Err(e) => warn!(fill_id = %row.fill_id, error = %e, "Re-queue failed"),
        }
    }

    /// Permanent failure: resolve the record first, emit `fill_failed`
    /// only once the resolution persisted.
    async fn resolve_permanently(&self, fill_id: &FillId, reason: &str) {
        if let Err(e) = self
            .inner
            .store
            .resolve_failed_fill(fill_id, Some(reason))
            .await
        {
            warn!(fill_id = %fill_id, error = %e, "Recovery record resolution failed");
            return;
        }
        self.emit(SettlementEvent::FillFailed {
            fill_id: fill_id.clone(),
            error: reason.to_string(),
        });
    }
}
