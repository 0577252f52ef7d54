//! Confirmation tracking.
//!
//! Polls submitted batches for receipts, applies the confirmation-depth
//! threshold, declares receipt-less batches lost after the configured
//! timeout, and on confirmation ingests the receipt's trade events and
//! settles every fill in the batch.

use chrono::DateTime;
use tracing::{info, trace, warn};

use clob_chain::{decode_trade_events, ChainClient, TxReceipt};
use clob_core::{BatchStatus, SettlementBatch, SettlementEvent};
use clob_store::{LockService, SettlementStore, TradeEventRecord};

use crate::settler::{now_ms, BatchSettler};

impl<C, S, L> BatchSettler<C, S, L>
where
    C: ChainClient + 'static,
    S: SettlementStore + 'static,
    L: LockService + 'static,
{
    /// One confirmation-polling pass. Non-reentrant: an overlapping call
    /// is a no-op.
    pub(crate) async fn check_confirmations(&self) {
        if self
            .inner
            .confirm_in_flight
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

        self.poll_submitted_batches().await;

        self.inner
            .confirm_in_flight
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }

    async fn poll_submitted_batches(&self) {
        let submitted: Vec<SettlementBatch> = self
            .inner
            .batches
            .iter()
            .filter(|entry| entry.value().status == BatchStatus::Submitted)
            .map(|entry| entry.value().clone())
            .collect();
        if submitted.is_empty() {
            return;
        }

        let height = match self.inner.chain.block_number().await {
            Ok(height) => height,
            Err(e) => {
                warn!(error = %e, "Chain height query failed, skipping confirmation pass");
                return;
            }
        };

        for batch in submitted {
            let Some(tx_hash) = batch.tx_hash else {
                continue;
            };

            match self.inner.chain.transaction_receipt(tx_hash).await {
                Err(e) => {
                    warn!(batch_id = %batch.id, error = %e, "Receipt query failed");
                }
                Ok(None) => {
                    let submitted_at = batch.submitted_at.unwrap_or(batch.created_at);
                    let elapsed = now_ms().saturating_sub(submitted_at);
                    if elapsed >= self.inner.config.confirmation_timeout_ms {
                        warn!(
                            batch_id = %batch.id,
                            elapsed_ms = elapsed,
                            "No receipt within the confirmation timeout"
                        );
                        self.fail_batch(batch, "confirmation timeout".to_string())
                            .await;
                    }
                }
                Ok(Some(receipt)) => {
                    let depth = height.saturating_sub(receipt.block_number);
                    if depth < self.inner.config.confirmations {
                        trace!(
                            batch_id = %batch.id,
                            depth,
                            required = self.inner.config.confirmations,
                            "Awaiting confirmation depth"
                        );
                        continue;
                    }
                    self.confirm_batch(batch, receipt).await;
                }
            }
        }
    }

    async fn confirm_batch(&self, mut batch: SettlementBatch, receipt: TxReceipt) {
        let now = now_ms();
        let latency_ms = now.saturating_sub(batch.submitted_at.unwrap_or(batch.created_at));

        batch.status = BatchStatus::Confirmed;
        batch.block_number = Some(receipt.block_number);
        batch.gas_used = Some(receipt.gas_used);
        batch.confirmed_at = Some(now);
        self.persist_batch(&batch).await;

        self.inner
            .stats
            .lock()
            .record_confirmation(batch.fill_count(), receipt.gas_used, latency_ms);

        self.ingest_trade_events(&receipt).await;

        info!(
            batch_id = %batch.id,
            block_number = receipt.block_number,
            gas_used = receipt.gas_used,
            fills = batch.fill_count(),
            latency_ms,
            "Batch confirmed"
        );
        self.emit(SettlementEvent::BatchConfirmed {
            batch_id: batch.id.clone(),
            block_number: receipt.block_number,
        });

        for fill in &batch.fills {
            // A fill that came back through recovery has an outstanding
            // record; settle it. Unknown ids are a no-op.
            if let Err(e) = self.inner.store.resolve_failed_fill(&fill.id, None).await {
                warn!(fill_id = %fill.id, error = %e, "Recovery record resolution failed");
            }
            self.emit(SettlementEvent::FillSettled {
                fill_id: fill.id.clone(),
                tx_hash: receipt.tx_hash,
                fill: fill.clone(),
            });
        }

        self.inner.batches.remove(&batch.id);
    }

    async fn ingest_trade_events(&self, receipt: &TxReceipt) {
        let config = &self.inner.config;
        let trades = decode_trade_events(config.market_address, &receipt.logs);
        if trades.is_empty() {
            return;
        }

        let block_timestamp = match self.inner.chain.block_timestamp(receipt.block_number).await {
            Ok(seconds) => seconds.and_then(|s| DateTime::from_timestamp(s as i64, 0)),
            Err(e) => {
                warn!(
                    block_number = receipt.block_number,
                    error = %e,
                    "Block timestamp lookup failed"
                );
                None
            }
        };

        for trade in &trades {
            let record = TradeEventRecord {
                tx_hash: receipt.tx_hash,
                log_index: trade.log_index,
                chain_id: config.chain_id,
                market_address: config.market_address,
                maker: trade.maker,
                taker: trade.taker,
                outcome_index: trade.outcome_index,
                is_buy: trade.is_buy,
                price: trade.price,
                amount: trade.amount,
                fee: trade.fee,
                salt: trade.salt,
                block_number: receipt.block_number,
                block_timestamp,
            };
            if let Err(e) = self.inner.store.ingest_trade_event(&record).await {
                warn!(
                    tx_hash = %receipt.tx_hash,
                    log_index = trade.log_index,
                    error = %e,
                    "Trade event ingestion failed"
                );
            }
        }
    }
}
