//! Gas-gated batch submission.
//!
//! Drives one batch from `pending` to `submitted` or `failed`:
//! fee-ceiling gate, gas estimation with a +20% margin, submission at a
//! multiplied fee, exponential backoff across transient failures.

use std::time::Duration;

use alloy::primitives::TxHash;
use tracing::{debug, info, warn};

use clob_chain::{encode_batch_fill, ChainClient};
use clob_core::{BatchStatus, SettlementBatch, SettlementEvent};
use clob_store::{LockService, SettlementStore};

use crate::settler::{now_ms, BatchSettler};

/// Outcome of one submission attempt.
enum Attempt {
    Submitted(TxHash),
    /// Retry after backoff, bounded by `max_retries`.
    Transient(String),
    /// Structurally invalid batch; never retried.
    Structural(String),
}

impl<C, S, L> BatchSettler<C, S, L>
where
    C: ChainClient + 'static,
    S: SettlementStore + 'static,
    L: LockService + 'static,
{
    /// Drive a batch to `submitted` or terminal failure. Runs as its own
    /// task; the batch-formation tick never waits on it.
    pub(crate) async fn submit_batch(&self, mut batch: SettlementBatch) {
        loop {
            batch.status = BatchStatus::Submitting;
            self.update_batch(&batch);
            self.persist_batch(&batch).await;

            match self.attempt_submission(&batch).await {
                Attempt::Submitted(tx_hash) => {
                    batch.status = BatchStatus::Submitted;
                    batch.tx_hash = Some(tx_hash);
                    batch.submitted_at = Some(now_ms());
                    self.update_batch(&batch);
                    self.persist_batch(&batch).await;
                    info!(batch_id = %batch.id, tx_hash = %tx_hash, "Batch submitted");
                    self.emit(SettlementEvent::BatchSubmitted {
                        batch_id: batch.id.clone(),
                        tx_hash,
                    });
                    return;
                }
                Attempt::Structural(error) => {
                    self.fail_batch(batch, error).await;
                    return;
                }
                Attempt::Transient(error) => {
                    batch.retry_count += 1;
                    batch.error = Some(error.clone());
                    if batch.retry_count >= self.inner.config.max_retries {
                        self.fail_batch(batch, error).await;
                        return;
                    }

                    let delay_ms = self.inner.config.backoff_delay_ms(batch.retry_count);
                    warn!(
                        batch_id = %batch.id,
                        retry = batch.retry_count,
                        delay_ms,
                        error = %error,
                        "Submission attempt failed, backing off"
                    );
                    batch.status = BatchStatus::Retrying;
                    self.update_batch(&batch);
                    self.persist_batch(&batch).await;
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    async fn attempt_submission(&self, batch: &SettlementBatch) -> Attempt {
        let config = &self.inner.config;

        let fee = match self.inner.chain.fee_data().await {
            Ok(fee) => fee,
            Err(e) => return Attempt::Transient(format!("fee query failed: {e}")),
        };
        if fee.gas_price > config.max_gas_price_wei {
            debug!(
                batch_id = %batch.id,
                gas_price = fee.gas_price,
                ceiling = config.max_gas_price_wei,
                "Gas price above ceiling, deferring submission"
            );
            return Attempt::Transient(format!(
                "gas price {} exceeds ceiling {}",
                fee.gas_price, config.max_gas_price_wei
            ));
        }

        let call = encode_batch_fill(config.market_address, &batch.fills);
        let estimate = match self.inner.chain.estimate_gas(&call).await {
            Ok(units) => units,
            Err(e) => return Attempt::Structural(format!("gas estimation failed: {e}")),
        };
        let gas_limit = estimate + estimate / 5;
        // Integer math: multiplier applied at percent precision.
        let multiplier_pct = (config.gas_price_multiplier * 100.0) as u128;
        let gas_price = fee.gas_price * multiplier_pct / 100;

        match self
            .inner
            .chain
            .send_transaction(&call, gas_limit, gas_price)
            .await
        {
            Ok(tx_hash) => Attempt::Submitted(tx_hash),
            Err(e) => Attempt::Transient(format!("submission failed: {e}")),
        }
    }
}
