//! Prometheus metrics for the settlement pipeline.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_int_gauge, Counter,
    CounterVec, Histogram, IntGauge, TextEncoder,
};

use clob_core::{SettlementEvent, SettlementStats};

use crate::error::TelemetryResult;

/// Total batches created.
pub static BATCHES_CREATED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("clob_batches_created_total", "Total settlement batches created").unwrap()
});

/// Total batches submitted on-chain.
pub static BATCHES_SUBMITTED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "clob_batches_submitted_total",
        "Total settlement batches submitted on-chain"
    )
    .unwrap()
});

/// Total batches confirmed at the required depth.
pub static BATCHES_CONFIRMED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "clob_batches_confirmed_total",
        "Total settlement batches confirmed"
    )
    .unwrap()
});

/// Total terminally failed batches.
pub static BATCHES_FAILED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "clob_batches_failed_total",
        "Total settlement batches terminally failed"
    )
    .unwrap()
});

/// Total fills settled on-chain.
pub static FILLS_SETTLED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("clob_fills_settled_total", "Total fills settled on-chain").unwrap()
});

/// Total permanently failed fills.
/// Labels: reason (max_retries/unrecoverable_payload/other)
pub static FILLS_FAILED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "clob_fills_failed_total",
        "Total fills permanently failed",
        &["reason"]
    )
    .unwrap()
});

/// Fills per created batch.
pub static BATCH_SIZE: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "clob_batch_size",
        "Fills per settlement batch",
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 50.0, 100.0]
    )
    .unwrap()
});

/// Fills waiting in the queue.
pub static PENDING_FILLS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("clob_pending_fills", "Fills waiting in the settlement queue").unwrap()
});

/// Batches awaiting confirmation.
pub static SUBMITTED_BATCHES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "clob_submitted_batches",
        "Settlement batches awaiting confirmation"
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Fold one settlement lifecycle event into the counters.
    pub fn record_event(event: &SettlementEvent) {
        match event {
            SettlementEvent::BatchCreated { batch } => {
                BATCHES_CREATED_TOTAL.inc();
                BATCH_SIZE.observe(batch.fill_count() as f64);
            }
            SettlementEvent::BatchSubmitted { .. } => BATCHES_SUBMITTED_TOTAL.inc(),
            SettlementEvent::BatchConfirmed { .. } => BATCHES_CONFIRMED_TOTAL.inc(),
            SettlementEvent::BatchFailed { .. } => BATCHES_FAILED_TOTAL.inc(),
            SettlementEvent::FillSettled { .. } => FILLS_SETTLED_TOTAL.inc(),
            SettlementEvent::FillFailed { error, .. } => {
                let reason = if error.contains("max retries") {
                    "max_retries"
                } else if error.contains("unrecoverable payload") {
                    "unrecoverable_payload"
                } else {
                    "other"
                };
                FILLS_FAILED_TOTAL.with_label_values(&[reason]).inc();
            }
        }
    }

    /// Refresh the queue-depth gauges from a stats snapshot.
    pub fn update_gauges(stats: &SettlementStats) {
        PENDING_FILLS.set(stats.pending_fills as i64);
        SUBMITTED_BATCHES.set(stats.submitted_batches as i64);
    }
}

/// Render all registered metrics in Prometheus text format.
pub fn gather() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let metrics = prometheus::gather();
    Ok(encoder.encode_to_string(&metrics)?)
}
