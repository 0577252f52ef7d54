//! Batch settlement pipeline.
//!
//! Accepts fills from the matching engine, forms batches under size/age
//! policy, submits them on-chain behind a gas-price gate, tracks
//! confirmations, and recovers fills from terminally failed batches via a
//! durable, lock-protected retry queue. Lifecycle transitions are
//! republished on a broadcast event stream.

pub mod config;
pub mod error;
pub mod queue;
pub mod settler;

mod confirm;
mod recovery;
mod submit;

pub use config::SettlementConfig;
pub use error::{SettlementError, SettlementResult};
pub use queue::FillQueue;
pub use settler::BatchSettler;

#[cfg(test)]
mod tests;
