//! Core domain types for the CLOB settlement relayer.
//!
//! This crate provides the fundamental types shared across the pipeline:
//! - `Fill`, `SignedOrder`: a matched quantity of a signed maker order
//! - `SettlementBatch`, `BatchStatus`: the unit submitted on-chain
//! - `FailedFillPayload`: the durable, self-contained recovery payload
//! - `SettlementEvent`, `SettlementStats`: the observable surface

pub mod batch;
pub mod error;
pub mod events;
pub mod fill;
pub mod payload;

pub use batch::{BatchId, BatchStatus, SettlementBatch};
pub use error::{CoreError, Result};
pub use events::{SettlementEvent, SettlementStats};
pub use fill::{Fill, FillId, SignedOrder};
pub use payload::{FailedFillPayload, PAYLOAD_VERSION};
