//! Batch settlement relayer.
//!
//! Wires the settlement pipeline to an Ethereum JSON-RPC endpoint, a
//! durable store, and a recovery lock backend, all selected through TOML
//! configuration.

pub mod app;
pub mod config;
pub mod error;

pub use app::run;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
