//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(#[from] clob_chain::ChainError),

    #[error("Store error: {0}")]
    Store(#[from] clob_store::StoreError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] clob_settlement::SettlementError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] clob_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type AppResult<T> = Result<T, AppError>;
