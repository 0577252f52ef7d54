//! Error types for clob-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid fill id: {0}")]
    InvalidFillId(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unsupported payload version: {0}")]
    UnsupportedPayloadVersion(u32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
