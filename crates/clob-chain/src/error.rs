//! Chain error types.

use thiserror::Error;

/// Errors surfaced by the chain client.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("Signer error: {0}")]
    Signer(#[from] alloy::signers::Error),

    #[error("Invalid operator key: {0}")]
    InvalidKey(String),
}

/// Result type alias for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
