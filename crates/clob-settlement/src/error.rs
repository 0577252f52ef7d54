use thiserror::Error;

/// Settlement pipeline failures surfaced to callers.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// The pipeline no longer accepts fills.
    #[error("settlement pipeline is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Chain(#[from] clob_chain::ChainError),
}

pub type SettlementResult<T> = Result<T, SettlementError>;
