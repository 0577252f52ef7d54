use thiserror::Error;

/// Durable-store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
