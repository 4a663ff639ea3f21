//! Error types for state store operations.

use thiserror::Error;

/// Errors returned by [`StateStore`](crate::StateStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing Redis server rejected the command or was unreachable.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A key held a value of the wrong shape for the command.
    #[error("key '{key}' holds a non-integer value '{value}'")]
    NotAnInteger { key: String, value: String },
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
