//! Error types for the storage layer.

use thiserror::Error;

/// Result type alias using StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by a [`Storage`](super::Storage) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("corrupted record: {0}")]
    Corrupted(String),
}
