//! Error types for pool storage

/// Errors from record and platform storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("store parse error: {0}")]
    Parse(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("invalid record state: {0}")]
    Invalid(String),
}

/// Result alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
