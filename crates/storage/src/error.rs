//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("multipart upload not found: {0}")]
    UploadNotFound(String),

    #[error("incomplete part set: {0}")]
    IncompletePartSet(String),

    #[error("invalid part number: {number} (valid range is 1..={max})")]
    InvalidPartNumber { number: u32, max: u32 },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
