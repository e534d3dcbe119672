//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("invalid total size: {size} (must be between 1 and {max})")]
    InvalidTotalSize { size: u64, max: u64 },

    #[error("invalid part size: {size} (must be at least {min})")]
    InvalidPartSize { size: u64, min: u64 },

    #[error("invalid part number: {number} (must be between 1 and {max})")]
    InvalidPartNumber { number: u32, max: u32 },

    #[error("invalid status value: {0}")]
    InvalidStatus(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
