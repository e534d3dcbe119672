//! Core domain types for the darkroom upload pipeline.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload records, parts, and their state machines
//! - Request/response types for the lifecycle operations
//! - Storage key derivation and input validation
//! - Configuration for the storage, metadata, and upload layers

pub mod config;
pub mod error;
pub mod key;
pub mod upload;

pub use config::{MetadataConfig, StorageConfig, UploadConfig};
pub use error::{Error, Result};
pub use key::{single_upload_id, storage_key, validate_content_type, validate_filename};
pub use upload::{
    PartEtag, ProcessingStatus, UploadKind, UploadPart, UploadPlan, UploadRecord, UploadStatus,
};

/// Uploads at or above this size use the multipart protocol: 5 MiB.
pub const MULTIPART_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Default part size for multipart uploads: 10 MiB.
pub const DEFAULT_PART_SIZE: u64 = 10 * 1024 * 1024;

/// Minimum part size accepted by the store for non-final parts: 5 MiB.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Store protocol ceiling on part numbers.
pub const MAX_PART_COUNT: u32 = 10_000;

/// Maximum accepted upload size: 5 GiB.
pub const MAX_UPLOAD_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Default presigned URL lifetime in seconds.
pub const DEFAULT_URL_TTL_SECS: u64 = 3600;
