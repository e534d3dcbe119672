//! Lifecycle manager error types.

use darkroom_metadata::MetadataError;
use darkroom_storage::StorageError;

/// Errors surfaced by the upload lifecycle manager.
///
/// Display text stays generic at this boundary; the full cause is preserved
/// through `source` for the log layer.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Malformed input, rejected before touching the store or the record.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No record matches the `(upload_id, owner)` pair. Records owned by
    /// someone else look exactly like this.
    #[error("not found: {0}")]
    RecordNotFound(String),

    /// The record left the active state and rejects lifecycle operations.
    #[error("upload is {0}, not active")]
    NotActive(String),

    /// The store rejected the completion part list.
    #[error("incomplete part set: {0}")]
    IncompletePartSet(String),

    /// An object-store call failed. Retrying the call is safe; the record
    /// has already been driven to a consistent state.
    #[error("object store unavailable")]
    StoreUnavailable(#[source] StorageError),

    /// Promotion or thumbnail derivation failed.
    #[error("derivation failed: {0}")]
    DerivationFailed(String),

    /// The owner is at the configured cap on concurrently active uploads.
    #[error("active upload limit reached ({limit})")]
    ActiveUploadLimit { limit: u32 },

    /// Record store failure not covered by a more specific variant.
    #[error("record store error")]
    Metadata(#[source] MetadataError),
}

impl UploadError {
    /// Stable error code for embedding layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::RecordNotFound(_) => "not_found",
            Self::NotActive(_) => "not_active",
            Self::IncompletePartSet(_) => "incomplete_part_set",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::DerivationFailed(_) => "derivation_failed",
            Self::ActiveUploadLimit { .. } => "active_upload_limit",
            Self::Metadata(_) => "record_store_error",
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::IncompletePartSet(detail) => Self::IncompletePartSet(detail),
            other => Self::StoreUnavailable(other),
        }
    }
}

impl From<MetadataError> for UploadError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(what) => Self::RecordNotFound(what),
            MetadataError::InvalidStateTransition { from, .. } => Self::NotActive(from),
            other => Self::Metadata(other),
        }
    }
}

impl From<darkroom_core::Error> for UploadError {
    fn from(err: darkroom_core::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type for lifecycle operations.
pub type UploadResult<T> = std::result::Result<T, UploadError>;
