//! Derived-asset (thumbnail) generation contract.

use crate::error::{UploadError, UploadResult};
use async_trait::async_trait;

/// Location of a generated rendition, as reported by the generator.
#[derive(Clone, Debug)]
pub struct DerivedAsset {
    /// Key the rendition was stored under.
    pub thumbnail_key: String,
    /// URL the rendition is served from.
    pub thumbnail_url: String,
    /// URL the generator used to read the source object, kept for audit.
    pub source_url: Option<String>,
}

/// Produces a secondary rendition of a stored object and stores it itself,
/// reporting where it landed. Kept behind a trait so the network service can
/// be swapped for an in-process image library without touching the state
/// machine.
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync + 'static {
    /// Whether this generator can derive a rendition for the content type.
    fn supports(&self, content_type: &str) -> bool {
        content_type.starts_with("image/")
    }

    /// Derive and store a rendition of `bucket`/`key`.
    async fn generate(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> UploadResult<DerivedAsset>;
}

/// Default generator that derives nothing; uploads promote without a
/// thumbnail.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoThumbnails;

#[async_trait]
impl ThumbnailGenerator for NoThumbnails {
    fn supports(&self, _content_type: &str) -> bool {
        false
    }

    async fn generate(
        &self,
        _bucket: &str,
        _key: &str,
        _content_type: &str,
    ) -> UploadResult<DerivedAsset> {
        Err(UploadError::DerivationFailed(
            "thumbnail generation is not configured".to_string(),
        ))
    }
}
