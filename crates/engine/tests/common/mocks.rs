//! Scanner and thumbnailer doubles for exercising promotion branches.

use async_trait::async_trait;
use bytes::Bytes;
use darkroom_engine::{
    ContentScanner, DerivedAsset, ScanVerdict, ThumbnailGenerator, UploadError, UploadResult,
};
use darkroom_storage::MemoryBackend;
use std::sync::Arc;

/// Flags everything it sees.
#[allow(dead_code)]
pub struct RejectingScanner;

#[async_trait]
impl ContentScanner for RejectingScanner {
    async fn scan(&self, _bucket: &str, _key: &str) -> UploadResult<ScanVerdict> {
        Ok(ScanVerdict::Rejected {
            reason: "flagged by policy".to_string(),
        })
    }
}

/// Writes a `{key}.thumb.jpg` sidecar into the same backend the engine
/// promotes into, standing in for an external rendition service.
#[allow(dead_code)]
pub struct SidecarThumbnailer {
    pub store: Arc<MemoryBackend>,
}

#[async_trait]
impl ThumbnailGenerator for SidecarThumbnailer {
    async fn generate(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
    ) -> UploadResult<DerivedAsset> {
        let thumbnail_key = format!("{key}.thumb.jpg");
        self.store
            .insert_object(bucket, &thumbnail_key, "image/jpeg", Bytes::from_static(b"thumb"))
            .await;
        Ok(DerivedAsset {
            thumbnail_url: format!("memory://{bucket}/{thumbnail_key}"),
            source_url: Some(format!("memory://{bucket}/{key}")),
            thumbnail_key,
        })
    }
}

/// Fails every derivation.
#[allow(dead_code)]
pub struct FailingThumbnailer;

#[async_trait]
impl ThumbnailGenerator for FailingThumbnailer {
    async fn generate(
        &self,
        _bucket: &str,
        _key: &str,
        _content_type: &str,
    ) -> UploadResult<DerivedAsset> {
        Err(UploadError::DerivationFailed("decoder crashed".to_string()))
    }
}
