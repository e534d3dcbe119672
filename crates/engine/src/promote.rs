//! Background promotion pipeline.
//!
//! Runs once per completed upload: copy the object from the temp bucket to
//! the final bucket, scan it, optionally derive a thumbnail, persist the
//! promotion fields, then drop the temp object. Every failure path cleans up
//! partial artifacts best-effort and drives the record to `failed`; nothing
//! here ever surfaces to the caller who triggered completion.

use crate::scan::{ContentScanner, ScanVerdict};
use crate::tasks::TaskRegistry;
use crate::thumbnail::{DerivedAsset, ThumbnailGenerator};
use darkroom_core::ProcessingStatus;
use darkroom_metadata::{MetadataStore, PromotionFields};
use darkroom_storage::ObjectStore;
use std::sync::Arc;

pub(crate) struct Promotion {
    pub(crate) records: Arc<dyn MetadataStore>,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) scanner: Arc<dyn ContentScanner>,
    pub(crate) thumbnails: Arc<dyn ThumbnailGenerator>,
    pub(crate) tasks: Arc<TaskRegistry>,
    pub(crate) owner: String,
    pub(crate) upload_id: String,
    pub(crate) temp_bucket: String,
    pub(crate) final_bucket: String,
    pub(crate) storage_key: String,
    pub(crate) content_type: String,
}

impl Promotion {
    pub(crate) async fn run(self) {
        self.execute().await;
        self.tasks.deregister(&self.upload_id).await;
    }

    #[tracing::instrument(
        skip(self),
        fields(upload_id = %self.upload_id, owner = %self.owner, key = %self.storage_key)
    )]
    async fn execute(&self) {
        self.set_progress(ProcessingStatus::Processing, 10).await;

        // Copy temp -> final under the same key. Until this succeeds there
        // is nothing to clean up.
        if let Err(err) = self
            .store
            .copy_object(
                &self.temp_bucket,
                &self.storage_key,
                &self.final_bucket,
                &self.storage_key,
            )
            .await
        {
            tracing::error!(error = %err, "promotion copy failed");
            self.fail("object promotion failed").await;
            return;
        }
        self.set_progress(ProcessingStatus::Processing, 40).await;

        // The final-bucket object now exists; every failure below must
        // remove it before failing the record.
        match self.scanner.scan(&self.final_bucket, &self.storage_key).await {
            Ok(ScanVerdict::Clean) => {}
            Ok(ScanVerdict::Rejected { reason }) => {
                tracing::warn!(reason = %reason, "content scan rejected upload");
                self.remove_artifacts(None).await;
                self.fail(&format!("content rejected: {reason}")).await;
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "content scan failed");
                self.remove_artifacts(None).await;
                self.fail("content scan failed").await;
                return;
            }
        }
        self.set_progress(ProcessingStatus::Processing, 70).await;

        let mut thumbnail: Option<DerivedAsset> = None;
        if self.thumbnails.supports(&self.content_type) {
            match self
                .thumbnails
                .generate(&self.final_bucket, &self.storage_key, &self.content_type)
                .await
            {
                Ok(asset) => thumbnail = Some(asset),
                Err(err) => {
                    tracing::error!(error = %err, "thumbnail derivation failed");
                    self.remove_artifacts(None).await;
                    self.fail("thumbnail derivation failed").await;
                    return;
                }
            }
        }

        let fields = PromotionFields {
            final_storage_key: self.storage_key.clone(),
            final_bucket: self.final_bucket.clone(),
            thumbnail_key: thumbnail.as_ref().map(|t| t.thumbnail_key.clone()),
            thumbnail_url: thumbnail.as_ref().map(|t| t.thumbnail_url.clone()),
            thumbnail_source_url: thumbnail.as_ref().and_then(|t| t.source_url.clone()),
        };
        if let Err(err) = self
            .records
            .record_promotion(&self.upload_id, &self.owner, fields)
            .await
        {
            tracing::error!(error = %err, "failed to persist promotion fields");
            self.remove_artifacts(thumbnail.as_ref()).await;
            self.fail("promotion bookkeeping failed").await;
            return;
        }

        if let Err(err) = self
            .records
            .update_processing_status(
                &self.upload_id,
                &self.owner,
                ProcessingStatus::Processed,
                Some(100),
                None,
            )
            .await
        {
            // The record must never sit completed with ambiguous processing
            // state; pull the artifacts and fail it.
            tracing::error!(error = %err, "failed to mark processing finished");
            self.remove_artifacts(thumbnail.as_ref()).await;
            self.fail("promotion bookkeeping failed").await;
            return;
        }

        // The promoted copy is authoritative now. Losing this delete leaves
        // a harmless orphan in the temp bucket.
        if let Err(err) = self
            .store
            .delete_object(&self.temp_bucket, &self.storage_key)
            .await
        {
            tracing::warn!(error = %err, "failed to delete temp object after promotion");
        }

        tracing::info!("promotion finished");
    }

    /// Advisory progress update; failures are logged and do not stop the
    /// pipeline.
    async fn set_progress(&self, status: ProcessingStatus, progress: u8) {
        if let Err(err) = self
            .records
            .update_processing_status(&self.upload_id, &self.owner, status, Some(progress), None)
            .await
        {
            tracing::warn!(
                upload_id = %self.upload_id,
                error = %err,
                "failed to update processing progress"
            );
        }
    }

    /// Drive the record to its terminal failed state with a short operator
    /// reason.
    async fn fail(&self, reason: &str) {
        if let Err(err) = self
            .records
            .fail_promotion(&self.upload_id, &self.owner, reason)
            .await
        {
            tracing::error!(
                upload_id = %self.upload_id,
                error = %err,
                "failed to record promotion failure"
            );
        }
    }

    /// Best-effort removal of the promoted object and any derived
    /// thumbnail. Failures are logged and never mask the original error.
    async fn remove_artifacts(&self, thumbnail: Option<&DerivedAsset>) {
        if let Err(err) = self
            .store
            .delete_object(&self.final_bucket, &self.storage_key)
            .await
        {
            tracing::warn!(
                upload_id = %self.upload_id,
                key = %self.storage_key,
                error = %err,
                "failed to remove promoted object during cleanup"
            );
        }
        if let Some(asset) = thumbnail
            && let Err(err) = self
                .store
                .delete_object(&self.final_bucket, &asset.thumbnail_key)
                .await
        {
            tracing::warn!(
                upload_id = %self.upload_id,
                key = %asset.thumbnail_key,
                error = %err,
                "failed to remove thumbnail during cleanup"
            );
        }
    }
}
