//! Upload record repository.

use crate::error::MetadataResult;
use crate::models::NewUploadRecord;
use async_trait::async_trait;
use darkroom_core::{ProcessingStatus, UploadPart, UploadRecord};
use time::OffsetDateTime;

/// Terminal fields optionally set at completion time.
///
/// Normally empty: promotion-stage fields are recorded later through
/// [`UploadRepo::record_promotion`] once the background copy has run.
#[derive(Clone, Debug, Default)]
pub struct CompletionFields {
    pub final_storage_key: Option<String>,
    pub final_bucket: Option<String>,
    pub thumbnail_key: Option<String>,
    pub thumbnail_url: Option<String>,
    pub thumbnail_source_url: Option<String>,
}

/// Promotion-stage fields recorded after a successful temp-to-final copy.
#[derive(Clone, Debug)]
pub struct PromotionFields {
    pub final_storage_key: String,
    pub final_bucket: String,
    pub thumbnail_key: Option<String>,
    pub thumbnail_url: Option<String>,
    pub thumbnail_source_url: Option<String>,
}

/// Repository for upload record operations.
///
/// Every read and write is scoped by `(upload_id, owner)`; ownership is
/// enforced in the query itself, never by filtering after the fetch. State
/// transitions are guarded updates: a transition from a terminal state
/// fails with `InvalidStateTransition` instead of silently rewriting.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Create a new upload record in the active state.
    ///
    /// Synthesizes a `single-...` upload id when `new` carries none,
    /// which only single-part uploads may do. Returns the stored record.
    async fn create(&self, new: NewUploadRecord) -> MetadataResult<UploadRecord>;

    /// Get a record by upload id, with its parts loaded.
    async fn get_by_upload_id(
        &self,
        upload_id: &str,
        owner: &str,
    ) -> MetadataResult<Option<UploadRecord>>;

    /// Get a record by storage key, with its parts loaded. Picks the most
    /// recent record when several share a key.
    async fn get_by_storage_key(
        &self,
        storage_key: &str,
        owner: &str,
    ) -> MetadataResult<Option<UploadRecord>>;

    /// Record one acknowledged part, last-writer-wins on the part number.
    ///
    /// The merge is a single conditional statement, so concurrent
    /// acknowledgements of different parts cannot lose updates. Fails with
    /// `NotFound` if no active record matches.
    async fn upsert_part(
        &self,
        upload_id: &str,
        owner: &str,
        part: &UploadPart,
    ) -> MetadataResult<()>;

    /// Transition an active record to completed and stamp `completed_at`.
    /// Processing status moves to pending if it was never set.
    async fn mark_completed(
        &self,
        upload_id: &str,
        owner: &str,
        fields: CompletionFields,
    ) -> MetadataResult<()>;

    /// Transition an active record to aborted.
    async fn mark_aborted(&self, upload_id: &str, owner: &str) -> MetadataResult<()>;

    /// Transition an active record to failed, keeping the reason in the
    /// processing message when one is given.
    async fn mark_failed(
        &self,
        upload_id: &str,
        owner: &str,
        reason: Option<&str>,
    ) -> MetadataResult<()>;

    /// Record where promotion put the object. Only valid on a completed
    /// record.
    async fn record_promotion(
        &self,
        upload_id: &str,
        owner: &str,
        fields: PromotionFields,
    ) -> MetadataResult<()>;

    /// Transition an active or completed record to failed after a promotion
    /// failure, setting the processing stage to failed in the same statement.
    ///
    /// This is the one sanctioned completed-to-failed transition; every
    /// other path out of a terminal state is rejected.
    async fn fail_promotion(
        &self,
        upload_id: &str,
        owner: &str,
        reason: &str,
    ) -> MetadataResult<()>;

    /// Update the processing stage independently of the main status.
    /// Progress is clamped to 100.
    async fn update_processing_status(
        &self,
        upload_id: &str,
        owner: &str,
        status: ProcessingStatus,
        progress: Option<u8>,
        message: Option<&str>,
    ) -> MetadataResult<()>;

    /// List an owner's active records, most recent first, parts loaded.
    async fn list_active(&self, owner: &str) -> MetadataResult<Vec<UploadRecord>>;

    /// Count an owner's active records.
    async fn count_active(&self, owner: &str) -> MetadataResult<u64>;

    /// List active records created before `cutoff`, oldest first.
    /// Used to abort store-side multipart state before reaping.
    async fn list_stale(
        &self,
        cutoff: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadRecord>>;

    /// Bulk-transition active records created before `cutoff` to failed
    /// with reason "expired". Returns the number of records reaped.
    async fn reap_stale(&self, cutoff: OffsetDateTime) -> MetadataResult<u64>;
}
