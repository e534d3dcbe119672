//! The upload lifecycle manager.

use crate::error::{UploadError, UploadResult};
use crate::promote::Promotion;
use crate::scan::{ContentScanner, PassthroughScanner};
use crate::tasks::TaskRegistry;
use crate::thumbnail::{NoThumbnails, ThumbnailGenerator};
use darkroom_core::upload::{
    AcknowledgePartRequest, ActiveUploadSummary, CompleteUploadRequest, CompleteUploadResponse,
    InitiateUploadRequest, InitiateUploadResponse, UploadStatusResponse, UploadUrlResponse,
};
use darkroom_core::{
    MAX_PART_COUNT, UploadConfig, UploadKind, UploadPart, UploadRecord, single_upload_id,
    storage_key,
};
use darkroom_metadata::{CompletionFields, MetadataError, MetadataStore, NewUploadRecord};
use darkroom_storage::{ObjectStore, StorageError};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

/// Cap on identifiers accepted by one bulk status call.
pub const MAX_BULK_STATUS: usize = 100;

/// Listing page size for one reap iteration. Bounds how many records a reap
/// pass holds in memory at once, not how many it covers.
pub const REAP_BATCH: u32 = 1024;

/// Orchestrates the upload lifecycle: initiate, presigned part URLs, part
/// acknowledgement, completion, background promotion, abort, and the status
/// read side. Holds no per-upload state of its own; everything lives in the
/// record store, and operations for different uploads never contend.
pub struct UploadEngine {
    records: Arc<dyn MetadataStore>,
    store: Arc<dyn ObjectStore>,
    scanner: Arc<dyn ContentScanner>,
    thumbnails: Arc<dyn ThumbnailGenerator>,
    tasks: Arc<TaskRegistry>,
    config: UploadConfig,
}

impl UploadEngine {
    /// Build an engine over the given stores. Scanning defaults to
    /// pass-through and thumbnails to none; swap either with the `with_`
    /// builders.
    pub fn new(
        records: Arc<dyn MetadataStore>,
        store: Arc<dyn ObjectStore>,
        config: UploadConfig,
    ) -> UploadResult<Self> {
        config.validate()?;
        Ok(Self {
            records,
            store,
            scanner: Arc::new(PassthroughScanner),
            thumbnails: Arc::new(NoThumbnails),
            tasks: Arc::new(TaskRegistry::new()),
            config,
        })
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn ContentScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_thumbnailer(mut self, thumbnails: Arc<dyn ThumbnailGenerator>) -> Self {
        self.thumbnails = thumbnails;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Start an upload: classify single vs multipart, register store-side
    /// multipart state where needed, and persist the active record.
    #[tracing::instrument(skip(self, req), fields(owner = %owner, filename = %req.filename))]
    pub async fn initiate(
        &self,
        owner: &str,
        req: InitiateUploadRequest,
    ) -> UploadResult<InitiateUploadResponse> {
        if owner.trim().is_empty() {
            return Err(UploadError::Validation("owner must not be empty".to_string()));
        }
        let req = InitiateUploadRequest {
            chunk_size: Some(req.chunk_size.unwrap_or(self.config.default_chunk_size)),
            ..req
        };
        let plan = req.validate()?;

        let active = self.records.count_active(owner).await?;
        if active >= u64::from(self.config.max_active_per_owner) {
            return Err(UploadError::ActiveUploadLimit {
                limit: self.config.max_active_per_owner,
            });
        }

        let (upload_id, storage_key) = match plan.kind {
            UploadKind::Multipart => {
                let init = self
                    .store
                    .begin_multipart(
                        &self.config.temp_bucket,
                        owner,
                        &req.filename,
                        &req.content_type,
                        req.total_size,
                    )
                    .await?;
                (init.store_upload_id, init.storage_key)
            }
            UploadKind::Single => {
                // Single-part uploads never touch the store at initiation;
                // the id and key are synthesized from the same instant.
                let now = OffsetDateTime::now_utc();
                (single_upload_id(now), storage_key(owner, &req.filename, now))
            }
        };

        let new = NewUploadRecord {
            owner_id: owner.to_string(),
            upload_id: Some(upload_id.clone()),
            storage_key: storage_key.clone(),
            bucket: self.config.temp_bucket.clone(),
            filename: req.filename,
            content_type: req.content_type,
            total_size: req.total_size,
            kind: plan.kind,
        };

        let record = match self.records.create(new).await {
            Ok(record) => record,
            Err(err) => {
                // A registration failure leaks the store-side multipart
                // state unless it is aborted here.
                if plan.kind == UploadKind::Multipart
                    && let Err(abort_err) = self
                        .store
                        .abort_multipart(&self.config.temp_bucket, &storage_key, &upload_id)
                        .await
                {
                    tracing::warn!(
                        upload_id = %upload_id,
                        error = %abort_err,
                        "failed to abort store-side multipart after registration failure"
                    );
                }
                return Err(err.into());
            }
        };

        tracing::info!(
            upload_id = %record.upload_id,
            kind = record.kind.as_str(),
            total_size = record.total_size,
            "upload initiated"
        );

        Ok(InitiateUploadResponse {
            upload_id: record.upload_id,
            storage_key: record.storage_key,
            kind: record.kind,
            chunk_size: plan.chunk_size,
            total_chunks: plan.total_chunks,
        })
    }

    /// Presign the next transfer URL: one per part for multipart, one PUT
    /// for the whole object for single-part.
    #[tracing::instrument(skip(self), fields(owner = %owner, upload_id = %upload_id))]
    pub async fn upload_url(
        &self,
        owner: &str,
        upload_id: &str,
        part_number: Option<u32>,
    ) -> UploadResult<UploadUrlResponse> {
        let record = self.get_record(upload_id, owner).await?;
        ensure_active(&record)?;

        let ttl = self.config.url_ttl();
        let url = match record.kind {
            UploadKind::Multipart => {
                let part_number = part_number.ok_or_else(|| {
                    UploadError::Validation(
                        "part_number is required for multipart uploads".to_string(),
                    )
                })?;
                self.store
                    .presign_part_url(
                        &record.bucket,
                        &record.storage_key,
                        &record.upload_id,
                        part_number,
                        ttl,
                    )
                    .await?
            }
            UploadKind::Single => {
                if part_number.is_some() {
                    return Err(UploadError::Validation(
                        "single-part uploads take no part_number".to_string(),
                    ));
                }
                self.store
                    .presign_put_url(&record.bucket, &record.storage_key, &record.content_type, ttl)
                    .await?
            }
        };

        Ok(UploadUrlResponse {
            url,
            expires_in_secs: self.config.url_ttl_secs,
        })
    }

    /// Record one part's completion as reported by the client. The etag is
    /// trusted as-is; the store verified it when the part landed.
    #[tracing::instrument(
        skip(self, ack),
        fields(owner = %owner, upload_id = %upload_id, part_number = ack.part_number)
    )]
    pub async fn acknowledge_part(
        &self,
        owner: &str,
        upload_id: &str,
        ack: AcknowledgePartRequest,
    ) -> UploadResult<()> {
        let record = self.get_record(upload_id, owner).await?;
        ensure_active(&record)?;
        if record.kind != UploadKind::Multipart {
            return Err(UploadError::Validation(
                "single-part uploads have no parts to acknowledge".to_string(),
            ));
        }
        if ack.part_number == 0 || ack.part_number > MAX_PART_COUNT {
            return Err(darkroom_core::Error::InvalidPartNumber {
                number: ack.part_number,
                max: MAX_PART_COUNT,
            }
            .into());
        }
        if ack.etag.trim().is_empty() {
            return Err(UploadError::Validation("etag must not be empty".to_string()));
        }
        if ack.size == 0 || ack.size > record.total_size {
            return Err(UploadError::Validation(format!(
                "part size {} must be within the declared {}-byte upload",
                ack.size, record.total_size
            )));
        }

        let part = UploadPart {
            part_number: ack.part_number,
            etag: ack.etag,
            size: ack.size,
            uploaded_at: OffsetDateTime::now_utc(),
        };
        self.records
            .upsert_part(&record.upload_id, owner, &part)
            .await?;

        tracing::debug!(size = part.size, "part acknowledged");
        Ok(())
    }

    /// Finalize the transfer and submit background promotion. Returns as
    /// soon as the record transition and the task submission are done.
    #[tracing::instrument(skip(self, req), fields(owner = %owner, upload_id = %upload_id))]
    pub async fn complete(
        &self,
        owner: &str,
        upload_id: &str,
        req: CompleteUploadRequest,
    ) -> UploadResult<CompleteUploadResponse> {
        let record = self.get_record(upload_id, owner).await?;
        ensure_active(&record)?;

        match record.kind {
            UploadKind::Multipart => {
                let mut parts = req.parts.unwrap_or_default();
                if parts.is_empty() {
                    return Err(UploadError::Validation(
                        "parts are required to complete a multipart upload".to_string(),
                    ));
                }
                // The store rejects out-of-order part lists.
                parts.sort_by_key(|part| part.part_number);
                if let Err(err) = self
                    .store
                    .complete_multipart(
                        &record.bucket,
                        &record.storage_key,
                        &record.upload_id,
                        &parts,
                    )
                    .await
                {
                    // The terminal failed state is recorded, never silently
                    // swallowed; the caller still sees the original error.
                    let reason = match &err {
                        StorageError::IncompletePartSet(_) => "store rejected the part list",
                        _ => "store-side completion failed",
                    };
                    if let Err(mark_err) = self
                        .records
                        .mark_failed(&record.upload_id, owner, Some(reason))
                        .await
                    {
                        tracing::warn!(
                            error = %mark_err,
                            "failed to mark record failed after completion failure"
                        );
                    }
                    return Err(err.into());
                }
            }
            UploadKind::Single => {
                if req.parts.as_ref().is_some_and(|parts| !parts.is_empty()) {
                    return Err(UploadError::Validation(
                        "single-part uploads complete without parts".to_string(),
                    ));
                }
                // The object is already in place from the presigned PUT;
                // there is no store-side completion to run.
            }
        }

        self.records
            .mark_completed(&record.upload_id, owner, CompletionFields::default())
            .await?;
        tracing::info!(kind = record.kind.as_str(), "upload completed, promotion submitted");
        self.submit_promotion(owner, &record).await;

        Ok(CompleteUploadResponse {
            storage_key: record.storage_key,
            bucket: record.bucket,
            kind: record.kind,
        })
    }

    /// Abandon an active upload. Store-side multipart state is aborted
    /// best-effort; the record transition always proceeds.
    #[tracing::instrument(skip(self), fields(owner = %owner, upload_id = %upload_id))]
    pub async fn abort(&self, owner: &str, upload_id: &str) -> UploadResult<()> {
        let record = self.get_record(upload_id, owner).await?;
        ensure_active(&record)?;

        if record.kind == UploadKind::Multipart
            && let Err(err) = self
                .store
                .abort_multipart(&record.bucket, &record.storage_key, &record.upload_id)
                .await
        {
            tracing::warn!(error = %err, "store-side multipart abort failed");
        }

        self.records.mark_aborted(&record.upload_id, owner).await?;
        tracing::info!("upload aborted");
        Ok(())
    }

    /// Consolidated view for status pollers.
    pub async fn status(&self, owner: &str, upload_id: &str) -> UploadResult<UploadStatusResponse> {
        let record = self.get_record(upload_id, owner).await?;
        Ok(status_view(&record))
    }

    /// Status for up to [`MAX_BULK_STATUS`] uploads at once. Identifiers
    /// with no matching owned record are omitted from the map, never an
    /// error for the whole batch.
    pub async fn bulk_status(
        &self,
        owner: &str,
        upload_ids: &[String],
    ) -> UploadResult<HashMap<String, UploadStatusResponse>> {
        if upload_ids.len() > MAX_BULK_STATUS {
            return Err(UploadError::Validation(format!(
                "bulk status accepts at most {MAX_BULK_STATUS} upload ids"
            )));
        }
        let mut statuses = HashMap::with_capacity(upload_ids.len());
        for upload_id in upload_ids {
            if let Some(record) = self.records.get_by_upload_id(upload_id, owner).await? {
                statuses.insert(upload_id.clone(), status_view(&record));
            }
        }
        Ok(statuses)
    }

    /// The owner's in-progress uploads with computed transfer progress.
    pub async fn list_active(&self, owner: &str) -> UploadResult<Vec<ActiveUploadSummary>> {
        let records = self.records.list_active(owner).await?;
        Ok(records.iter().map(active_summary).collect())
    }

    /// Presign a GET for the finalized object. Only ready records qualify.
    #[tracing::instrument(skip(self), fields(owner = %owner, upload_id = %upload_id))]
    pub async fn download_url(
        &self,
        owner: &str,
        upload_id: &str,
        ttl: Option<std::time::Duration>,
    ) -> UploadResult<UploadUrlResponse> {
        let record = self.get_record(upload_id, owner).await?;
        if !record.ready_for_display() {
            return Err(UploadError::Validation(format!(
                "upload {upload_id} is not ready for download"
            )));
        }
        let key = record.final_storage_key.as_deref().ok_or_else(|| {
            UploadError::Validation(format!("upload {upload_id} has no finalized object"))
        })?;
        let bucket = record
            .final_bucket
            .as_deref()
            .unwrap_or(&self.config.final_bucket);

        let ttl = ttl.unwrap_or_else(|| self.config.url_ttl());
        let url = self.store.presign_get_url(bucket, key, ttl).await?;
        Ok(UploadUrlResponse {
            url,
            expires_in_secs: ttl.as_secs(),
        })
    }

    /// Fail active records older than `max_age` (the configured stale age
    /// when not given), aborting their store-side multipart state first.
    /// Walks the backlog in `REAP_BATCH`-sized listings until it is empty,
    /// so every stale record gets its abort attempt before turning terminal.
    /// Returns the number of records reaped.
    #[tracing::instrument(skip(self, max_age))]
    pub async fn reap_stale(&self, max_age: Option<time::Duration>) -> UploadResult<u64> {
        let max_age = max_age.unwrap_or_else(|| self.config.stale_after());
        let cutoff = OffsetDateTime::now_utc() - max_age;

        let mut reaped = 0u64;
        loop {
            let stale = self.records.list_stale(cutoff, REAP_BATCH).await?;
            for record in &stale {
                if record.kind == UploadKind::Multipart
                    && let Err(err) = self
                        .store
                        .abort_multipart(&record.bucket, &record.storage_key, &record.upload_id)
                        .await
                {
                    tracing::warn!(
                        upload_id = %record.upload_id,
                        error = %err,
                        "store-side abort failed during reap"
                    );
                }
            }

            if (stale.len() as u32) < REAP_BATCH {
                // Final page: one bulk transition covers it, since every
                // earlier page was already failed record by record.
                reaped += self.records.reap_stale(cutoff).await?;
                break;
            }

            // Full page: fail the listed records now so the next listing
            // advances past them. A record that turned terminal since the
            // listing is no longer stale and is skipped.
            for record in &stale {
                match self
                    .records
                    .mark_failed(&record.upload_id, &record.owner_id, Some("expired"))
                    .await
                {
                    Ok(()) => reaped += 1,
                    Err(
                        MetadataError::InvalidStateTransition { .. } | MetadataError::NotFound(_),
                    ) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        if reaped > 0 {
            tracing::info!(reaped, "reaped stale uploads");
        }
        Ok(reaped)
    }

    /// Await one upload's background promotion, if any is in flight.
    pub async fn wait_for_processing(&self, upload_id: &str) {
        self.tasks.wait(upload_id).await;
    }

    /// Await every in-flight promotion. For shutdown paths.
    pub async fn drain(&self) {
        self.tasks.drain().await;
    }

    /// Check both stores.
    pub async fn health_check(&self) -> UploadResult<()> {
        self.records.health_check().await?;
        self.store.health_check(&self.config.temp_bucket).await?;
        Ok(())
    }

    async fn get_record(&self, upload_id: &str, owner: &str) -> UploadResult<UploadRecord> {
        self.records
            .get_by_upload_id(upload_id, owner)
            .await?
            .ok_or_else(|| UploadError::RecordNotFound(format!("upload {upload_id}")))
    }

    async fn submit_promotion(&self, owner: &str, record: &UploadRecord) {
        let promotion = Promotion {
            records: self.records.clone(),
            store: self.store.clone(),
            scanner: self.scanner.clone(),
            thumbnails: self.thumbnails.clone(),
            tasks: self.tasks.clone(),
            owner: owner.to_string(),
            upload_id: record.upload_id.clone(),
            temp_bucket: record.bucket.clone(),
            final_bucket: self.config.final_bucket.clone(),
            storage_key: record.storage_key.clone(),
            content_type: record.content_type.clone(),
        };
        let upload_id = record.upload_id.clone();
        let handle = tokio::spawn(promotion.run());
        self.tasks.register(&upload_id, handle).await;
    }
}

fn ensure_active(record: &UploadRecord) -> UploadResult<()> {
    if record.status.is_active() {
        Ok(())
    } else {
        Err(UploadError::NotActive(record.status.as_str().to_string()))
    }
}

fn status_view(record: &UploadRecord) -> UploadStatusResponse {
    UploadStatusResponse {
        upload_id: record.upload_id.clone(),
        status: record.status,
        processing_status: record.processing_status,
        processing_progress: record.processing_progress,
        processing_message: record.processing_message.clone(),
        ready_for_display: record.ready_for_display(),
    }
}

fn active_summary(record: &UploadRecord) -> ActiveUploadSummary {
    ActiveUploadSummary {
        upload_id: record.upload_id.clone(),
        storage_key: record.storage_key.clone(),
        filename: record.filename.clone(),
        content_type: record.content_type.clone(),
        kind: record.kind,
        total_size: record.total_size,
        received_bytes: record.received_bytes(),
        received_parts: record.parts.len() as u32,
        percent: record.transfer_progress(),
        created_at: record.created_at,
    }
}
