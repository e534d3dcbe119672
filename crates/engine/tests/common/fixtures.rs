//! Harness wiring an engine over in-memory object storage and a temp SQLite
//! database.

use darkroom_core::upload::{
    AcknowledgePartRequest, CompleteUploadRequest, InitiateUploadRequest,
};
use darkroom_core::{PartEtag, UploadConfig};
use darkroom_engine::{ContentScanner, ThumbnailGenerator, UploadEngine};
use darkroom_metadata::SqliteStore;
use darkroom_storage::MemoryBackend;
use std::sync::Arc;
use tempfile::TempDir;

pub const OWNER: &str = "user-1";
pub const TEMP_BUCKET: &str = "media-temp";
pub const FINAL_BUCKET: &str = "media";

/// Large enough to cross the multipart threshold: two 5 MiB parts.
pub const MULTIPART_SIZE: u64 = 10 * 1024 * 1024;
/// Small enough for a single presigned PUT.
#[allow(dead_code)]
pub const SINGLE_SIZE: u64 = 1024 * 1024;

/// Engine plus handles to the stores it was built over. The temp dir keeps
/// the SQLite file alive for the duration of the test.
pub struct TestHarness {
    pub engine: UploadEngine,
    pub store: Arc<MemoryBackend>,
    pub records: Arc<SqliteStore>,
    _temp: TempDir,
}

/// Optional wiring overrides. `store` lets a test hand the same backend to a
/// mock (e.g. a thumbnailer that writes sidecars) and to the engine.
#[derive(Default)]
pub struct HarnessOptions {
    pub store: Option<Arc<MemoryBackend>>,
    pub config: Option<UploadConfig>,
    pub scanner: Option<Arc<dyn ContentScanner>>,
    pub thumbnails: Option<Arc<dyn ThumbnailGenerator>>,
}

pub async fn harness() -> TestHarness {
    harness_with(HarnessOptions::default()).await
}

pub async fn harness_with(options: HarnessOptions) -> TestHarness {
    let store = options
        .store
        .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
    let temp = tempfile::tempdir().unwrap();
    let records = Arc::new(
        SqliteStore::new(temp.path().join("uploads.db"), 5)
            .await
            .unwrap(),
    );

    let mut engine = UploadEngine::new(
        records.clone(),
        store.clone(),
        options.config.unwrap_or_default(),
    )
    .unwrap();
    if let Some(scanner) = options.scanner {
        engine = engine.with_scanner(scanner);
    }
    if let Some(thumbnails) = options.thumbnails {
        engine = engine.with_thumbnailer(thumbnails);
    }

    TestHarness {
        engine,
        store,
        records,
        _temp: temp,
    }
}

pub fn initiate_req(filename: &str, content_type: &str, total_size: u64) -> InitiateUploadRequest {
    InitiateUploadRequest {
        filename: filename.to_string(),
        content_type: content_type.to_string(),
        total_size,
        chunk_size: None,
    }
}

#[allow(dead_code)]
pub fn ack_req(part_number: u32, etag: &str, size: u64) -> AcknowledgePartRequest {
    AcknowledgePartRequest {
        part_number,
        etag: etag.to_string(),
        size,
    }
}

#[allow(dead_code)]
pub fn complete_req(parts: Vec<PartEtag>) -> CompleteUploadRequest {
    CompleteUploadRequest { parts: Some(parts) }
}

/// Rewrite a record's creation time so staleness paths can be exercised
/// without sleeping.
#[allow(dead_code)]
pub async fn backdate(records: &SqliteStore, upload_id: &str, age: time::Duration) {
    let when = time::OffsetDateTime::now_utc() - age;
    sqlx::query("UPDATE upload_records SET created_at = ?1 WHERE upload_id = ?2")
        .bind(when)
        .bind(upload_id)
        .execute(records.pool())
        .await
        .unwrap();
}

/// Backdate every record at once, for tests that age a whole backlog.
#[allow(dead_code)]
pub async fn backdate_all(records: &SqliteStore, age: time::Duration) {
    let when = time::OffsetDateTime::now_utc() - age;
    sqlx::query("UPDATE upload_records SET created_at = ?1")
        .bind(when)
        .execute(records.pool())
        .await
        .unwrap();
}
