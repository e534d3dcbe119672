//! Integration tests for the SQLite record store: part merging, state
//! transition guards, ownership scoping, and staleness queries.

use darkroom_core::{ProcessingStatus, UploadKind, UploadPart, UploadStatus};
use darkroom_metadata::{
    CompletionFields, MetadataError, NewUploadRecord, PromotionFields, SqliteStore, UploadRepo,
};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;

async fn open_store() -> (SqliteStore, TempDir) {
    let temp = tempfile::tempdir().unwrap();
    let store = SqliteStore::new(temp.path().join("uploads.db"), 5)
        .await
        .unwrap();
    (store, temp)
}

fn multipart_spec(owner: &str, upload_id: &str, filename: &str) -> NewUploadRecord {
    NewUploadRecord {
        owner_id: owner.to_string(),
        upload_id: Some(upload_id.to_string()),
        storage_key: format!("{owner}/1700000000000-{filename}"),
        bucket: "media-temp".to_string(),
        filename: filename.to_string(),
        content_type: "video/mp4".to_string(),
        total_size: 10 * 1024 * 1024,
        kind: UploadKind::Multipart,
    }
}

fn part(number: u32, etag: &str, size: u64) -> UploadPart {
    UploadPart {
        part_number: number,
        etag: etag.to_string(),
        size,
        uploaded_at: OffsetDateTime::now_utc(),
    }
}

async fn backdate(store: &SqliteStore, upload_id: &str, age: time::Duration) {
    let when = OffsetDateTime::now_utc() - age;
    sqlx::query("UPDATE upload_records SET created_at = ?1 WHERE upload_id = ?2")
        .bind(when)
        .bind(upload_id)
        .execute(store.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn upsert_part_is_last_writer_wins() {
    let (store, _temp) = open_store().await;
    store
        .create(multipart_spec("user-1", "mp-1", "movie.mp4"))
        .await
        .unwrap();

    store
        .upsert_part("mp-1", "user-1", &part(1, "etag-a", 100))
        .await
        .unwrap();
    store
        .upsert_part("mp-1", "user-1", &part(2, "etag-b", 200))
        .await
        .unwrap();
    store
        .upsert_part("mp-1", "user-1", &part(1, "etag-c", 300))
        .await
        .unwrap();

    let record = store
        .get_by_upload_id("mp-1", "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.parts.len(), 2);
    assert_eq!(record.parts[0].part_number, 1);
    assert_eq!(record.parts[0].etag, "etag-c");
    assert_eq!(record.parts[0].size, 300);
    assert_eq!(record.parts[1].part_number, 2);
    assert_eq!(record.received_bytes(), 500);
}

#[tokio::test]
async fn concurrent_part_acknowledgements_all_land() {
    let (store, _temp) = open_store().await;
    let store = Arc::new(store);
    store
        .create(multipart_spec("user-1", "mp-1", "movie.mp4"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for number in 1..=10u32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let part = part(number, &format!("etag-{number}"), 1024);
            store.upsert_part("mp-1", "user-1", &part).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let record = store
        .get_by_upload_id("mp-1", "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.parts.len(), 10);
    let numbers: Vec<u32> = record.parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, (1..=10).collect::<Vec<u32>>());
}

#[tokio::test]
async fn terminal_states_reject_lifecycle_transitions() {
    let (store, _temp) = open_store().await;
    store
        .create(multipart_spec("user-1", "mp-1", "movie.mp4"))
        .await
        .unwrap();
    store
        .mark_completed("mp-1", "user-1", CompletionFields::default())
        .await
        .unwrap();

    let err = store.mark_aborted("mp-1", "user-1").await.unwrap_err();
    match err {
        MetadataError::InvalidStateTransition { from, to } => {
            assert_eq!(from, "completed");
            assert_eq!(to, "aborted");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = store
        .mark_completed("mp-1", "user-1", CompletionFields::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::InvalidStateTransition { .. }));

    // Part acknowledgements only merge into active records.
    let err = store
        .upsert_part("mp-1", "user-1", &part(1, "etag", 100))
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::NotFound(_)));

    let record = store
        .get_by_upload_id("mp-1", "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, UploadStatus::Completed);
    assert!(record.completed_at.is_some());
    assert_eq!(record.processing_status, Some(ProcessingStatus::Pending));
}

#[tokio::test]
async fn fail_promotion_is_the_only_exit_from_completed() {
    let (store, _temp) = open_store().await;
    store
        .create(multipart_spec("user-1", "mp-1", "movie.mp4"))
        .await
        .unwrap();
    store
        .mark_completed("mp-1", "user-1", CompletionFields::default())
        .await
        .unwrap();

    store
        .fail_promotion("mp-1", "user-1", "content rejected: flagged")
        .await
        .unwrap();

    let record = store
        .get_by_upload_id("mp-1", "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, UploadStatus::Failed);
    assert_eq!(record.processing_status, Some(ProcessingStatus::Failed));
    assert_eq!(
        record.processing_message.as_deref(),
        Some("content rejected: flagged")
    );

    // Failed is terminal even for fail_promotion.
    let err = store
        .fail_promotion("mp-1", "user-1", "again")
        .await
        .unwrap_err();
    match err {
        MetadataError::InvalidStateTransition { from, .. } => assert_eq!(from, "failed"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn record_promotion_persists_final_location() {
    let (store, _temp) = open_store().await;
    store
        .create(multipart_spec("user-1", "mp-1", "movie.mp4"))
        .await
        .unwrap();

    // Promotion results only attach to completed records.
    let fields = PromotionFields {
        final_storage_key: "user-1/1700000000000-movie.mp4".to_string(),
        final_bucket: "media".to_string(),
        thumbnail_key: Some("user-1/1700000000000-movie.mp4.thumb.jpg".to_string()),
        thumbnail_url: Some("https://cdn.example/movie.thumb.jpg".to_string()),
        thumbnail_source_url: None,
    };
    let err = store
        .record_promotion("mp-1", "user-1", fields.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::InvalidStateTransition { .. }));

    store
        .mark_completed("mp-1", "user-1", CompletionFields::default())
        .await
        .unwrap();
    store
        .record_promotion("mp-1", "user-1", fields)
        .await
        .unwrap();
    store
        .update_processing_status("mp-1", "user-1", ProcessingStatus::Processed, Some(100), None)
        .await
        .unwrap();

    let record = store
        .get_by_upload_id("mp-1", "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.final_bucket.as_deref(), Some("media"));
    assert!(record.thumbnail_key.is_some());
    assert!(record.ready_for_display());
}

#[tokio::test]
async fn ownership_scopes_every_lookup() {
    let (store, _temp) = open_store().await;
    store
        .create(multipart_spec("user-1", "mp-1", "movie.mp4"))
        .await
        .unwrap();

    assert!(
        store
            .get_by_upload_id("mp-1", "user-2")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        store
            .get_by_storage_key("user-1/1700000000000-movie.mp4", "user-2")
            .await
            .unwrap()
            .is_none()
    );

    // A transition attempt by the wrong owner reads as a missing record,
    // not as a state error.
    let err = store.mark_aborted("mp-1", "user-2").await.unwrap_err();
    assert!(matches!(err, MetadataError::NotFound(_)));

    let record = store
        .get_by_storage_key("user-1/1700000000000-movie.mp4", "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.upload_id, "mp-1");
    assert_eq!(record.status, UploadStatus::Active);
}

#[tokio::test]
async fn processing_progress_clamps_and_message_sticks() {
    let (store, _temp) = open_store().await;
    store
        .create(multipart_spec("user-1", "mp-1", "movie.mp4"))
        .await
        .unwrap();

    store
        .update_processing_status(
            "mp-1",
            "user-1",
            ProcessingStatus::Processing,
            Some(200),
            Some("transcoding"),
        )
        .await
        .unwrap();
    let record = store
        .get_by_upload_id("mp-1", "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.processing_progress, 100);
    assert_eq!(record.processing_message.as_deref(), Some("transcoding"));

    // None leaves the previous progress and message in place.
    store
        .update_processing_status("mp-1", "user-1", ProcessingStatus::Processing, None, None)
        .await
        .unwrap();
    let record = store
        .get_by_upload_id("mp-1", "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.processing_progress, 100);
    assert_eq!(record.processing_message.as_deref(), Some("transcoding"));

    let err = store
        .update_processing_status("missing", "user-1", ProcessingStatus::Pending, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::NotFound(_)));
}

#[tokio::test]
async fn active_listing_counts_and_ordering() {
    let (store, _temp) = open_store().await;
    store
        .create(multipart_spec("user-1", "mp-1", "first.mp4"))
        .await
        .unwrap();
    store
        .create(multipart_spec("user-1", "mp-2", "second.mp4"))
        .await
        .unwrap();
    store
        .create(multipart_spec("user-2", "mp-3", "other.mp4"))
        .await
        .unwrap();

    assert_eq!(store.count_active("user-1").await.unwrap(), 2);

    let active = store.list_active("user-1").await.unwrap();
    let ids: Vec<&str> = active.iter().map(|r| r.upload_id.as_str()).collect();
    assert_eq!(ids, vec!["mp-2", "mp-1"], "most recent first");

    store.mark_aborted("mp-1", "user-1").await.unwrap();
    assert_eq!(store.count_active("user-1").await.unwrap(), 1);
    assert_eq!(store.list_active("user-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn stale_queries_only_see_old_active_records() {
    let (store, _temp) = open_store().await;
    store
        .create(multipart_spec("user-1", "mp-old", "old.mp4"))
        .await
        .unwrap();
    store
        .create(multipart_spec("user-1", "mp-done", "done.mp4"))
        .await
        .unwrap();
    store
        .create(multipart_spec("user-1", "mp-fresh", "fresh.mp4"))
        .await
        .unwrap();

    backdate(&store, "mp-old", time::Duration::hours(3)).await;
    backdate(&store, "mp-done", time::Duration::hours(3)).await;
    store
        .mark_completed("mp-done", "user-1", CompletionFields::default())
        .await
        .unwrap();

    let cutoff = OffsetDateTime::now_utc() - time::Duration::hours(1);
    let stale = store.list_stale(cutoff, 100).await.unwrap();
    let ids: Vec<&str> = stale.iter().map(|r| r.upload_id.as_str()).collect();
    assert_eq!(ids, vec!["mp-old"], "terminal and fresh records excluded");

    assert_eq!(store.reap_stale(cutoff).await.unwrap(), 1);

    let record = store
        .get_by_upload_id("mp-old", "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, UploadStatus::Failed);
    assert_eq!(record.processing_message.as_deref(), Some("expired"));

    // Second sweep finds nothing left to reap.
    assert_eq!(store.reap_stale(cutoff).await.unwrap(), 0);
    assert!(store.list_stale(cutoff, 100).await.unwrap().is_empty());

    // The completed record kept its state.
    let record = store
        .get_by_upload_id("mp-done", "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, UploadStatus::Completed);
}
