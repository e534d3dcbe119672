//! In-memory storage backend for development and tests.
//!
//! Simulates the store-side half of the upload lifecycle: multipart uploads
//! accumulate parts under a store upload id, completion validates the part
//! list the way S3 does, and presign calls hand back synthetic `memory://`
//! URLs. Tests push bytes in through [`MemoryBackend::upload_part`] and
//! [`MemoryBackend::insert_object`] instead of driving HTTP.

use crate::error::{StorageError, StorageResult};
use crate::traits::{MultipartInit, ObjectStore, ensure_object_key, ensure_part_number};
use async_trait::async_trait;
use bytes::Bytes;
use darkroom_core::{PartEtag, storage_key};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::instrument;

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Objects keyed by (bucket, key).
    objects: HashMap<(String, String), StoredObject>,
    /// Live multipart uploads keyed by store upload id.
    uploads: HashMap<String, MultipartUploadState>,
    next_upload: u64,
    next_etag: u64,
}

#[derive(Clone, Debug)]
struct StoredObject {
    content_type: Option<String>,
    data: Bytes,
}

#[derive(Debug)]
struct MultipartUploadState {
    bucket: String,
    key: String,
    content_type: String,
    parts: BTreeMap<u32, MemoryPart>,
}

#[derive(Debug)]
struct MemoryPart {
    etag: String,
    data: Bytes,
}

fn validate_part_list(
    upload: &MultipartUploadState,
    bucket: &str,
    key: &str,
    parts: &[PartEtag],
) -> StorageResult<()> {
    if upload.bucket != bucket || upload.key != key {
        return Err(StorageError::UploadNotFound(format!(
            "upload does not belong to {bucket}/{key}"
        )));
    }
    if parts.is_empty() {
        return Err(StorageError::IncompletePartSet(
            "part list is empty".to_string(),
        ));
    }

    let mut previous = 0u32;
    for part in parts {
        if part.part_number <= previous {
            return Err(StorageError::IncompletePartSet(format!(
                "part {} is out of order",
                part.part_number
            )));
        }
        previous = part.part_number;

        let stored = upload.parts.get(&part.part_number).ok_or_else(|| {
            StorageError::IncompletePartSet(format!(
                "part {} was never uploaded",
                part.part_number
            ))
        })?;
        if stored.etag != part.etag {
            return Err(StorageError::IncompletePartSet(format!(
                "part {} etag does not match",
                part.part_number
            )));
        }
    }

    Ok(())
}

impl MemoryBackend {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, standing in for a client PUT against a
    /// presigned URL.
    pub async fn insert_object(&self, bucket: &str, key: &str, content_type: &str, data: Bytes) {
        let mut state = self.state.lock().await;
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                content_type: Some(content_type.to_string()),
                data,
            },
        );
    }

    /// Fetch an object's bytes.
    pub async fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.lock().await;
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.data.clone())
    }

    /// Fetch an object's content type.
    pub async fn object_content_type(&self, bucket: &str, key: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .and_then(|object| object.content_type.clone())
    }

    pub async fn object_exists(&self, bucket: &str, key: &str) -> bool {
        let state = self.state.lock().await;
        state
            .objects
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    /// Upload one part against a live multipart upload, standing in for a
    /// client PUT against a presigned part URL. Returns the part's etag.
    pub async fn upload_part(
        &self,
        store_upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        ensure_part_number(part_number)?;

        let mut state = self.state.lock().await;
        state.next_etag += 1;
        let etag = format!("mem-etag-{:x}", state.next_etag);

        let upload = state
            .uploads
            .get_mut(store_upload_id)
            .ok_or_else(|| StorageError::UploadNotFound(store_upload_id.to_string()))?;
        upload.parts.insert(
            part_number,
            MemoryPart {
                etag: etag.clone(),
                data,
            },
        );

        Ok(etag)
    }

    /// Whether a multipart upload is still live (not completed or aborted).
    pub async fn multipart_active(&self, store_upload_id: &str) -> bool {
        let state = self.state.lock().await;
        state.uploads.contains_key(store_upload_id)
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    #[instrument(skip(self), fields(backend = "memory"))]
    async fn begin_multipart(
        &self,
        bucket: &str,
        owner: &str,
        filename: &str,
        content_type: &str,
        total_size: u64,
    ) -> StorageResult<MultipartInit> {
        let key = storage_key(owner, filename, OffsetDateTime::now_utc());
        ensure_object_key(&key)?;

        let mut state = self.state.lock().await;
        state.next_upload += 1;
        let store_upload_id = format!("mem-upload-{}", state.next_upload);
        state.uploads.insert(
            store_upload_id.clone(),
            MultipartUploadState {
                bucket: bucket.to_string(),
                key: key.clone(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );

        tracing::debug!(bucket, key = %key, total_size, "created multipart upload");

        Ok(MultipartInit {
            store_upload_id,
            storage_key: key,
        })
    }

    // Presigning performs no store round trip, mirroring S3: the returned
    // URL is not checked against live uploads or existing objects.
    async fn presign_part_url(
        &self,
        bucket: &str,
        key: &str,
        store_upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String> {
        ensure_object_key(key)?;
        ensure_part_number(part_number)?;

        Ok(format!(
            "memory://{bucket}/{key}?uploadId={store_upload_id}&partNumber={part_number}&expires={}",
            expires_in.as_secs()
        ))
    }

    async fn presign_put_url(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        ensure_object_key(key)?;

        Ok(format!(
            "memory://{bucket}/{key}?contentType={content_type}&expires={}",
            expires_in.as_secs()
        ))
    }

    async fn presign_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        ensure_object_key(key)?;

        Ok(format!(
            "memory://{bucket}/{key}?expires={}",
            expires_in.as_secs()
        ))
    }

    #[instrument(skip(self, parts), fields(backend = "memory", part_count = parts.len()))]
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        store_upload_id: &str,
        parts: &[PartEtag],
    ) -> StorageResult<()> {
        ensure_object_key(key)?;

        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .remove(store_upload_id)
            .ok_or_else(|| StorageError::UploadNotFound(store_upload_id.to_string()))?;

        // A rejected completion leaves the upload live, as S3 does.
        if let Err(err) = validate_part_list(&upload, bucket, key, parts) {
            state.uploads.insert(store_upload_id.to_string(), upload);
            return Err(err);
        }

        let mut data = Vec::new();
        for part in parts {
            if let Some(stored) = upload.parts.get(&part.part_number) {
                data.extend_from_slice(&stored.data);
            }
        }
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                content_type: Some(upload.content_type),
                data: Bytes::from(data),
            },
        );

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        store_upload_id: &str,
    ) -> StorageResult<()> {
        ensure_object_key(key)?;

        let mut state = self.state.lock().await;
        state
            .uploads
            .remove(store_upload_id)
            .ok_or_else(|| StorageError::UploadNotFound(store_upload_id.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        ensure_object_key(src_key)?;
        ensure_object_key(dst_key)?;

        let mut state = self.state.lock().await;
        let object = state
            .objects
            .get(&(src_bucket.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{src_bucket}/{src_key}")))?;
        state
            .objects
            .insert((dst_bucket.to_string(), dst_key.to_string()), object);

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        ensure_object_key(key)?;

        // Deleting a missing object is not an error.
        let mut state = self.state.lock().await;
        state
            .objects
            .remove(&(bucket.to_string(), key.to_string()));

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
