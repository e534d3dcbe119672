//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use darkroom_core::{MAX_PART_COUNT, PartEtag};
use std::time::Duration;

/// Maximum object key length in bytes, matching the S3 key limit.
pub const MAX_KEY_LEN: usize = 1024;

/// Result of starting a store-side multipart upload.
///
/// The store owns both identifiers: `store_upload_id` is the handle parts are
/// uploaded against, and `storage_key` is where the assembled object lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartInit {
    /// Store-side multipart upload identifier.
    pub store_upload_id: String,
    /// Derived object key in the temp bucket.
    pub storage_key: String,
}

/// Object store abstraction over S3-compatible and in-memory backends.
///
/// All operations are bucket-scoped per call; a backend holds connection
/// state only. Clients transfer bytes directly to the store through
/// presigned URLs, so there is no `put` on this trait.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Start a multipart upload, deriving the object key from the owner,
    /// the filename, and the current time.
    async fn begin_multipart(
        &self,
        bucket: &str,
        owner: &str,
        filename: &str,
        content_type: &str,
        total_size: u64,
    ) -> StorageResult<MultipartInit>;

    /// Presign an upload URL for one part of a multipart upload.
    ///
    /// `part_number` must be within 1..=10000. Presigning is local signing;
    /// the store does not verify that `store_upload_id` is still live.
    async fn presign_part_url(
        &self,
        bucket: &str,
        key: &str,
        store_upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Presign a single-shot PUT URL. The content type is bound into the
    /// signature, so the client request must carry the same value.
    async fn presign_put_url(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Presign a GET URL for downloading an object.
    async fn presign_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Complete a multipart upload from the given part list.
    ///
    /// Parts must be in ascending part-number order and every listed part
    /// must have been uploaded with a matching etag, otherwise the store
    /// rejects the completion with [`StorageError::IncompletePartSet`].
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        store_upload_id: &str,
        parts: &[PartEtag],
    ) -> StorageResult<()>;

    /// Abort a multipart upload, discarding any uploaded parts.
    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        store_upload_id: &str,
    ) -> StorageResult<()>;

    /// Copy an object across buckets. The source must exist.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g. "s3",
    /// "memory"). Used for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify backend connectivity against the given bucket.
    ///
    /// The default implementation reports healthy without probing, suitable
    /// for in-process backends.
    async fn health_check(&self, _bucket: &str) -> StorageResult<()> {
        Ok(())
    }
}

/// Validate an object key before handing it to a backend.
pub(crate) fn ensure_object_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey(format!(
            "key exceeds {MAX_KEY_LEN} bytes"
        )));
    }
    if key.starts_with('/') {
        return Err(StorageError::InvalidKey(format!(
            "key must not start with '/': {key}"
        )));
    }
    Ok(())
}

/// Validate a part number against the store's 1..=10000 range.
pub(crate) fn ensure_part_number(number: u32) -> StorageResult<()> {
    if number == 0 || number > MAX_PART_COUNT {
        return Err(StorageError::InvalidPartNumber {
            number,
            max: MAX_PART_COUNT,
        });
    }
    Ok(())
}
