//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{MultipartInit, ObjectStore, ensure_object_key, ensure_part_number};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use darkroom_core::{PartEtag, storage_key};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::S3(Box::new(err))
}

/// Convert an AWS SDK error to StorageError, mapping 404 responses to NotFound.
fn map_not_found<E>(err: aws_sdk_s3::error::SdkError<E>, target: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err {
        let raw = service_err.raw();
        if raw.status().as_u16() == 404 {
            return StorageError::NotFound(target.to_string());
        }
    }
    map_s3_operation_error(err)
}

/// Convert multipart lifecycle errors, surfacing the store's part-set and
/// unknown-upload rejections as typed errors.
fn map_multipart_error<E>(err: aws_sdk_s3::error::SdkError<E>, upload_id: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err {
        match service_err.err().code() {
            Some("NoSuchUpload") => {
                return StorageError::UploadNotFound(upload_id.to_string());
            }
            Some("InvalidPart") | Some("InvalidPartOrder") => {
                return StorageError::IncompletePartSet(
                    "store rejected the supplied part list".to_string(),
                );
            }
            _ => {}
        }
    }
    map_s3_operation_error(err)
}

fn presigning_config(expires_in: Duration) -> StorageResult<PresigningConfig> {
    PresigningConfig::expires_in(expires_in)
        .map_err(|err| StorageError::Config(format!("invalid presign expiry: {err}")))
}

/// S3-compatible object store using AWS SDK.
pub struct S3Backend {
    client: Client,
    /// Stored endpoint for backend identity (normalized).
    endpoint: String,
    /// Stored region for backend identity.
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// # Arguments
    /// * `force_path_style` - Use path-style URLs (`endpoint/bucket/key`) instead of
    ///   virtual-hosted style (`bucket.endpoint/key`). Required for MinIO and some
    ///   S3-compatible services. AWS S3 itself requires virtual-hosted style (false).
    pub async fn new(
        endpoint: Option<String>,
        region: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        let has_access_key_id = access_key_id.is_some();
        let has_secret_access_key = secret_access_key.is_some();
        if has_access_key_id ^ has_secret_access_key {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        // Apply credentials: explicit config or ambient AWS credential chain
        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials = aws_sdk_s3::config::Credentials::new(
                key_id,
                secret,
                None, // session token
                None, // expiration
                "darkroom-config",
            );
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            let chain = aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                .region(aws_config::Region::new(resolved_region.clone()))
                .build()
                .await;
            s3_config_builder = s3_config_builder.credentials_provider(chain);
        }

        let normalized_endpoint = endpoint.as_ref().map(|endpoint_url| {
            // Handle bare host:port endpoints (e.g., "minio:9000") by prepending http://
            let endpoint_lower = endpoint_url.to_lowercase();
            if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
                endpoint_url.clone()
            } else {
                format!("http://{}", endpoint_url)
            }
        });

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);

            // For explicit HTTP endpoints (e.g. local MinIO), use an HTTP-only client
            // so SDK initialization doesn't depend on native trust roots.
            if endpoint_url.to_ascii_lowercase().starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        // Store endpoint for backend identity. If no explicit endpoint was
        // provided, use the canonical AWS S3 endpoint for the region.
        let stored_endpoint = match &normalized_endpoint {
            Some(url) => url.clone(),
            None => format!("s3.{}.amazonaws.com", resolved_region),
        };

        Ok(Self {
            client,
            endpoint: stored_endpoint,
            region: resolved_region,
        })
    }

    /// Normalized endpoint this backend talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Region this backend signs requests for.
    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
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

        let create_output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(&key)
            .content_type(content_type)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let store_upload_id = create_output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return an upload id".to_string()))?
            .to_string();

        tracing::debug!(bucket, key = %key, total_size, "created multipart upload");

        Ok(MultipartInit {
            store_upload_id,
            storage_key: key,
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
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

        let presigned = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(store_upload_id)
            .part_number(part_number as i32)
            .presigned(presigning_config(expires_in)?)
            .await
            .map_err(map_s3_operation_error)?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn presign_put_url(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        ensure_object_key(key)?;

        let presigned = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config(expires_in)?)
            .await
            .map_err(map_s3_operation_error)?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn presign_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        ensure_object_key(key)?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config(expires_in)?)
            .await
            .map_err(map_s3_operation_error)?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self, parts), fields(backend = "s3", part_count = parts.len()))]
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        store_upload_id: &str,
        parts: &[PartEtag],
    ) -> StorageResult<()> {
        ensure_object_key(key)?;
        if parts.is_empty() {
            return Err(StorageError::IncompletePartSet(
                "part list is empty".to_string(),
            ));
        }

        let completed_parts: Vec<CompletedPart> = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .e_tag(&part.etag)
                    .part_number(part.part_number as i32)
                    .build()
            })
            .collect();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(store_upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|err| map_multipart_error(err, store_upload_id))?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        store_upload_id: &str,
    ) -> StorageResult<()> {
        ensure_object_key(key)?;

        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(store_upload_id)
            .send()
            .await
            .map_err(|err| map_multipart_error(err, store_upload_id))?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        ensure_object_key(src_key)?;
        ensure_object_key(dst_key)?;

        // CopySource format: bucket/key
        // The key portion must be URL-encoded for special characters (spaces, unicode, etc.)
        // We encode the key but not the bucket name or the slash separator
        let encoded_key = utf8_percent_encode(src_key, NON_ALPHANUMERIC).to_string();
        let copy_source = format!("{}/{}", src_bucket, encoded_key);

        self.client
            .copy_object()
            .bucket(dst_bucket)
            .key(dst_key)
            .copy_source(&copy_source)
            .send()
            .await
            .map_err(|err| map_not_found(err, &format!("{src_bucket}/{src_key}")))?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        ensure_object_key(key)?;

        // S3 delete_object succeeds on missing keys, which matches the
        // idempotent delete contract of this trait.
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| map_not_found(err, bucket))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_backend() -> S3Backend {
        S3Backend::new(
            Some("127.0.0.1:9000".to_string()),
            Some("us-east-1".to_string()),
            Some("access".to_string()),
            Some("secret".to_string()),
            true,
        )
        .await
        .expect("backend should construct for unit tests")
    }

    #[tokio::test]
    async fn new_requires_complete_credentials() {
        let err = S3Backend::new(
            None,
            Some("us-east-1".to_string()),
            Some("access".to_string()),
            None,
            false,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Config(_)));
    }

    #[tokio::test]
    async fn new_normalizes_bare_endpoint() {
        let backend = make_backend().await;
        assert_eq!(backend.endpoint(), "http://127.0.0.1:9000");
        assert_eq!(backend.region(), "us-east-1");
    }

    #[tokio::test]
    async fn new_defaults_endpoint_to_aws() {
        let backend = S3Backend::new(
            None,
            Some("eu-west-1".to_string()),
            Some("access".to_string()),
            Some("secret".to_string()),
            false,
        )
        .await
        .unwrap();

        assert_eq!(backend.endpoint(), "s3.eu-west-1.amazonaws.com");
    }

    // Presigning is pure local signing with static credentials, so these
    // tests run without a live endpoint.

    #[tokio::test]
    async fn presigned_part_url_carries_upload_parameters() {
        let backend = make_backend().await;
        let url = backend
            .presign_part_url(
                "media-temp",
                "alice/1714521600000-cat.png",
                "upload-123",
                3,
                Duration::from_secs(900),
            )
            .await
            .unwrap();

        assert!(url.starts_with("http://127.0.0.1:9000/media-temp/alice/1714521600000-cat.png?"));
        assert!(url.contains("partNumber=3"));
        assert!(url.contains("uploadId=upload-123"));
        assert!(url.contains("X-Amz-Expires=900"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn presigned_get_url_carries_expiry() {
        let backend = make_backend().await;
        let url = backend
            .presign_get_url("media", "alice/1714521600000-cat.png", Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(url.starts_with("http://127.0.0.1:9000/media/alice/1714521600000-cat.png?"));
        assert!(url.contains("X-Amz-Expires=3600"));
    }

    #[tokio::test]
    async fn presign_part_rejects_out_of_range_part_numbers() {
        let backend = make_backend().await;
        for number in [0u32, 10_001] {
            let err = backend
                .presign_part_url("media-temp", "k", "upload-123", number, Duration::from_secs(60))
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidPartNumber { .. }));
        }
    }

    #[tokio::test]
    async fn presign_rejects_week_plus_expiry() {
        let backend = make_backend().await;
        let err = backend
            .presign_get_url("media", "k", Duration::from_secs(8 * 24 * 3600))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Config(_)));
    }

    #[tokio::test]
    async fn complete_rejects_empty_part_list() {
        let backend = make_backend().await;
        let err = backend
            .complete_multipart("media-temp", "k", "upload-123", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::IncompletePartSet(_)));
    }
}
