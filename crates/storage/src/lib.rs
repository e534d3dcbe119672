//! Object storage abstraction and backends for darkroom.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait: multipart lifecycle, presigned transfer URLs,
//!   cross-bucket copy, and idempotent delete
//! - Backends: S3-compatible and in-memory

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{memory::MemoryBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{MAX_KEY_LEN, MultipartInit, ObjectStore};

use darkroom_core::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config
        .validate()
        .map_err(|err| StorageError::Config(err.to_string()))?;

    match config {
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
        StorageConfig::S3 {
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                endpoint.clone(),
                region.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
