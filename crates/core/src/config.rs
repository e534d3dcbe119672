//! Configuration types shared across crates.

use crate::{DEFAULT_PART_SIZE, DEFAULT_URL_TTL_SECS, MIN_PART_SIZE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Object store backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process store for development and tests.
    Memory,
    /// S3-compatible store.
    S3 {
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// Region; defaults to us-east-1 when not set.
        region: Option<String>,
        /// Access key ID. Falls back to the ambient credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// Secret access key. Falls back to the ambient credential chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key` instead of
        /// `bucket.endpoint/key`). Required for MinIO and some S3-compatible
        /// services; AWS S3 itself wants virtual-hosted style (false).
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(crate::Error::Config(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                )),
            },
            StorageConfig::Memory => Ok(()),
        }
    }
}

/// Upload record store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// How long a writer waits on a locked database before erroring.
        #[serde(default = "default_busy_timeout_secs")]
        busy_timeout_secs: u64,
    },
}

fn default_busy_timeout_secs() -> u64 {
    5
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/uploads.db"),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            MetadataConfig::Sqlite { path, .. } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::Config(
                        "sqlite config requires a non-empty path".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Upload lifecycle configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Bucket uploads land in before promotion.
    #[serde(default = "default_temp_bucket")]
    pub temp_bucket: String,
    /// Bucket promoted objects live in.
    #[serde(default = "default_final_bucket")]
    pub final_bucket: String,
    /// Default part size in bytes for multipart uploads.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: u64,
    /// Presigned URL lifetime in seconds.
    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u64,
    /// Age after which an abandoned active upload is reaped, in seconds.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Cap on concurrently active uploads per owner.
    #[serde(default = "default_max_active_per_owner")]
    pub max_active_per_owner: u32,
}

fn default_temp_bucket() -> String {
    "media-temp".to_string()
}

fn default_final_bucket() -> String {
    "media".to_string()
}

fn default_chunk_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_url_ttl_secs() -> u64 {
    DEFAULT_URL_TTL_SECS
}

fn default_stale_after_secs() -> u64 {
    86400 // 24 hours
}

fn default_max_active_per_owner() -> u32 {
    16
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_bucket: default_temp_bucket(),
            final_bucket: default_final_bucket(),
            default_chunk_size: default_chunk_size(),
            url_ttl_secs: default_url_ttl_secs(),
            stale_after_secs: default_stale_after_secs(),
            max_active_per_owner: default_max_active_per_owner(),
        }
    }
}

impl UploadConfig {
    /// Get the presigned URL lifetime as a Duration.
    pub fn url_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.url_ttl_secs)
    }

    /// Get the stale age as a Duration.
    pub fn stale_after(&self) -> time::Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.stale_after_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    /// Validate upload configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        if self.temp_bucket.is_empty() || self.final_bucket.is_empty() {
            return Err(crate::Error::Config(
                "temp_bucket and final_bucket must be set".to_string(),
            ));
        }
        if self.temp_bucket == self.final_bucket {
            // Promotion deletes the temp object after copying; a shared
            // bucket would delete the object it just promoted.
            return Err(crate::Error::Config(
                "temp_bucket and final_bucket must differ".to_string(),
            ));
        }
        if self.default_chunk_size < MIN_PART_SIZE {
            return Err(crate::Error::Config(format!(
                "default_chunk_size must be at least {MIN_PART_SIZE} bytes"
            )));
        }
        if self.url_ttl_secs == 0 {
            return Err(crate::Error::Config(
                "url_ttl_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
