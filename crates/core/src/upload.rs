//! Upload records, parts, and the lifecycle state machine.

use crate::{DEFAULT_PART_SIZE, Error, MAX_UPLOAD_SIZE, MIN_PART_SIZE};
use crate::{MULTIPART_THRESHOLD, Result, key};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Transfer strategy chosen at initiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    /// One presigned PUT for the whole object.
    Single,
    /// Store-side multipart protocol with per-part presigned URLs.
    Multipart,
}

impl UploadKind {
    /// Classify an upload by its total size.
    pub fn classify(total_size: u64) -> Self {
        if total_size >= MULTIPART_THRESHOLD {
            Self::Multipart
        } else {
            Self::Single
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multipart => "multipart",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "single" => Ok(Self::Single),
            "multipart" => Ok(Self::Multipart),
            other => Err(Error::InvalidStatus(format!("upload kind: {other}"))),
        }
    }
}

/// Main upload status. Transitions are monotonic: `active` is the only
/// non-terminal state, and nothing transitions out of a terminal state
/// (promotion failure is handled separately and only ever lands on `failed`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Accepting parts and lifecycle calls.
    Active,
    /// Client finished the transfer; promotion may still be running.
    Completed,
    /// Explicitly abandoned by the client.
    Aborted,
    /// Errored, reaped, or rejected during promotion.
    Failed,
}

impl UploadStatus {
    /// Check if the upload still accepts lifecycle operations.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the upload reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidStatus(format!("upload status: {other}"))),
        }
    }
}

/// Post-completion processing status, independent of [`UploadStatus`].
/// Cycles `pending → processing → {processed, failed}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidStatus(format!("processing status: {other}"))),
        }
    }
}

/// One acknowledged chunk of a multipart upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPart {
    /// 1-based part number, unique within the upload.
    pub part_number: u32,
    /// Store-assigned integrity token, required to finalize.
    pub etag: String,
    /// Size in bytes as reported by the client.
    pub size: u64,
    /// When the part was acknowledged.
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

/// A part number / etag pair as submitted to the store's completion call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartEtag {
    pub part_number: u32,
    pub etag: String,
}

/// One upload attempt, from initiation to a finalized (or terminal) artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Store-assigned record identity.
    pub id: Uuid,
    /// Owner everything is scoped by.
    pub owner_id: String,
    /// Client-facing correlation key: the store-issued multipart id, or a
    /// locally synthesized `single-...` id.
    pub upload_id: String,
    /// Key in the temp bucket.
    pub storage_key: String,
    /// Temp bucket the object was uploaded into.
    pub bucket: String,
    pub filename: String,
    pub content_type: String,
    /// Declared size in bytes, > 0.
    pub total_size: u64,
    pub kind: UploadKind,
    pub status: UploadStatus,
    /// Absent means "no processing required yet".
    pub processing_status: Option<ProcessingStatus>,
    /// Always within [0, 100].
    pub processing_progress: u8,
    pub processing_message: Option<String>,
    /// Acknowledged parts, ordered by part number; empty for single-part.
    pub parts: Vec<UploadPart>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Key in the final bucket once promotion succeeded.
    pub final_storage_key: Option<String>,
    pub final_bucket: Option<String>,
    pub thumbnail_key: Option<String>,
    pub thumbnail_url: Option<String>,
    /// URL reported by the derived-asset generator, kept for audit.
    pub thumbnail_source_url: Option<String>,
}

impl UploadRecord {
    /// The single authoritative readiness predicate: completed, processed (or
    /// never processed), and promoted to a final key.
    pub fn ready_for_display(&self) -> bool {
        self.status == UploadStatus::Completed
            && matches!(
                self.processing_status,
                None | Some(ProcessingStatus::Processed)
            )
            && self.final_storage_key.is_some()
    }

    /// Bytes acknowledged so far, saturating at `u64::MAX`. Always 0 for
    /// single-part uploads, which carry no parts.
    pub fn received_bytes(&self) -> u64 {
        self.parts
            .iter()
            .map(|p| u128::from(p.size))
            .sum::<u128>()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    /// Transfer progress in percent. Binary for single-part uploads (driven
    /// by status, not parts); byte ratio for multipart, clamped to 100 since
    /// part receipts may overcount the final short part.
    pub fn transfer_progress(&self) -> u8 {
        match self.kind {
            UploadKind::Single => {
                if self.status == UploadStatus::Completed {
                    100
                } else {
                    0
                }
            }
            UploadKind::Multipart => {
                if self.total_size == 0 {
                    return 0;
                }
                // Widened so the ratio stays total for any stored part sizes.
                let received = u128::from(self.received_bytes());
                ((received * 100) / u128::from(self.total_size)).min(100) as u8
            }
        }
    }
}

/// Part sizing chosen at initiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadPlan {
    pub kind: UploadKind,
    /// Part size hint for the client; for single-part uploads it is the
    /// default (the whole object goes up in one PUT regardless).
    pub chunk_size: u64,
    /// `ceil(total_size / chunk_size)` for multipart, 1 for single.
    pub total_chunks: u64,
}

impl UploadPlan {
    /// Compute the plan for a declared size and optional part-size override.
    pub fn for_size(total_size: u64, chunk_size: Option<u64>) -> Result<Self> {
        if total_size == 0 || total_size > MAX_UPLOAD_SIZE {
            return Err(Error::InvalidTotalSize {
                size: total_size,
                max: MAX_UPLOAD_SIZE,
            });
        }
        let chunk_size = chunk_size.unwrap_or(DEFAULT_PART_SIZE);
        let kind = UploadKind::classify(total_size);
        match kind {
            UploadKind::Single => Ok(Self {
                kind,
                chunk_size,
                total_chunks: 1,
            }),
            UploadKind::Multipart => {
                // The 5 MiB floor keeps the chunk count within the store's
                // 10000-part ceiling for any size up to MAX_UPLOAD_SIZE.
                if chunk_size < MIN_PART_SIZE {
                    return Err(Error::InvalidPartSize {
                        size: chunk_size,
                        min: MIN_PART_SIZE,
                    });
                }
                Ok(Self {
                    kind,
                    chunk_size,
                    total_chunks: total_size.div_ceil(chunk_size),
                })
            }
        }
    }
}

/// Request to initiate an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitiateUploadRequest {
    pub filename: String,
    /// Must match `image/*` or `video/*`.
    pub content_type: String,
    /// Declared size in bytes.
    pub total_size: u64,
    /// Part size override (optional, uses the 10 MiB default if not given).
    pub chunk_size: Option<u64>,
}

impl InitiateUploadRequest {
    /// Validate every field and compute the upload plan.
    pub fn validate(&self) -> Result<UploadPlan> {
        key::validate_filename(&self.filename)?;
        key::validate_content_type(&self.content_type)?;
        UploadPlan::for_size(self.total_size, self.chunk_size)
    }
}

/// Response from initiating an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitiateUploadResponse {
    pub upload_id: String,
    pub storage_key: String,
    pub kind: UploadKind,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

/// A presigned upload (or download) URL with its lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadUrlResponse {
    pub url: String,
    pub expires_in_secs: u64,
}

/// Client report that one part finished uploading directly to the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcknowledgePartRequest {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// Request to complete an upload. `parts` is required iff multipart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    #[serde(default)]
    pub parts: Option<Vec<PartEtag>>,
}

/// Response from completing an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub storage_key: String,
    pub bucket: String,
    pub kind: UploadKind,
}

/// Consolidated view for status pollers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub upload_id: String,
    pub status: UploadStatus,
    pub processing_status: Option<ProcessingStatus>,
    pub processing_progress: u8,
    pub processing_message: Option<String>,
    pub ready_for_display: bool,
}

/// One entry of the "my active uploads" view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActiveUploadSummary {
    pub upload_id: String,
    pub storage_key: String,
    pub filename: String,
    pub content_type: String,
    pub kind: UploadKind,
    pub total_size: u64,
    pub received_bytes: u64,
    pub received_parts: u32,
    /// Computed transfer progress in percent.
    pub percent: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
