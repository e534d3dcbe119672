//! Database models mapping to the upload record schema.

use crate::error::{MetadataError, MetadataResult};
use darkroom_core::{
    ProcessingStatus, UploadKind, UploadPart, UploadRecord, UploadStatus,
};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Parameters for creating an upload record. Status always starts out active.
#[derive(Clone, Debug)]
pub struct NewUploadRecord {
    pub owner_id: String,
    /// Store-issued multipart upload id. None for single-part uploads, where
    /// the record store synthesizes one.
    pub upload_id: Option<String>,
    pub storage_key: String,
    /// Temp bucket the client uploads into.
    pub bucket: String,
    pub filename: String,
    pub content_type: String,
    pub total_size: u64,
    pub kind: UploadKind,
}

/// Upload record row.
#[derive(Debug, Clone, FromRow)]
pub struct UploadRecordRow {
    pub record_id: Uuid,
    pub owner_id: String,
    pub upload_id: String,
    pub storage_key: String,
    pub bucket: String,
    pub filename: String,
    pub content_type: String,
    pub total_size: i64,
    pub kind: String,
    pub status: String,
    pub processing_status: Option<String>,
    pub processing_progress: i64,
    pub processing_message: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub final_storage_key: Option<String>,
    pub final_bucket: Option<String>,
    pub thumbnail_key: Option<String>,
    pub thumbnail_url: Option<String>,
    pub thumbnail_source_url: Option<String>,
}

/// Acknowledged part row.
#[derive(Debug, Clone, FromRow)]
pub struct UploadPartRow {
    pub upload_id: String,
    pub part_number: i64,
    pub etag: String,
    pub size_bytes: i64,
    pub uploaded_at: OffsetDateTime,
}

fn invalid_column(err: darkroom_core::Error) -> MetadataError {
    MetadataError::Internal(format!("invalid stored value: {err}"))
}

impl UploadPartRow {
    pub fn into_part(self) -> MetadataResult<UploadPart> {
        let part_number = u32::try_from(self.part_number).map_err(|_| {
            MetadataError::Internal(format!("invalid stored part number: {}", self.part_number))
        })?;
        let size = u64::try_from(self.size_bytes).map_err(|_| {
            MetadataError::Internal(format!("invalid stored part size: {}", self.size_bytes))
        })?;
        Ok(UploadPart {
            part_number,
            etag: self.etag,
            size,
            uploaded_at: self.uploaded_at,
        })
    }
}

impl UploadRecordRow {
    /// Convert a record row plus its part rows into the domain record.
    /// Part rows must already be ordered by part number.
    pub fn into_record(self, parts: Vec<UploadPartRow>) -> MetadataResult<UploadRecord> {
        let kind = UploadKind::parse(&self.kind).map_err(invalid_column)?;
        let status = UploadStatus::parse(&self.status).map_err(invalid_column)?;
        let processing_status = self
            .processing_status
            .as_deref()
            .map(ProcessingStatus::parse)
            .transpose()
            .map_err(invalid_column)?;
        let total_size = u64::try_from(self.total_size).map_err(|_| {
            MetadataError::Internal(format!("invalid stored total size: {}", self.total_size))
        })?;
        let parts = parts
            .into_iter()
            .map(UploadPartRow::into_part)
            .collect::<MetadataResult<Vec<_>>>()?;

        Ok(UploadRecord {
            id: self.record_id,
            owner_id: self.owner_id,
            upload_id: self.upload_id,
            storage_key: self.storage_key,
            bucket: self.bucket,
            filename: self.filename,
            content_type: self.content_type,
            total_size,
            kind,
            status,
            processing_status,
            processing_progress: self.processing_progress.clamp(0, 100) as u8,
            processing_message: self.processing_message,
            parts,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            final_storage_key: self.final_storage_key,
            final_bucket: self.final_bucket,
            thumbnail_key: self.thumbnail_key,
            thumbnail_url: self.thumbnail_url,
            thumbnail_source_url: self.thumbnail_source_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample_row() -> UploadRecordRow {
        UploadRecordRow {
            record_id: Uuid::new_v4(),
            owner_id: "alice".to_string(),
            upload_id: "upload-1".to_string(),
            storage_key: "alice/1714521600000-cat.png".to_string(),
            bucket: "media-temp".to_string(),
            filename: "cat.png".to_string(),
            content_type: "image/png".to_string(),
            total_size: 42,
            kind: "multipart".to_string(),
            status: "active".to_string(),
            processing_status: None,
            processing_progress: 0,
            processing_message: None,
            created_at: datetime!(2024-05-01 00:00:00 UTC),
            updated_at: datetime!(2024-05-01 00:00:00 UTC),
            completed_at: None,
            final_storage_key: None,
            final_bucket: None,
            thumbnail_key: None,
            thumbnail_url: None,
            thumbnail_source_url: None,
        }
    }

    #[test]
    fn row_converts_to_domain_record() {
        let parts = vec![UploadPartRow {
            upload_id: "upload-1".to_string(),
            part_number: 1,
            etag: "abc".to_string(),
            size_bytes: 42,
            uploaded_at: datetime!(2024-05-01 00:01:00 UTC),
        }];

        let record = sample_row().into_record(parts).unwrap();
        assert_eq!(record.kind, UploadKind::Multipart);
        assert_eq!(record.status, UploadStatus::Active);
        assert_eq!(record.parts.len(), 1);
        assert_eq!(record.parts[0].part_number, 1);
        assert_eq!(record.received_bytes(), 42);
    }

    #[test]
    fn row_with_unknown_status_is_an_internal_error() {
        let mut row = sample_row();
        row.status = "exploded".to_string();

        let err = row.into_record(Vec::new()).unwrap_err();
        assert!(matches!(err, MetadataError::Internal(_)));
    }

    #[test]
    fn out_of_range_progress_is_clamped() {
        let mut row = sample_row();
        row.processing_progress = 250;

        let record = row.into_record(Vec::new()).unwrap();
        assert_eq!(record.processing_progress, 100);
    }
}
