//! Record store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::UploadRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined record store trait.
#[async_trait]
pub trait MetadataStore: UploadRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based record store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and run migrations.
    pub async fn new(path: impl AsRef<Path>, busy_timeout_secs: u64) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under concurrent requests.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        tracing::info!(path = %path.display(), "opened sqlite record store");

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement the repository trait for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::{NewUploadRecord, UploadPartRow, UploadRecordRow};
    use crate::repos::{CompletionFields, PromotionFields};
    use darkroom_core::{ProcessingStatus, UploadKind, UploadPart, UploadRecord, UploadStatus};
    use time::OffsetDateTime;
    use uuid::Uuid;

    impl SqliteStore {
        async fn load_parts(&self, upload_id: &str) -> MetadataResult<Vec<UploadPartRow>> {
            let parts = sqlx::query_as::<_, UploadPartRow>(
                "SELECT * FROM upload_parts WHERE upload_id = ? ORDER BY part_number ASC",
            )
            .bind(upload_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(parts)
        }

        async fn assemble(&self, row: UploadRecordRow) -> MetadataResult<UploadRecord> {
            let parts = self.load_parts(&row.upload_id).await?;
            row.into_record(parts)
        }

        /// Classify a guarded transition that matched no rows: the record is
        /// either missing or sitting in a state the transition rejects.
        async fn transition_error(&self, upload_id: &str, owner: &str, to: &str) -> MetadataError {
            let status: Result<Option<String>, sqlx::Error> =
                sqlx::query_scalar("SELECT status FROM upload_records WHERE upload_id = ? AND owner_id = ?")
                    .bind(upload_id)
                    .bind(owner)
                    .fetch_optional(&self.pool)
                    .await;

            match status {
                Ok(Some(from)) => MetadataError::InvalidStateTransition {
                    from,
                    to: to.to_string(),
                },
                Ok(None) => MetadataError::NotFound(format!("upload {upload_id}")),
                Err(err) => MetadataError::Database(err),
            }
        }
    }

    #[async_trait]
    impl UploadRepo for SqliteStore {
        #[tracing::instrument(skip(self, new), fields(owner = %new.owner_id, kind = new.kind.as_str()))]
        async fn create(&self, new: NewUploadRecord) -> MetadataResult<UploadRecord> {
            let now = OffsetDateTime::now_utc();
            let upload_id = match (new.upload_id, new.kind) {
                (Some(id), _) => id,
                (None, UploadKind::Single) => darkroom_core::single_upload_id(now),
                (None, UploadKind::Multipart) => {
                    return Err(MetadataError::Internal(
                        "multipart records require a store-issued upload id".to_string(),
                    ));
                }
            };
            let total_size = i64::try_from(new.total_size).map_err(|_| {
                MetadataError::Internal(format!("total size out of range: {}", new.total_size))
            })?;

            let record = UploadRecord {
                id: Uuid::new_v4(),
                owner_id: new.owner_id,
                upload_id,
                storage_key: new.storage_key,
                bucket: new.bucket,
                filename: new.filename,
                content_type: new.content_type,
                total_size: new.total_size,
                kind: new.kind,
                status: UploadStatus::Active,
                processing_status: Some(ProcessingStatus::Pending),
                processing_progress: 0,
                processing_message: None,
                parts: Vec::new(),
                created_at: now,
                updated_at: now,
                completed_at: None,
                final_storage_key: None,
                final_bucket: None,
                thumbnail_key: None,
                thumbnail_url: None,
                thumbnail_source_url: None,
            };

            let result = sqlx::query(
                r#"
                INSERT INTO upload_records (
                    record_id, owner_id, upload_id, storage_key, bucket,
                    filename, content_type, total_size, kind, status,
                    processing_status, processing_progress, processing_message,
                    created_at, updated_at, completed_at, final_storage_key,
                    final_bucket, thumbnail_key, thumbnail_url, thumbnail_source_url
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.id)
            .bind(&record.owner_id)
            .bind(&record.upload_id)
            .bind(&record.storage_key)
            .bind(&record.bucket)
            .bind(&record.filename)
            .bind(&record.content_type)
            .bind(total_size)
            .bind(record.kind.as_str())
            .bind(record.status.as_str())
            .bind(ProcessingStatus::Pending.as_str())
            .bind(0i64)
            .bind(Option::<String>::None)
            .bind(record.created_at)
            .bind(record.updated_at)
            .bind(record.completed_at)
            .bind(&record.final_storage_key)
            .bind(&record.final_bucket)
            .bind(&record.thumbnail_key)
            .bind(&record.thumbnail_url)
            .bind(&record.thumbnail_source_url)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(record),
                Err(sqlx::Error::Database(db_err))
                    if db_err.message().contains("UNIQUE constraint") =>
                {
                    Err(MetadataError::AlreadyExists(format!(
                        "upload {}",
                        record.upload_id
                    )))
                }
                Err(err) => Err(err.into()),
            }
        }

        async fn get_by_upload_id(
            &self,
            upload_id: &str,
            owner: &str,
        ) -> MetadataResult<Option<UploadRecord>> {
            let row = sqlx::query_as::<_, UploadRecordRow>(
                "SELECT * FROM upload_records WHERE upload_id = ? AND owner_id = ?",
            )
            .bind(upload_id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

            match row {
                Some(row) => Ok(Some(self.assemble(row).await?)),
                None => Ok(None),
            }
        }

        async fn get_by_storage_key(
            &self,
            storage_key: &str,
            owner: &str,
        ) -> MetadataResult<Option<UploadRecord>> {
            // Key collisions are rare but possible; pick the most recent
            // record deterministically.
            let row = sqlx::query_as::<_, UploadRecordRow>(
                "SELECT * FROM upload_records WHERE storage_key = ? AND owner_id = ? ORDER BY created_at DESC LIMIT 1",
            )
            .bind(storage_key)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

            match row {
                Some(row) => Ok(Some(self.assemble(row).await?)),
                None => Ok(None),
            }
        }

        #[tracing::instrument(skip(self, part), fields(part_number = part.part_number))]
        async fn upsert_part(
            &self,
            upload_id: &str,
            owner: &str,
            part: &UploadPart,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            // Guarded insert: the SELECT source only yields a row while an
            // active record matches, so acknowledgements against missing or
            // terminal records fall through to rows_affected == 0 instead of
            // inserting orphan parts. The conflict arm makes re-sent part
            // numbers last-writer-wins.
            let result = sqlx::query(
                r#"
                INSERT INTO upload_parts (upload_id, part_number, etag, size_bytes, uploaded_at)
                SELECT r.upload_id, ?3, ?4, ?5, ?6
                FROM upload_records r
                WHERE r.upload_id = ?1 AND r.owner_id = ?2 AND r.status = 'active'
                ON CONFLICT (upload_id, part_number) DO UPDATE SET
                    etag = excluded.etag,
                    size_bytes = excluded.size_bytes,
                    uploaded_at = excluded.uploaded_at
                "#,
            )
            .bind(upload_id)
            .bind(owner)
            .bind(i64::from(part.part_number))
            .bind(&part.etag)
            .bind(i64::try_from(part.size).map_err(|_| {
                MetadataError::Internal(format!("part size out of range: {}", part.size))
            })?)
            .bind(part.uploaded_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "active upload {upload_id}"
                )));
            }

            sqlx::query(
                "UPDATE upload_records SET updated_at = ?3 WHERE upload_id = ?1 AND owner_id = ?2",
            )
            .bind(upload_id)
            .bind(owner)
            .bind(part.uploaded_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        }

        #[tracing::instrument(skip(self, fields))]
        async fn mark_completed(
            &self,
            upload_id: &str,
            owner: &str,
            fields: CompletionFields,
        ) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            let result = sqlx::query(
                r#"
                UPDATE upload_records SET
                    status = 'completed',
                    completed_at = ?3,
                    updated_at = ?3,
                    processing_status = COALESCE(processing_status, 'pending'),
                    final_storage_key = COALESCE(?4, final_storage_key),
                    final_bucket = COALESCE(?5, final_bucket),
                    thumbnail_key = COALESCE(?6, thumbnail_key),
                    thumbnail_url = COALESCE(?7, thumbnail_url),
                    thumbnail_source_url = COALESCE(?8, thumbnail_source_url)
                WHERE upload_id = ?1 AND owner_id = ?2 AND status = 'active'
                "#,
            )
            .bind(upload_id)
            .bind(owner)
            .bind(now)
            .bind(&fields.final_storage_key)
            .bind(&fields.final_bucket)
            .bind(&fields.thumbnail_key)
            .bind(&fields.thumbnail_url)
            .bind(&fields.thumbnail_source_url)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(self.transition_error(upload_id, owner, "completed").await);
            }
            Ok(())
        }

        #[tracing::instrument(skip(self))]
        async fn mark_aborted(&self, upload_id: &str, owner: &str) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            let result = sqlx::query(
                "UPDATE upload_records SET status = 'aborted', updated_at = ?3 WHERE upload_id = ?1 AND owner_id = ?2 AND status = 'active'",
            )
            .bind(upload_id)
            .bind(owner)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(self.transition_error(upload_id, owner, "aborted").await);
            }
            Ok(())
        }

        #[tracing::instrument(skip(self))]
        async fn mark_failed(
            &self,
            upload_id: &str,
            owner: &str,
            reason: Option<&str>,
        ) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            let result = sqlx::query(
                r#"
                UPDATE upload_records SET
                    status = 'failed',
                    updated_at = ?3,
                    processing_message = COALESCE(?4, processing_message)
                WHERE upload_id = ?1 AND owner_id = ?2 AND status = 'active'
                "#,
            )
            .bind(upload_id)
            .bind(owner)
            .bind(now)
            .bind(reason)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(self.transition_error(upload_id, owner, "failed").await);
            }
            Ok(())
        }

        #[tracing::instrument(skip(self, fields), fields(final_bucket = %fields.final_bucket))]
        async fn record_promotion(
            &self,
            upload_id: &str,
            owner: &str,
            fields: PromotionFields,
        ) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            let result = sqlx::query(
                r#"
                UPDATE upload_records SET
                    final_storage_key = ?4,
                    final_bucket = ?5,
                    thumbnail_key = ?6,
                    thumbnail_url = ?7,
                    thumbnail_source_url = ?8,
                    updated_at = ?3
                WHERE upload_id = ?1 AND owner_id = ?2 AND status = 'completed'
                "#,
            )
            .bind(upload_id)
            .bind(owner)
            .bind(now)
            .bind(&fields.final_storage_key)
            .bind(&fields.final_bucket)
            .bind(&fields.thumbnail_key)
            .bind(&fields.thumbnail_url)
            .bind(&fields.thumbnail_source_url)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(self.transition_error(upload_id, owner, "promoted").await);
            }
            Ok(())
        }

        #[tracing::instrument(skip(self))]
        async fn fail_promotion(
            &self,
            upload_id: &str,
            owner: &str,
            reason: &str,
        ) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            // The one sanctioned completed-to-failed transition.
            let result = sqlx::query(
                r#"
                UPDATE upload_records SET
                    status = 'failed',
                    processing_status = 'failed',
                    processing_message = ?4,
                    updated_at = ?3
                WHERE upload_id = ?1 AND owner_id = ?2 AND status IN ('active', 'completed')
                "#,
            )
            .bind(upload_id)
            .bind(owner)
            .bind(now)
            .bind(reason)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(self.transition_error(upload_id, owner, "failed").await);
            }
            Ok(())
        }

        #[tracing::instrument(skip(self), fields(status = status.as_str()))]
        async fn update_processing_status(
            &self,
            upload_id: &str,
            owner: &str,
            status: ProcessingStatus,
            progress: Option<u8>,
            message: Option<&str>,
        ) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            let progress = progress.map(|value| i64::from(value.min(100)));
            let result = sqlx::query(
                r#"
                UPDATE upload_records SET
                    processing_status = ?3,
                    processing_progress = COALESCE(?4, processing_progress),
                    processing_message = COALESCE(?5, processing_message),
                    updated_at = ?6
                WHERE upload_id = ?1 AND owner_id = ?2
                "#,
            )
            .bind(upload_id)
            .bind(owner)
            .bind(status.as_str())
            .bind(progress)
            .bind(message)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("upload {upload_id}")));
            }
            Ok(())
        }

        async fn list_active(&self, owner: &str) -> MetadataResult<Vec<UploadRecord>> {
            let rows = sqlx::query_as::<_, UploadRecordRow>(
                "SELECT * FROM upload_records WHERE owner_id = ? AND status = 'active' ORDER BY created_at DESC",
            )
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;

            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                records.push(self.assemble(row).await?);
            }
            Ok(records)
        }

        async fn count_active(&self, owner: &str) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM upload_records WHERE owner_id = ? AND status = 'active'",
            )
            .bind(owner)
            .fetch_one(&self.pool)
            .await?;
            Ok(count.max(0) as u64)
        }

        async fn list_stale(
            &self,
            cutoff: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<UploadRecord>> {
            let rows = sqlx::query_as::<_, UploadRecordRow>(
                "SELECT * FROM upload_records WHERE status = 'active' AND created_at < ? ORDER BY created_at ASC LIMIT ?",
            )
            .bind(cutoff)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                records.push(self.assemble(row).await?);
            }
            Ok(records)
        }

        #[tracing::instrument(skip(self), fields(cutoff = %cutoff))]
        async fn reap_stale(&self, cutoff: OffsetDateTime) -> MetadataResult<u64> {
            let now = OffsetDateTime::now_utc();
            let result = sqlx::query(
                r#"
                UPDATE upload_records SET
                    status = 'failed',
                    processing_message = 'expired',
                    updated_at = ?2
                WHERE status = 'active' AND created_at < ?1
                "#,
            )
            .bind(cutoff)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Upload records
CREATE TABLE IF NOT EXISTS upload_records (
    record_id BLOB PRIMARY KEY,
    owner_id TEXT NOT NULL,
    -- Store-issued multipart id, or a synthesized single-... id.
    upload_id TEXT NOT NULL UNIQUE,
    storage_key TEXT NOT NULL,
    bucket TEXT NOT NULL,
    filename TEXT NOT NULL,
    content_type TEXT NOT NULL,
    total_size INTEGER NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    processing_status TEXT,
    processing_progress INTEGER NOT NULL DEFAULT 0,
    processing_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    final_storage_key TEXT,
    final_bucket TEXT,
    thumbnail_key TEXT,
    thumbnail_url TEXT,
    thumbnail_source_url TEXT
);
CREATE INDEX IF NOT EXISTS idx_upload_records_owner_status ON upload_records(owner_id, status, created_at);
CREATE INDEX IF NOT EXISTS idx_upload_records_storage_key ON upload_records(owner_id, storage_key);
-- Serves the stale-record sweep.
CREATE INDEX IF NOT EXISTS idx_upload_records_stale ON upload_records(status, created_at);

-- Acknowledged parts
CREATE TABLE IF NOT EXISTS upload_parts (
    upload_id TEXT NOT NULL,
    part_number INTEGER NOT NULL,
    etag TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    uploaded_at TEXT NOT NULL,
    PRIMARY KEY (upload_id, part_number),
    FOREIGN KEY (upload_id) REFERENCES upload_records(upload_id) ON DELETE CASCADE
);
"#;
