//! Upload record persistence.
//!
//! Stores the lifecycle state of every upload: the record itself, the
//! acknowledged parts, and the promotion results written after completion.
//! The only implementation is SQLite-backed; [`from_config`] builds one from
//! a [`MetadataConfig`].

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{NewUploadRecord, UploadPartRow, UploadRecordRow};
pub use repos::{CompletionFields, PromotionFields, UploadRepo};
pub use store::{MetadataStore, SqliteStore};

use darkroom_core::MetadataConfig;
use std::sync::Arc;

/// Build a record store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            busy_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *busy_timeout_secs).await?;
            Ok(Arc::new(store))
        }
    }
}
