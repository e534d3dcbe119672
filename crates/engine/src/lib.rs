//! Upload lifecycle orchestration.
//!
//! [`UploadEngine`] drives every upload from initiation through presigned
//! transfer, completion, and background promotion into the final bucket,
//! with content scanning and optional thumbnail derivation along the way.
//! It owns no storage of its own; it coordinates a record store from
//! `darkroom-metadata` and an object store from `darkroom-storage`.

pub mod engine;
pub mod error;
mod promote;
pub mod scan;
pub mod tasks;
pub mod thumbnail;

pub use engine::{MAX_BULK_STATUS, REAP_BATCH, UploadEngine};
pub use error::{UploadError, UploadResult};
pub use scan::{ContentScanner, PassthroughScanner, ScanVerdict};
pub use tasks::TaskRegistry;
pub use thumbnail::{DerivedAsset, NoThumbnails, ThumbnailGenerator};
