//! Content-safety scanning contract.

use crate::error::UploadResult;
use async_trait::async_trait;

/// Verdict over a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanVerdict {
    /// Safe to keep.
    Clean,
    /// Must not be served. Promotion deletes the copied artifacts and fails
    /// the record with this reason.
    Rejected { reason: String },
}

/// Content-safety check run against the promoted object before it becomes
/// visible. Implementations see the object only through its bucket and key;
/// fetching bytes (or calling out to a scanning service) is their business.
#[async_trait]
pub trait ContentScanner: Send + Sync + 'static {
    async fn scan(&self, bucket: &str, key: &str) -> UploadResult<ScanVerdict>;
}

/// Default scanner: every object is clean.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughScanner;

#[async_trait]
impl ContentScanner for PassthroughScanner {
    async fn scan(&self, _bucket: &str, _key: &str) -> UploadResult<ScanVerdict> {
        Ok(ScanVerdict::Clean)
    }
}
