//! Storage key derivation and upload input validation.

use crate::{Error, Result};
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum filename length in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

/// Derive the storage key for an upload: `{owner}/{timestamp}-{filename}`.
///
/// The millisecond timestamp makes collisions between uploads of the same
/// filename by the same owner extremely rare; they are not deduplicated.
pub fn storage_key(owner: &str, filename: &str, at: OffsetDateTime) -> String {
    format!("{}/{}-{}", owner, unix_ms(at), filename)
}

/// Synthesize a client-facing upload id for single-part uploads, which never
/// receive a store-issued multipart id: `single-{timestamp}-{random}`.
pub fn single_upload_id(at: OffsetDateTime) -> String {
    format!("single-{}-{}", unix_ms(at), Uuid::new_v4().simple())
}

fn unix_ms(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Validate a client-supplied filename before it becomes part of a storage key.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        return Err(Error::InvalidFilename("filename is empty".to_string()));
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(Error::InvalidFilename(format!(
            "filename exceeds {MAX_FILENAME_LEN} bytes"
        )));
    }
    if filename.contains(['/', '\\']) {
        return Err(Error::InvalidFilename(
            "filename must not contain path separators".to_string(),
        ));
    }
    if filename.chars().any(|c| c.is_control()) {
        return Err(Error::InvalidFilename(
            "filename must not contain control characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate a content type: only `image/*` and `video/*` are accepted.
pub fn validate_content_type(content_type: &str) -> Result<()> {
    let subtype = content_type
        .strip_prefix("image/")
        .or_else(|| content_type.strip_prefix("video/"));
    match subtype {
        Some(rest) if !rest.is_empty() && !rest.contains(char::is_whitespace) => Ok(()),
        _ => Err(Error::UnsupportedContentType(content_type.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_storage_key_shape() {
        let at = datetime!(2024-05-01 00:00:00 UTC);
        let key = storage_key("user-7", "cat.jpg", at);
        let ms = at.unix_timestamp() * 1000;
        assert_eq!(key, format!("user-7/{ms}-cat.jpg"));
    }

    #[test]
    fn test_single_upload_id_shape_and_uniqueness() {
        let at = OffsetDateTime::now_utc();
        let a = single_upload_id(at);
        let b = single_upload_id(at);
        assert!(a.starts_with("single-"));
        assert_ne!(a, b, "random suffix must differ for identical timestamps");
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("photo.png").is_ok());
        assert!(validate_filename("with spaces.mov").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("a/b.png").is_err());
        assert!(validate_filename("a\\b.png").is_err());
        assert!(validate_filename("bad\nname").is_err());
        assert!(validate_filename(&"x".repeat(MAX_FILENAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_content_type() {
        assert!(validate_content_type("image/png").is_ok());
        assert!(validate_content_type("video/mp4").is_ok());
        assert!(validate_content_type("image/").is_err());
        assert!(validate_content_type("application/pdf").is_err());
        assert!(validate_content_type("imagepng").is_err());
        assert!(validate_content_type("image/p ng").is_err());
    }
}
