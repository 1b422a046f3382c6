//! Storage backend capability abstraction.
//!
//! Exactly one backend is active per deployment, selected from
//! configuration at startup. The ingestion gateway drives whichever
//! implementation it is handed and never branches on the concrete variant.

use crate::models::object::StoredObject;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

/// Byte stream flowing into or out of a backend.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// A single multipart file part in flight. Exists only for the duration of
/// one request; the declared filename and content type come from the client
/// and are advisory only.
pub struct UploadPart<'a> {
    pub filename: String,
    pub content_type: String,
    pub data: ByteStream<'a>,
}

/// Result of a committed upload: the persisted metadata plus the canonical
/// URL callers embed. The URL is the only artifact that crosses back to the
/// rest of the application.
#[derive(Debug)]
pub struct StoredUpload {
    pub object: StoredObject,
    pub url: String,
}

/// An object opened for serving.
pub struct RetrievedObject {
    pub content_type: String,
    pub length: i64,
    pub data: ByteStream<'static>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{filename}` not found")]
    NotFound { filename: String },

    #[error("object `{filename}` is corrupt: {reason}")]
    CorruptObject { filename: String, reason: String },

    #[error("payload exceeds the {limit}-byte upload limit")]
    PayloadTooLarge { limit: u64 },

    /// Local or cloud backend I/O failure.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// Forward-proxy failure; carries the upstream status code and response
    /// body when the upstream answered at all.
    #[error("failed to upload to upstream media service")]
    UpstreamUpload {
        status: Option<u16>,
        detail: Option<String>,
    },
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Contract implemented identically by every storage variant.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Consume the input stream exactly once, persist it, and return the
    /// stored metadata plus the canonical URL. Implementations must not
    /// buffer the whole object in memory.
    async fn store(&self, part: UploadPart<'_>) -> StorageResult<StoredUpload>;

    /// Open an object for serving by filename.
    ///
    /// Only the local chunked variant serves bytes itself; proxy and cloud
    /// deployments hand out directly fetchable URLs instead, so the default
    /// keeps their serving path a uniform miss.
    async fn retrieve(&self, filename: &str) -> StorageResult<RetrievedObject> {
        Err(StorageError::NotFound {
            filename: filename.to_string(),
        })
    }

    /// Best-effort cleanup of a stored object, used when an upload is
    /// rolled back. A failure here is logged by the caller, never surfaced
    /// as the primary error; a second attempt is not made.
    async fn remove(&self, object: &StoredObject) -> StorageResult<()>;
}

/// Sanitize a client-declared filename for use in storage keys and URLs.
///
/// Only ASCII alphanumerics, dots, hyphens, and underscores survive;
/// everything else becomes an underscore.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_names() {
        assert_eq!(sanitize_filename("cat.jpg"), "cat.jpg");
        assert_eq!(sanitize_filename("IMG_2024-01.png"), "IMG_2024-01.png");
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("my photo (1).jpg"), "my_photo__1_.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_filename("日本語.jpg"), "___.jpg");
    }
}
