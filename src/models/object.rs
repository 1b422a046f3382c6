//! Backend-neutral metadata for one persisted binary asset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fully-persisted binary asset as seen by the rest of the system.
///
/// Every storage backend returns one of these after a successful upload.
/// The record is created atomically when an upload commits and is never
/// mutated afterwards; callers hold the derived URL, not this record.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredObject {
    /// Opaque, backend-assigned identifier (local row id, cloud storage
    /// key, or the name issued by the external media service).
    pub id: String,

    /// Derived, globally unique filename the object is addressed by.
    pub filename: String,

    /// Total payload size in bytes.
    pub size_bytes: i64,

    /// Content type recorded at ingest (declared by the client, advisory).
    pub content_type: String,

    /// When the upload committed.
    pub created_at: DateTime<Utc>,
}
