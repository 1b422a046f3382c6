//! Metadata row for an object held in the local chunk store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row of the `files` table.
///
/// The metadata record is written only after every chunk of the object has
/// been persisted, so a `FileRecord` always describes a complete object.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Internal UUID; chunks reference it via `chunks.file_id`.
    pub id: Uuid,

    /// Globally unique filename (ingestion-timestamp prefixed).
    pub filename: String,

    /// Exact payload length in bytes.
    pub length: i64,

    /// Chunk size the object was split with. Kept per record so the store
    /// can be reconfigured without breaking existing objects.
    pub chunk_size: i64,

    /// Content type recorded at ingest.
    pub content_type: String,

    /// When the upload committed.
    pub upload_date: DateTime<Utc>,

    /// MD5 of the payload, computed while streaming.
    pub md5: Option<String>,
}
