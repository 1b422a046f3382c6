//! Local storage variant: objects live in the chunk store, bytes are
//! served back out through this process's `/file/{filename}` endpoint.

use crate::models::object::StoredObject;
use crate::services::backend::{
    sanitize_filename, RetrievedObject, StorageBackend, StorageResult, StoredUpload, UploadPart,
};
use crate::services::chunk_store::ChunkStore;
use async_trait::async_trait;
use chrono::Utc;

pub struct LocalBackend {
    chunks: ChunkStore,
    public_url: String,
}

impl LocalBackend {
    /// `public_url` is the externally reachable base this deployment is
    /// served under; canonical URLs are `<public_url>/file/<filename>`.
    pub fn new(chunks: ChunkStore, public_url: impl Into<String>) -> Self {
        let public_url = public_url.into().trim_end_matches('/').to_string();
        Self { chunks, public_url }
    }

    /// Globally unique filename: ingestion timestamp prefixed onto the
    /// sanitized original name.
    fn unique_filename(declared: &str) -> String {
        format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            sanitize_filename(declared)
        )
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn store(&self, part: UploadPart<'_>) -> StorageResult<StoredUpload> {
        let filename = Self::unique_filename(&part.filename);
        let record = self
            .chunks
            .store(&filename, &part.content_type, part.data)
            .await?;

        let url = format!("{}/file/{}", self.public_url, record.filename);
        Ok(StoredUpload {
            object: StoredObject {
                id: record.id.to_string(),
                filename: record.filename,
                size_bytes: record.length,
                content_type: record.content_type,
                created_at: record.upload_date,
            },
            url,
        })
    }

    async fn retrieve(&self, filename: &str) -> StorageResult<RetrievedObject> {
        let (record, data) = self.chunks.open(filename).await?;
        Ok(RetrievedObject {
            content_type: record.content_type,
            length: record.length,
            data,
        })
    }

    async fn remove(&self, object: &StoredObject) -> StorageResult<()> {
        self.chunks.delete(&object.filename).await
    }
}
