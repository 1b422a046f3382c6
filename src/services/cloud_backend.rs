//! Cloud object-store variant, using Apache OpenDAL.
//!
//! Streams the upload through an OpenDAL writer into a fixed logical
//! folder of an S3-compatible bucket; the canonical URL points at the
//! bucket's public (or CDN) base, so this process never serves the bytes.

use crate::models::object::StoredObject;
use crate::services::backend::{
    sanitize_filename, StorageBackend, StorageError, StorageResult, StoredUpload, UploadPart,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use opendal::{services, Operator};
use tracing::debug;
use uuid::Uuid;

pub struct CloudBackend {
    op: Operator,
    public_url: String,
    folder: String,
    max_bytes: Option<u64>,
}

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl CloudBackend {
    pub fn new(
        op: Operator,
        public_url: impl Into<String>,
        folder: impl Into<String>,
        max_bytes: Option<u64>,
    ) -> Self {
        Self {
            op,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            folder: folder.into().trim_matches('/').to_string(),
            max_bytes,
        }
    }

    /// Build the backend against an S3-compatible service.
    pub fn from_s3(
        settings: &S3Settings,
        public_url: impl Into<String>,
        folder: impl Into<String>,
        max_bytes: Option<u64>,
    ) -> anyhow::Result<Self> {
        let builder = services::S3::default()
            .endpoint(&settings.endpoint)
            .bucket(&settings.bucket)
            .region(&settings.region)
            .access_key_id(&settings.access_key_id)
            .secret_access_key(&settings.secret_access_key);
        let op = Operator::new(builder)?.finish();
        Ok(Self::new(op, public_url, folder, max_bytes))
    }
}

fn svc(err: opendal::Error) -> StorageError {
    StorageError::Unavailable(err.to_string())
}

#[async_trait]
impl StorageBackend for CloudBackend {
    async fn store(&self, part: UploadPart<'_>) -> StorageResult<StoredUpload> {
        let filename = format!("{}-{}", Uuid::new_v4(), sanitize_filename(&part.filename));
        let key = format!("{}/{}", self.folder, filename);

        let mut writer = self.op.writer(&key).await.map_err(svc)?;

        let mut data = part.data;
        let mut written = 0u64;
        let outcome: StorageResult<()> = async {
            while let Some(next) = data.next().await {
                let bytes = next?;
                written += bytes.len() as u64;
                if let Some(limit) = self.max_bytes {
                    if written > limit {
                        return Err(StorageError::PayloadTooLarge { limit });
                    }
                }
                writer.write(bytes).await.map_err(svc)?;
            }
            Ok(())
        }
        .await;

        if let Err(err) = outcome {
            if let Err(abort_err) = writer.abort().await {
                debug!(%key, %abort_err, "failed to abort cloud writer");
            }
            return Err(err);
        }
        writer.close().await.map_err(svc)?;

        let url = format!("{}/{}", self.public_url, key);
        Ok(StoredUpload {
            object: StoredObject {
                id: key,
                filename,
                size_bytes: written as i64,
                content_type: part.content_type,
                created_at: Utc::now(),
            },
            url,
        })
    }

    async fn remove(&self, object: &StoredObject) -> StorageResult<()> {
        self.op.delete(&object.id).await.map_err(svc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn fs_backend(root: &std::path::Path, max_bytes: Option<u64>) -> CloudBackend {
        let builder = services::Fs::default().root(root.to_str().expect("utf-8 path"));
        let op = Operator::new(builder).expect("operator").finish();
        CloudBackend::new(op, "https://cdn.example.com/", "uploads", max_bytes)
    }

    fn part(filename: &str, data: Vec<u8>) -> UploadPart<'static> {
        UploadPart {
            filename: filename.to_string(),
            content_type: "image/png".to_string(),
            data: futures::stream::once(async move { Ok(Bytes::from(data)) }).boxed(),
        }
    }

    #[tokio::test]
    async fn streams_into_the_configured_folder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = fs_backend(dir.path(), None);

        let payload = vec![8u8; 5000];
        let stored = backend
            .store(part("sunset photo.png", payload.clone()))
            .await
            .expect("store");

        assert!(stored.object.id.starts_with("uploads/"));
        assert!(stored.object.id.ends_with("-sunset_photo.png"));
        assert_eq!(stored.url, format!("https://cdn.example.com/{}", stored.object.id));
        assert_eq!(stored.object.size_bytes, 5000);

        let written = backend.op.read(&stored.object.id).await.expect("read back");
        assert_eq!(written.to_vec(), payload);
    }

    #[tokio::test]
    async fn remove_deletes_the_stored_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = fs_backend(dir.path(), None);

        let stored = backend
            .store(part("gone.png", vec![1u8; 10]))
            .await
            .expect("store");
        backend.remove(&stored.object).await.expect("remove");
        assert!(!backend.op.exists(&stored.object.id).await.expect("stat"));
    }

    #[tokio::test]
    async fn enforces_the_upload_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = fs_backend(dir.path(), Some(64));

        let err = backend
            .store(part("big.png", vec![0u8; 200]))
            .await
            .expect_err("over the cap");
        assert!(matches!(err, StorageError::PayloadTooLarge { limit: 64 }));
    }
}
