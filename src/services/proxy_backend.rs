//! Forward-proxy storage variant.
//!
//! Does not persist bytes itself: the upload is spooled to a local temp
//! file, re-emitted as a multipart request with a bearer credential to the
//! external media service, and that service's URL is returned. The spool
//! file is a scoped resource: `NamedTempFile` deletes it on every exit
//! path, success, upstream failure, or cancellation alike.

use crate::models::object::StoredObject;
use crate::services::backend::{
    ByteStream, StorageBackend, StorageError, StorageResult, StoredUpload, UploadPart,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

pub struct ProxyBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    spool_dir: PathBuf,
    max_bytes: Option<u64>,
}

/// Upstream response: `{ success: true, files: [{ url: "/t/..." }] }`.
#[derive(Debug, Deserialize)]
struct UpstreamResponse {
    #[serde(default)]
    files: Vec<UpstreamFile>,
}

#[derive(Debug, Deserialize)]
struct UpstreamFile {
    url: String,
}

impl ProxyBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
        spool_dir: impl Into<PathBuf>,
        max_bytes: Option<u64>,
    ) -> anyhow::Result<Self> {
        let spool_dir = spool_dir.into();
        std::fs::create_dir_all(&spool_dir)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            spool_dir,
            max_bytes,
        })
    }

    /// Buffer the incoming stream to a spool file so the outbound request
    /// carries a known length. Returns the guard owning the file.
    async fn spool(&self, data: &mut ByteStream<'_>) -> StorageResult<(NamedTempFile, u64)> {
        let spool = NamedTempFile::new_in(&self.spool_dir)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(spool.path())
            .await?;

        let mut written = 0u64;
        while let Some(next) = data.next().await {
            let bytes = next?;
            written += bytes.len() as u64;
            if let Some(limit) = self.max_bytes {
                if written > limit {
                    return Err(StorageError::PayloadTooLarge { limit });
                }
            }
            file.write_all(&bytes).await?;
        }
        file.flush().await?;

        Ok((spool, written))
    }
}

#[async_trait]
impl StorageBackend for ProxyBackend {
    async fn store(&self, part: UploadPart<'_>) -> StorageResult<StoredUpload> {
        let mut data = part.data;
        let (spool, size) = self.spool(&mut data).await?;

        debug!(
            filename = %part.filename,
            content_type = %part.content_type,
            size,
            "relaying upload to media service"
        );

        let reader = tokio::fs::File::open(spool.path()).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(reader));
        let file_part = Part::stream_with_length(body, size)
            .file_name(part.filename.clone())
            .mime_str(&part.content_type)
            .map_err(|err| {
                StorageError::Unavailable(format!(
                    "declared content type `{}` is not a valid MIME type: {err}",
                    part.content_type
                ))
            })?;

        // the external service expects the field to be named `files`
        let form = Form::new().part("files", file_part);
        let response = self
            .http
            .post(format!("{}/api/upload", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|err| StorageError::UpstreamUpload {
                status: None,
                detail: Some(err.to_string()),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.ok().filter(|body| !body.is_empty());
            return Err(StorageError::UpstreamUpload {
                status: Some(status.as_u16()),
                detail,
            });
        }

        let parsed: UpstreamResponse =
            response
                .json()
                .await
                .map_err(|err| StorageError::UpstreamUpload {
                    status: Some(status.as_u16()),
                    detail: Some(err.to_string()),
                })?;
        let url = parsed
            .files
            .into_iter()
            .next()
            .map(|file| file.url)
            .ok_or_else(|| StorageError::UpstreamUpload {
                status: Some(status.as_u16()),
                detail: Some("no URL in upstream response".to_string()),
            })?;

        // the service often returns a relative path like /t/<name>
        let url = if url.starts_with("http") {
            url
        } else {
            format!("{}{}", self.base_url, url)
        };
        let filename = url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        // error paths rely on the guard's drop; here we can report a
        // failed cleanup, which never overrides the upload outcome
        if let Err(err) = spool.close() {
            warn!(%err, "failed to remove spool file");
        }

        Ok(StoredUpload {
            object: StoredObject {
                id: filename.clone(),
                filename,
                size_bytes: size as i64,
                content_type: part.content_type,
                created_at: Utc::now(),
            },
            url,
        })
    }

    async fn remove(&self, object: &StoredObject) -> StorageResult<()> {
        // the external service exposes no deletion API; accept the leak
        warn!(
            filename = %object.filename,
            "cannot remove object from upstream media service; leaving it in place"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use bytes::Bytes;
    use serde_json::{json, Value};

    async fn spawn_upstream(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }

    fn part(filename: &str, data: Vec<u8>) -> UploadPart<'static> {
        UploadPart {
            filename: filename.to_string(),
            content_type: "image/jpeg".to_string(),
            data: futures::stream::once(async move { Ok(Bytes::from(data)) }).boxed(),
        }
    }

    fn spool_entries(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).expect("read spool dir").count()
    }

    async fn backend_for(base_url: &str, timeout_secs: u64) -> (ProxyBackend, tempfile::TempDir) {
        let spool = tempfile::tempdir().expect("spool dir");
        let backend = ProxyBackend::new(base_url, "secret-key", timeout_secs, spool.path(), None)
            .expect("backend");
        (backend, spool)
    }

    #[tokio::test]
    async fn relays_and_absolutizes_the_upstream_url() {
        let app = Router::new().route(
            "/api/upload",
            post(|headers: HeaderMap| async move {
                if headers.get("authorization").and_then(|v| v.to_str().ok())
                    != Some("Bearer secret-key")
                {
                    return (StatusCode::UNAUTHORIZED, Json(json!({})));
                }
                (
                    StatusCode::OK,
                    Json(json!({ "success": true, "files": [{ "url": "/t/remote-42.jpg" }] })),
                )
            }),
        );
        let base = spawn_upstream(app).await;
        let (backend, spool) = backend_for(&base, 30).await;

        let stored = backend
            .store(part("cat.jpg", vec![5u8; 1000]))
            .await
            .expect("store");
        assert_eq!(stored.url, format!("{base}/t/remote-42.jpg"));
        assert_eq!(stored.object.filename, "remote-42.jpg");
        assert_eq!(stored.object.size_bytes, 1000);
        assert_eq!(spool_entries(spool.path()), 0);
    }

    #[tokio::test]
    async fn surfaces_upstream_failures_with_status_and_cleans_the_spool() {
        let app = Router::new().route(
            "/api/upload",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") }),
        );
        let base = spawn_upstream(app).await;
        let (backend, spool) = backend_for(&base, 30).await;

        let err = backend
            .store(part("cat.jpg", vec![5u8; 100]))
            .await
            .expect_err("upstream 500 must fail the upload");
        match err {
            StorageError::UpstreamUpload { status, detail } => {
                assert_eq!(status, Some(500));
                assert_eq!(detail.as_deref(), Some("upstream exploded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(spool_entries(spool.path()), 0);
    }

    #[tokio::test]
    async fn treats_timeouts_as_upstream_failures() {
        let app = Router::new().route(
            "/api/upload",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        );
        let base = spawn_upstream(app).await;
        let (backend, spool) = backend_for(&base, 1).await;

        let err = backend
            .store(part("cat.jpg", vec![5u8; 100]))
            .await
            .expect_err("timeout must fail the upload");
        assert!(matches!(
            err,
            StorageError::UpstreamUpload { status: None, .. }
        ));
        assert_eq!(spool_entries(spool.path()), 0);
    }

    #[tokio::test]
    async fn rejects_responses_without_a_url() {
        let app = Router::new().route(
            "/api/upload",
            post(|| async { Json(json!({ "success": true, "files": Vec::<Value>::new() })) }),
        );
        let base = spawn_upstream(app).await;
        let (backend, _spool) = backend_for(&base, 30).await;

        let err = backend
            .store(part("cat.jpg", vec![5u8; 10]))
            .await
            .expect_err("missing URL must fail the upload");
        assert!(matches!(
            err,
            StorageError::UpstreamUpload {
                status: Some(200),
                ..
            }
        ));
    }
}
