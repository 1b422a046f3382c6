//! The ingestion gateway: `POST /upload`.
//!
//! Accepts one multipart file part per request, streams it into the active
//! storage backend, and returns the canonical URL (plus the resolver's
//! thumbnail variant). Backend errors pass through in kind; a request that
//! aborts after a part was stored rolls the stored object back best-effort.

use crate::errors::ApiError;
use crate::services::backend::{StoredUpload, UploadPart};
use crate::state::AppState;
use crate::transform;
use axum::{Json, extract::Multipart, extract::State};
use futures::StreamExt as _;
use serde::Serialize;
use std::io;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Canonical URL of the stored object; opaque to callers.
    pub url: String,
    /// The same URL with the configured quality token injected after the
    /// transform segment, when one is present.
    pub thumbnail_url: String,
}

/// Handle `POST /upload`: multipart form with a single field named `file`.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut stored: Option<StoredUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadMultipart(err.to_string()))?
    {
        let is_file = field.file_name().is_some() || field.name() == Some("file");
        if !is_file {
            // ordinary form fields ride along and are ignored
            continue;
        }

        if let Some(previous) = stored.take() {
            // a second file part aborts the request; the part already
            // stored must not stay addressable
            if let Err(err) = state.backend.remove(&previous.object).await {
                warn!(
                    filename = %previous.object.filename,
                    %err,
                    "rollback of aborted upload failed; object may be leaked"
                );
            }
            return Err(ApiError::TooManyParts);
        }

        let filename = field.file_name().unwrap_or("file").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        info!(%filename, %content_type, "ingesting upload");

        let data = futures::stream::try_unfold(field, |mut field| async move {
            match field.chunk().await {
                Ok(Some(bytes)) => Ok(Some((bytes, field))),
                Ok(None) => Ok(None),
                Err(err) => Err(io::Error::new(io::ErrorKind::Other, err)),
            }
        })
        .boxed();
        let upload = state
            .backend
            .store(UploadPart {
                filename,
                content_type,
                data,
            })
            .await?;
        stored = Some(upload);
    }

    let stored = stored.ok_or(ApiError::NoFile)?;
    let thumbnail_url = transform::with_quality(&stored.url, &state.thumbnail_quality);
    Ok(Json(UploadResponse {
        url: stored.url,
        thumbnail_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::routes::routes;
    use crate::services::chunk_store::ChunkStore;
    use crate::services::local_backend::LocalBackend;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::Value;
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "media-gateway-test-boundary";
    const PUBLIC_URL: &str = "http://localhost:5000";

    async fn test_state() -> (AppState, Arc<SqlitePool>) {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        let sql = include_str!("../../migrations/0001_init.sql");
        for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&db).await.expect("migration");
        }
        let db = Arc::new(db);
        let chunks = ChunkStore::new(db.clone(), 1024, None);
        let state = AppState {
            backend: Arc::new(LocalBackend::new(chunks, PUBLIC_URL)),
            db: Some(db.clone()),
            spool_dir: None,
            thumbnail_quality: "q_80".to_string(),
        };
        (state, db)
    }

    /// Hand-rolled multipart body: (field name, optional filename, bytes).
    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> (String, Vec<u8>) {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: image/jpeg\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={BOUNDARY}"), body)
    }

    async fn post_upload(state: AppState, parts: &[(&str, Option<&str>, &[u8])]) -> (StatusCode, Value) {
        let (content_type, body) = multipart_body(parts);
        let response = routes()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn uploads_then_serves_the_same_bytes() {
        let (state, _db) = test_state().await;
        let payload = vec![42u8; 3000];

        let (status, json) =
            post_upload(state.clone(), &[("file", Some("cat.jpg"), &payload)]).await;
        assert_eq!(status, StatusCode::OK);
        let url = json["url"].as_str().expect("url");
        assert!(url.starts_with(&format!("{PUBLIC_URL}/file/")));
        // local URLs carry no transform segment, so the thumbnail variant
        // is the same URL
        assert_eq!(json["thumbnail_url"], json["url"]);

        let path = url.strip_prefix(PUBLIC_URL).expect("path");
        let response = routes()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .uri(path)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/jpeg"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(bytes.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn rejects_requests_without_a_file_part() {
        let (state, _db) = test_state().await;
        let (status, json) =
            post_upload(state, &[("caption", None, b"just text".as_slice())]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "No file uploaded");
    }

    #[tokio::test]
    async fn rejects_a_second_file_part_and_rolls_back_the_first() {
        let (state, db) = test_state().await;
        let (status, _json) = post_upload(
            state,
            &[
                ("file", Some("one.jpg"), b"first".as_slice()),
                ("file", Some("two.jpg"), b"second".as_slice()),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&*db)
            .await
            .expect("count");
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&*db)
            .await
            .expect("count");
        assert_eq!((files, chunks), (0, 0));
    }

    #[tokio::test]
    async fn serving_an_unknown_filename_is_a_404() {
        let (state, _db) = test_state().await;
        let response = routes()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .uri("/file/no-such-file.jpg")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
