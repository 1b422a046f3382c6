use crate::services::backend::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Request-level errors of the ingestion gateway, plus pass-through of
/// backend failures. Rendered as the uniform JSON envelope
/// `{message, error?, status?}` at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file uploaded")]
    NoFile,

    #[error("Only a single `file` part may be uploaded per request")]
    TooManyParts,

    #[error("Malformed multipart request: {0}")]
    BadMultipart(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, upstream_status, detail) = match &self {
            ApiError::NoFile | ApiError::TooManyParts | ApiError::BadMultipart(_) => {
                (StatusCode::BAD_REQUEST, None, None)
            }
            ApiError::Storage(StorageError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, None, None)
            }
            ApiError::Storage(StorageError::PayloadTooLarge { .. }) => {
                (StatusCode::PAYLOAD_TOO_LARGE, None, None)
            }
            ApiError::Storage(StorageError::CorruptObject { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, None, None)
            }
            ApiError::Storage(StorageError::Unavailable(msg)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, None, Some(msg.clone()))
            }
            // diagnostic passthrough: the upstream status and body are
            // intentionally part of the response for operability
            ApiError::Storage(StorageError::UpstreamUpload { status, detail }) => {
                (StatusCode::BAD_GATEWAY, *status, detail.clone())
            }
        };

        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let mut body = json!({ "message": self.to_string() });
        if let Some(detail) = detail {
            body["error"] = json!(detail);
        }
        if let Some(code) = upstream_status {
            body["status"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
