//! File serving: `GET /file/{filename}`.
//!
//! Streams object bytes back out of the active backend with the recorded
//! content type. Only local-backend deployments resolve anything here;
//! proxy and cloud deployments serve bytes from their own public URLs and
//! uniformly miss.

use crate::errors::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};

pub async fn serve_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let object = state.backend.retrieve(&filename).await?;

    let mut response = Response::new(Body::from_stream(object.data));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&object.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&object.length.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    Ok(response)
}
