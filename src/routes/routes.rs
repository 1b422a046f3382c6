//! Defines the gateway's HTTP routes.
//!
//! ## Structure
//! - `POST /upload`          — multipart upload through the active backend
//! - `GET  /file/{filename}` — stream stored bytes (local-backend deployments)
//! - `GET  /healthz`         — liveness
//! - `GET  /readyz`          — readiness
//!
//! The router carries shared state (`AppState`) to all handlers.

use crate::{
    handlers::{
        file_handlers::serve_file,
        health_handlers::{healthz, readyz},
        upload_handlers::upload_file,
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the gateway surface.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // ingestion and serving
        .route("/upload", post(upload_file))
        .route("/file/{filename}", get(serve_file))
}
