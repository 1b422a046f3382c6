//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks whatever the active deployment
//!   depends on: the metadata database when one is attached, and the spool
//!   directory when the proxy variant stages uploads on disk.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Returns JSON describing each applicable check. HTTP 200 when all checks
/// pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = HashMap::new();

    if let Some(db) = &state.db {
        let (ok, error) = match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&**db).await {
            Ok(1) => (true, None),
            Ok(v) => (false, Some(format!("unexpected result: {v}"))),
            Err(e) => (false, Some(format!("error: {e}"))),
        };
        checks.insert("sqlite", CheckStatus { ok, error });
    }

    if let Some(spool_dir) = &state.spool_dir {
        // best-effort write/read/delete round-trip in the spool directory
        let tmp_path = spool_dir.join(format!(".readyz-{}", Uuid::new_v4()));
        let (ok, error) = match fs::write(&tmp_path, b"readyz").await {
            Ok(_) => match fs::read(&tmp_path).await {
                Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                    Ok(_) => (true, None),
                    Err(e) => (true, Some(format!("could not remove tmp file: {e}"))),
                },
                Ok(_) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some("file content mismatch".to_string()))
                }
                Err(e) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some(format!("could not read tmp file: {e}")))
                }
            },
            Err(e) => (false, Some(format!("could not write tmp file: {e}"))),
        };
        checks.insert("spool", CheckStatus { ok, error });
    }

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
