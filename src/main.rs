use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
mod transform;

use config::{AppConfig, BackendKind};
use services::backend::StorageBackend;
use services::chunk_store::ChunkStore;
use services::cloud_backend::{CloudBackend, S3Settings};
use services::local_backend::LocalBackend;
use services::proxy_backend::ProxyBackend;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(backend = ?cfg.backend, addr = %cfg.addr(), "starting media-gateway");

    // --- Initialize SQLite connection (local metadata only) ---
    let db = if cfg.backend == BackendKind::Local || migrate {
        Some(Arc::new(connect_db(&cfg.database_url).await?))
    } else {
        None
    };

    // --- Handle migration mode ---
    if migrate {
        if let Some(db) = &db {
            run_migrations(db).await?;
            tracing::info!("Database migration complete.");
        }
        return Ok(()); // exit after migration
    }

    // --- Select the storage backend for this deployment ---
    let backend = build_backend(&cfg, db.clone())?;
    let spool_dir = (cfg.backend == BackendKind::Proxy).then(|| cfg.spool_dir.clone());

    // --- Build router ---
    let app_state = AppState {
        backend,
        db,
        spool_dir,
        thumbnail_quality: cfg.thumbnail_quality.clone(),
    };
    let app: Router = routes::routes::routes().with_state(app_state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the SQLite pool, creating the database's parent directory first.
async fn connect_db(database_url: &str) -> Result<sqlx::SqlitePool> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // Try opening manually before SQLx
    match fs::OpenOptions::new().create(true).write(true).open(db_path) {
        Ok(_) => tracing::debug!("File can be created/opened successfully."),
        Err(e) => tracing::warn!("Failed to open file manually: {}", e),
    }

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(db)
}

/// Construct the configured storage backend. The rest of the system only
/// ever sees the trait object.
fn build_backend(
    cfg: &AppConfig,
    db: Option<Arc<sqlx::SqlitePool>>,
) -> Result<Arc<dyn StorageBackend>> {
    match cfg.backend {
        BackendKind::Local => {
            let db = db.context("local backend requires a database pool")?;
            let chunks = ChunkStore::new(db, cfg.chunk_size, cfg.max_upload_bytes);
            Ok(Arc::new(LocalBackend::new(chunks, cfg.public_url.clone())))
        }
        BackendKind::Proxy => {
            let upstream_url = cfg
                .upstream_url
                .clone()
                .context("MEDIA_GATEWAY_UPSTREAM_URL is required for the proxy backend")?;
            let api_key = cfg
                .upstream_api_key
                .clone()
                .context("MEDIA_GATEWAY_UPSTREAM_API_KEY is required for the proxy backend")?;
            let backend = ProxyBackend::new(
                upstream_url,
                api_key,
                cfg.upstream_timeout_secs,
                cfg.spool_dir.clone(),
                cfg.max_upload_bytes,
            )?;
            Ok(Arc::new(backend))
        }
        BackendKind::Cloud => {
            let settings = S3Settings {
                endpoint: require(&cfg.s3_endpoint, "MEDIA_GATEWAY_S3_ENDPOINT")?,
                bucket: require(&cfg.s3_bucket, "MEDIA_GATEWAY_S3_BUCKET")?,
                region: require(&cfg.s3_region, "MEDIA_GATEWAY_S3_REGION")?,
                access_key_id: require(&cfg.s3_access_key_id, "MEDIA_GATEWAY_S3_ACCESS_KEY_ID")?,
                secret_access_key: require(
                    &cfg.s3_secret_access_key,
                    "MEDIA_GATEWAY_S3_SECRET_ACCESS_KEY",
                )?,
            };
            let public_url = require(&cfg.s3_public_url, "MEDIA_GATEWAY_S3_PUBLIC_URL")?;
            let backend = CloudBackend::from_s3(
                &settings,
                public_url,
                cfg.s3_folder.clone(),
                cfg.max_upload_bytes,
            )?;
            Ok(Arc::new(backend))
        }
    }
}

fn require(value: &Option<String>, key: &str) -> Result<String> {
    value
        .clone()
        .with_context(|| format!("{key} is required for the cloud backend"))
}

/// Run SQLite migrations manually from the embedded SQL file.
async fn run_migrations(db: &Arc<sqlx::SqlitePool>) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
