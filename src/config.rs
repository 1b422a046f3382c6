use crate::services::chunk_store::DEFAULT_CHUNK_SIZE;
use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Which storage variant this deployment runs. Selection happens once at
/// startup; the gateway itself never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// Chunked store in the local SQLite database, served by this process.
    Local,
    /// Forward-proxy to the external always-on media service.
    Proxy,
    /// S3-compatible cloud object store.
    Cloud,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "proxy" => Ok(Self::Proxy),
            "cloud" => Ok(Self::Cloud),
            other => Err(format!(
                "unknown storage backend `{other}` (expected local, proxy, or cloud)"
            )),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Externally reachable base URL used to build local file links.
    pub public_url: String,
    pub backend: BackendKind,
    pub chunk_size: usize,
    /// Optional upload size cap enforced by the active backend.
    pub max_upload_bytes: Option<u64>,
    /// Quality token the resolver injects for server-issued thumbnails.
    pub thumbnail_quality: String,
    pub upstream_url: Option<String>,
    pub upstream_api_key: Option<String>,
    pub upstream_timeout_secs: u64,
    /// Directory the proxy variant spools uploads into.
    pub spool_dir: PathBuf,
    pub s3_endpoint: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    /// Public (CDN) base the cloud bucket is served under.
    pub s3_public_url: Option<String>,
    pub s3_folder: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Media ingestion and storage gateway")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides MEDIA_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL for local file links (overrides MEDIA_GATEWAY_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Storage backend to run (overrides MEDIA_GATEWAY_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("MEDIA_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port: u16 = parse_env("MEDIA_GATEWAY_PORT", 5000)?;
        let env_db = env::var("MEDIA_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/media_gateway.db".into());
        let env_public =
            env::var("MEDIA_GATEWAY_PUBLIC_URL").unwrap_or_else(|_| "http://localhost:5000".into());
        let env_backend = match env_opt("MEDIA_GATEWAY_BACKEND") {
            Some(value) => value
                .parse::<BackendKind>()
                .map_err(anyhow::Error::msg)
                .context("reading MEDIA_GATEWAY_BACKEND")?,
            None => BackendKind::Local,
        };

        let chunk_size: usize = parse_env("MEDIA_GATEWAY_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        let max_upload_bytes = match env_opt("MEDIA_GATEWAY_MAX_UPLOAD_BYTES") {
            Some(value) => Some(value.parse::<u64>().with_context(|| {
                format!("parsing MEDIA_GATEWAY_MAX_UPLOAD_BYTES value `{value}`")
            })?),
            None => None,
        };
        let thumbnail_quality =
            env::var("MEDIA_GATEWAY_THUMBNAIL_QUALITY").unwrap_or_else(|_| "q_80".into());

        let upstream_timeout_secs: u64 = parse_env("MEDIA_GATEWAY_UPSTREAM_TIMEOUT_SECS", 30)?;
        let spool_dir = env_opt("MEDIA_GATEWAY_SPOOL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            public_url: args.public_url.unwrap_or(env_public),
            backend: args.backend.unwrap_or(env_backend),
            chunk_size,
            max_upload_bytes,
            thumbnail_quality,
            upstream_url: env_opt("MEDIA_GATEWAY_UPSTREAM_URL"),
            upstream_api_key: env_opt("MEDIA_GATEWAY_UPSTREAM_API_KEY"),
            upstream_timeout_secs,
            spool_dir,
            s3_endpoint: env_opt("MEDIA_GATEWAY_S3_ENDPOINT"),
            s3_bucket: env_opt("MEDIA_GATEWAY_S3_BUCKET"),
            s3_region: env_opt("MEDIA_GATEWAY_S3_REGION"),
            s3_access_key_id: env_opt("MEDIA_GATEWAY_S3_ACCESS_KEY_ID"),
            s3_secret_access_key: env_opt("MEDIA_GATEWAY_S3_SECRET_ACCESS_KEY"),
            s3_public_url: env_opt("MEDIA_GATEWAY_S3_PUBLIC_URL"),
            s3_folder: env::var("MEDIA_GATEWAY_S3_FOLDER").unwrap_or_else(|_| "uploads".into()),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {key} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {key}")),
    }
}
