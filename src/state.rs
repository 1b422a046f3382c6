use crate::services::backend::StorageBackend;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared state handed to the router.
///
/// Explicitly constructed at startup and cloned into handlers; there is no
/// process-wide connection singleton. The pool is present only when the
/// local backend keeps its metadata in SQLite, and the spool directory only
/// when the forward-proxy variant stages uploads on disk.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn StorageBackend>,
    pub db: Option<Arc<SqlitePool>>,
    pub spool_dir: Option<PathBuf>,
    pub thumbnail_quality: String,
}
