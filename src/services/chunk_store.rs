//! src/services/chunk_store.rs
//!
//! ChunkStore — durable segmented storage for binary objects over SQLite.
//! Each object becomes one `files` metadata row plus a run of fixed-size
//! `chunks` rows keyed by `(file_id, seq)`. The metadata row is written
//! last, so a partially-written object is never addressable; any chunks
//! written before a failure are deleted before the error is surfaced.

use crate::models::chunk::Chunk;
use crate::models::file::FileRecord;
use crate::services::backend::{ByteStream, StorageError, StorageResult};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default chunk size, 255 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Segmented blob store backed by the shared SQLite pool.
#[derive(Clone)]
pub struct ChunkStore {
    db: Arc<SqlitePool>,
    chunk_size: usize,
    max_bytes: Option<u64>,
}

impl ChunkStore {
    pub fn new(db: Arc<SqlitePool>, chunk_size: usize, max_bytes: Option<u64>) -> Self {
        Self {
            db,
            chunk_size: chunk_size.max(1),
            max_bytes,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Stream an object into the store under `filename`.
    ///
    /// Reads the incoming stream in chunk-sized blocks, writing each block
    /// as a `chunks` row, then commits the `files` metadata row with the
    /// final byte count and md5. On any failure (stream error, size cap,
    /// database error, or cancellation of the calling task) chunks already
    /// written for this object are rolled back.
    pub async fn store(
        &self,
        filename: &str,
        content_type: &str,
        mut data: ByteStream<'_>,
    ) -> StorageResult<FileRecord> {
        let id = Uuid::new_v4();
        let guard = RollbackGuard::new(self.db.clone(), id);

        let (length, digest) = match self.write_chunks(id, &mut data).await {
            Ok(written) => written,
            Err(err) => {
                guard.rollback().await;
                return Err(err);
            }
        };

        let record = FileRecord {
            id,
            filename: filename.to_string(),
            length,
            chunk_size: self.chunk_size as i64,
            content_type: content_type.to_string(),
            upload_date: Utc::now(),
            md5: Some(format!("{:x}", digest)),
        };

        let inserted = sqlx::query(
            "INSERT INTO files (id, filename, length, chunk_size, content_type, upload_date, md5)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.filename)
        .bind(record.length)
        .bind(record.chunk_size)
        .bind(&record.content_type)
        .bind(record.upload_date)
        .bind(&record.md5)
        .execute(&*self.db)
        .await;

        match inserted {
            Ok(_) => {
                guard.disarm();
                debug!(
                    filename = %record.filename,
                    length = record.length,
                    "committed chunked object"
                );
                Ok(record)
            }
            Err(err) => {
                guard.rollback().await;
                Err(err.into())
            }
        }
    }

    async fn write_chunks(
        &self,
        file_id: Uuid,
        data: &mut ByteStream<'_>,
    ) -> StorageResult<(i64, md5::Digest)> {
        let mut buf = BytesMut::with_capacity(self.chunk_size);
        let mut digest = md5::Context::new();
        let mut seq = 0i64;
        let mut length = 0i64;

        while let Some(next) = data.next().await {
            let bytes = next?;
            length += bytes.len() as i64;
            if let Some(limit) = self.max_bytes {
                if length as u64 > limit {
                    return Err(StorageError::PayloadTooLarge { limit });
                }
            }
            digest.consume(&bytes);
            buf.extend_from_slice(&bytes);
            while buf.len() >= self.chunk_size {
                let chunk = buf.split_to(self.chunk_size).freeze();
                self.insert_chunk(file_id, seq, &chunk).await?;
                seq += 1;
            }
        }
        if !buf.is_empty() {
            let chunk = buf.split_to(buf.len()).freeze();
            self.insert_chunk(file_id, seq, &chunk).await?;
        }

        Ok((length, digest.compute()))
    }

    async fn insert_chunk(&self, file_id: Uuid, seq: i64, data: &Bytes) -> StorageResult<()> {
        sqlx::query("INSERT INTO chunks (file_id, seq, data) VALUES (?, ?, ?)")
            .bind(file_id)
            .bind(seq)
            .bind(data.as_ref())
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Fetch the metadata record for `filename`, if any.
    pub async fn metadata(&self, filename: &str) -> StorageResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT id, filename, length, chunk_size, content_type, upload_date, md5
             FROM files WHERE filename = ?",
        )
        .bind(filename)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Open an object for reading.
    ///
    /// Verifies the chunk run up front: a metadata record with missing or
    /// gapped chunks is `CorruptObject`, distinct from `NotFound`. The
    /// returned stream yields chunks strictly in ascending sequence order.
    pub async fn open(
        &self,
        filename: &str,
    ) -> StorageResult<(FileRecord, ByteStream<'static>)> {
        let record = self
            .metadata(filename)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                filename: filename.to_string(),
            })?;

        let expected = expected_chunks(record.length, record.chunk_size);
        let (count, max_seq): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(MAX(seq), -1) FROM chunks WHERE file_id = ?",
        )
        .bind(record.id)
        .fetch_one(&*self.db)
        .await?;

        if count != expected || max_seq + 1 != count {
            return Err(StorageError::CorruptObject {
                filename: filename.to_string(),
                reason: format!("expected {expected} chunks, found {count}"),
            });
        }

        let db = (*self.db).clone();
        let file_id = record.id;
        let data = futures::stream::try_unfold(0i64, move |seq| {
            let db = db.clone();
            async move {
                if seq >= expected {
                    return Ok(None);
                }
                let row = sqlx::query_as::<_, Chunk>(
                    "SELECT file_id, seq, data FROM chunks WHERE file_id = ? AND seq = ?",
                )
                .bind(file_id)
                .bind(seq)
                .fetch_optional(&db)
                .await
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
                match row {
                    Some(chunk) => Ok(Some((Bytes::from(chunk.data), seq + 1))),
                    None => Err(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("chunk {seq} vanished mid-read"),
                    )),
                }
            }
        })
        .boxed();

        Ok((record, data))
    }

    /// Delete an object: the metadata row first, so the object stops being
    /// addressable, then its chunks en masse.
    pub async fn delete(&self, filename: &str) -> StorageResult<()> {
        let record = self
            .metadata(filename)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                filename: filename.to_string(),
            })?;

        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(record.id)
            .execute(&*self.db)
            .await?;
        delete_chunks(&self.db, record.id).await?;
        Ok(())
    }
}

fn expected_chunks(length: i64, chunk_size: i64) -> i64 {
    if length == 0 {
        0
    } else {
        (length + chunk_size - 1) / chunk_size
    }
}

async fn delete_chunks(db: &SqlitePool, file_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM chunks WHERE file_id = ?")
        .bind(file_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Scoped rollback for in-flight chunk writes.
///
/// Armed on creation; `disarm` once the metadata row has committed. The
/// explicit `rollback` path deletes written chunks before the caller
/// surfaces its error. If the owning future is dropped instead (a client
/// disconnect cancelling the request task), `Drop` spawns the same
/// deletion.
struct RollbackGuard {
    db: Arc<SqlitePool>,
    file_id: Uuid,
    armed: bool,
}

impl RollbackGuard {
    fn new(db: Arc<SqlitePool>, file_id: Uuid) -> Self {
        Self {
            db,
            file_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn rollback(mut self) {
        self.armed = false;
        if let Err(err) = delete_chunks(&self.db, self.file_id).await {
            warn!(file_id = %self.file_id, %err, "failed to roll back partial chunks");
        }
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if self.armed {
            let db = self.db.clone();
            let file_id = self.file_id;
            tokio::spawn(async move {
                if let Err(err) = delete_chunks(&db, file_id).await {
                    warn!(%file_id, %err, "failed to roll back partial chunks after cancellation");
                }
            });
        }
    }
}
