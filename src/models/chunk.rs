#![allow(dead_code)]
//! A fixed-size slice of a stored object's payload.

use sqlx::FromRow;
use uuid::Uuid;

/// One row of the `chunks` table.
///
/// Concatenating the chunks of a file in ascending `seq` order reproduces
/// the original byte stream exactly; only the last chunk may be short.
#[derive(Clone, FromRow, Debug)]
pub struct Chunk {
    /// Parent file id.
    pub file_id: Uuid,

    /// 0-based position within the file.
    pub seq: i64,

    /// Raw payload slice.
    pub data: Vec<u8>,
}
