//! Core data models for the media storage gateway.
//!
//! `StoredObject` is the backend-neutral view of a persisted asset; the
//! `files`/`chunks` row types map to the local chunk store's tables via
//! `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod chunk;
pub mod file;
pub mod object;
