//! Storage services: the backend capability trait, its three variants,
//! and the chunk store the local variant is built on.

pub mod backend;
pub mod chunk_store;
pub mod cloud_backend;
pub mod local_backend;
pub mod proxy_backend;
