//! In-memory backend.
//!
//! A complete implementation of the storage contract, including change feeds,
//! that keeps documents in process memory. Each `memory://<name>` connection
//! string maps to one [`MemoryCluster`].

mod backend;
mod changes;
mod cluster;
mod storage;

pub use backend::{ID_FIELD, MEMORY_SCHEME, MemoryBackend, MemoryConnector};
pub use cluster::MemoryCluster;
