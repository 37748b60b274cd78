//! Database backend implementations.
//!
//! This module contains implementations of the storage traits for the
//! supported document stores. The networked backends are gated behind
//! feature flags.
//!
//! # Available Backends
//!
//! | Backend | Feature | Id field | Description |
//! |---------|---------|----------|-------------|
//! | Memory | always on | `id` | In-process store with change feeds, for tests and development |
//! | MongoDB | `mongodb` | `_id` | Document store with secondary indexes |
//! | RethinkDB | `rethinkdb` | `id` | Document store with live change feeds |
//!
//! # Example
//!
//! ```no_run
//! use neutrino_persistence::backends::memory::MemoryBackend;
//!
//! # #[cfg(feature = "mongodb")]
//! use neutrino_persistence::backends::mongodb::{MongoBackend, MongoBackendConfig};
//!
//! // In-process store
//! let backend = MemoryBackend::new();
//!
//! // Or a MongoDB deployment
//! # #[cfg(feature = "mongodb")]
//! let backend = MongoBackend::new("mongodb://localhost:27017", MongoBackendConfig::default());
//! ```

pub mod memory;

#[cfg(feature = "mongodb")]
pub mod mongodb;

#[cfg(feature = "rethinkdb")]
pub mod rethinkdb;
