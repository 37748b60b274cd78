//! MongoDB backend.
//!
//! Documents are stored as BSON, keyed by a string `_id`. Physical
//! collection names follow [`NamingRules::MONGODB`](crate::tenant::NamingRules::MONGODB)
//! (`tenant.type`). This backend honors [`IndexSpec`](crate::types::IndexSpec)
//! but has no change feed.
//!
//! # Example
//!
//! ```no_run
//! use neutrino_persistence::backends::mongodb::{MongoBackend, MongoBackendConfig};
//!
//! let backend = MongoBackend::new("mongodb://localhost:27017", MongoBackendConfig::default());
//! ```

mod backend;
mod convert;
mod storage;

pub use backend::{ID_FIELD, MongoBackend, MongoBackendConfig, MongoConnector};
