//! RethinkDB backend.
//!
//! Speaks the JSON wire protocol directly: a V1_0 handshake with
//! SCRAM-SHA-256 authentication, then token-multiplexed queries over a single
//! connection. Documents are keyed by a string `id`. Physical table names
//! follow [`NamingRules::RETHINKDB`](crate::tenant::NamingRules::RETHINKDB)
//! (`tenant_type`). Change feeds are supported; secondary indexes are not.
//!
//! # Example
//!
//! ```no_run
//! use neutrino_persistence::backends::rethinkdb::{RethinkBackend, RethinkBackendConfig};
//!
//! let backend = RethinkBackend::new("rethinkdb://localhost:28015", RethinkBackendConfig::default());
//! ```

mod backend;
mod changes;
mod protocol;
mod session;
mod storage;
mod term;

pub use backend::{DEFAULT_PORT, ID_FIELD, RethinkBackend, RethinkBackendConfig, RethinkConnector};
pub use session::RethinkSession;
