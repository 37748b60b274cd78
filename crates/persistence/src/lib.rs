//! Neutrino Persistence Layer
//!
//! This crate provides a multi-tenant document storage abstraction. Every
//! tenant (a user, an application, or the system itself) sees its own logical
//! collections; the crate maps them onto physical collections of a single
//! backend database and exposes uniform CRUD operations and live change feeds.
//!
//! # Features
//!
//! - **Multiple Backends**: in-memory (always on), MongoDB, RethinkDB
//! - **Tenant Isolation**: injective, backend-safe physical collection names
//! - **Lazy Provisioning**: collections and indexes are created on first use
//! - **Change Feeds**: cancellable subscriptions that stream into a channel
//! - **Deadlines**: every call honors an [`OperationContext`](core::OperationContext)
//!
//! # Backend Features
//!
//! ```toml
//! [dependencies]
//! neutrino-persistence = { version = "0.1", features = ["rethinkdb"] }
//! ```
//!
//! - `mongodb` - MongoDB via the official driver
//! - `rethinkdb` - RethinkDB over its JSON wire protocol
//!
//! # Architecture
//!
//! - [`tenant`] - Tenant scopes and physical collection naming
//! - [`types`] - Documents, filters, projections, patches and change events
//! - [`error`] - Error types and their fatal/recoverable category
//! - [`core`] - Storage traits, connection cache, provisioner, change feed bridge
//! - [`backends`] - Backend implementations
//! - [`config`] - Configuration and logging setup
//! - [`store`] - Tenant-scoped handles over the configured backend
//!
//! # Quick Start
//!
//! ```
//! use neutrino_persistence::{OperationContext, StoreRegistry, TenantId};
//! use neutrino_persistence::types::{Filter, Patch, Projection};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let registry = StoreRegistry::memory("neutrino");
//! let orders = registry.scoped(&TenantId::new("acme"), "orders");
//! let ctx = OperationContext::background();
//!
//! let doc = json!({"id": "o1", "status": "open"}).as_object().cloned().unwrap();
//! orders.insert(&ctx, doc).await.unwrap();
//!
//! orders
//!     .update_id(&ctx, "o1", &Patch::new().set("status", "shipped"))
//!     .await
//!     .unwrap();
//!
//! let shipped = orders
//!     .find(&ctx, &Filter::eq("status", "shipped"), &Projection::all())
//!     .await
//!     .unwrap();
//! assert_eq!(shipped.len(), 1);
//! # });
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod store;
pub mod tenant;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{BackendSelection, StorageConfig, init_logging};
pub use error::{ErrorCategory, StorageError, StorageResult};
pub use store::{StoreHandle, StoreRegistry};
pub use tenant::TenantId;
pub use types::{ChangeEvent, ChangeKind, CollectionRef, Document};

// Re-export core traits
pub use core::{
    Backend, BackendCapability, BackendKind, ChangeFeedProvider, DocumentStorage,
    OperationContext, Subscription,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
