//! Core storage traits and abstractions.
//!
//! This module provides the foundational pieces of the persistence layer:
//!
//! - [`Backend`] - Backend description (kind, capabilities, naming)
//! - [`DocumentStorage`] - Uniform CRUD operations
//! - [`ChangeFeedProvider`] / [`Subscription`] - Cancellable live change feeds
//! - [`ConnectionManager`] - One cached session per connection string
//! - [`CollectionProvisioner`] - Memoized collection and index creation
//! - [`OperationContext`] - Deadlines and cancellation for every call
//!
//! # Trait Hierarchy
//!
//! ```text
//! Backend
//!     └── DocumentStorage
//!             └── change_feed() -> Option<&dyn ChangeFeedProvider>
//! ```
//!
//! Backends share no code, only these contracts.
//!
//! # Example: Implementing a Storage Backend
//!
//! ```ignore
//! use async_trait::async_trait;
//! use neutrino_persistence::core::{Backend, DocumentStorage, OperationContext};
//! use neutrino_persistence::types::{CollectionRef, Document};
//! use neutrino_persistence::error::StorageResult;
//!
//! #[derive(Debug)]
//! struct MyBackend {
//!     // ... backend-specific fields
//! }
//!
//! #[async_trait]
//! impl DocumentStorage for MyBackend {
//!     async fn insert(
//!         &self,
//!         ctx: &OperationContext,
//!         collection: &CollectionRef,
//!         doc: Document,
//!     ) -> StorageResult<Document> {
//!         // Implementation...
//!         todo!()
//!     }
//!
//!     // ... implement other required methods
//! }
//! ```

pub mod backend;
pub mod changes;
pub mod connection;
pub mod context;
pub mod provision;
pub mod storage;

// Re-export main types
pub use backend::{Backend, BackendCapability, BackendKind};
pub use changes::{ChangeCursor, ChangeFeedProvider, Subscription};
pub use connection::{ConnectionHandle, ConnectionManager, Connector, redact_connection_string};
pub use context::OperationContext;
pub use provision::CollectionProvisioner;
pub use storage::DocumentStorage;
