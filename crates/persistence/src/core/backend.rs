//! Backend abstraction.
//!
//! This module defines the [`Backend`] trait, the part of every storage
//! backend that describes it rather than executes operations: its kind, its
//! capabilities, its identifier field, and its collection naming rules.
//! [`DocumentStorage`](super::DocumentStorage) builds on it.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::tenant::NamingRules;

/// Identifies the type of storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process simulation backend.
    Memory,
    /// MongoDB (document store).
    MongoDB,
    /// RethinkDB (document store with change feeds).
    RethinkDB,
    /// Custom or unknown backend.
    Custom(&'static str),
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::MongoDB => write!(f, "mongodb"),
            BackendKind::RethinkDB => write!(f, "rethinkdb"),
            BackendKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Capabilities that a backend may support.
///
/// Used for runtime capability discovery before optional operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCapability {
    /// Basic CRUD operations.
    Crud,
    /// Field projection on reads.
    Projection,
    /// Live change feeds over filtered collections.
    ChangeFeed,
    /// Secondary (including unique and text) indexes.
    SecondaryIndexes,
}

impl std::fmt::Display for BackendCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendCapability::Crud => "crud",
            BackendCapability::Projection => "projection",
            BackendCapability::ChangeFeed => "change-feed",
            BackendCapability::SecondaryIndexes => "secondary-indexes",
        };
        write!(f, "{}", name)
    }
}

/// A storage backend.
///
/// # Example
///
/// ```ignore
/// use neutrino_persistence::core::{Backend, BackendCapability};
///
/// if backend.supports(BackendCapability::ChangeFeed) {
///     // Subscribe to live changes
/// } else {
///     // Poll instead
/// }
/// ```
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// Returns the kind of backend.
    fn kind(&self) -> BackendKind;

    /// Returns a human-readable name for this backend.
    fn name(&self) -> &'static str;

    /// Returns all capabilities supported by this backend.
    fn capabilities(&self) -> Vec<BackendCapability>;

    /// Checks if this backend supports the given capability.
    fn supports(&self, capability: BackendCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Name of the document identifier field (`_id` or `id`).
    fn id_field(&self) -> &'static str;

    /// Rules for turning logical collections into physical names.
    fn naming_rules(&self) -> &NamingRules;

    /// Checks that the backend is reachable, connecting if needed.
    async fn health_check(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Memory.to_string(), "memory");
        assert_eq!(BackendKind::MongoDB.to_string(), "mongodb");
        assert_eq!(BackendKind::RethinkDB.to_string(), "rethinkdb");
        assert_eq!(BackendKind::Custom("custom-db").to_string(), "custom-db");
    }

    #[test]
    fn test_backend_capability_display() {
        assert_eq!(BackendCapability::Crud.to_string(), "crud");
        assert_eq!(BackendCapability::ChangeFeed.to_string(), "change-feed");
        assert_eq!(
            BackendCapability::SecondaryIndexes.to_string(),
            "secondary-indexes"
        );
    }
}
