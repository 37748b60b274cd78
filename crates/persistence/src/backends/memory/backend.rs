//! In-memory backend implementation.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use super::cluster::{MemoryCluster, MissingCollection};
use crate::core::{
    Backend, BackendCapability, BackendKind, ConnectionHandle, ConnectionManager, Connector,
    OperationContext,
};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::tenant::NamingRules;
use crate::types::CollectionRef;

pub(crate) const BACKEND_NAME: &str = "memory";

/// Identifier field used by the in-memory backend.
pub const ID_FIELD: &str = "id";

/// Scheme accepted by [`MemoryConnector`].
pub const MEMORY_SCHEME: &str = "memory://";

/// Opens [`MemoryCluster`]s for `memory://<name>` connection strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryConnector;

#[async_trait]
impl Connector for MemoryConnector {
    type Session = MemoryCluster;

    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn connect(&self, connection_string: &str) -> Result<MemoryCluster, BackendError> {
        if !connection_string.starts_with(MEMORY_SCHEME) {
            return Err(BackendError::ConnectionFailed {
                backend_name: BACKEND_NAME.to_string(),
                message: format!(
                    "unsupported connection string '{connection_string}', expected {MEMORY_SCHEME}<name>"
                ),
            });
        }
        Ok(MemoryCluster::new())
    }
}

/// In-process document storage with change feeds.
///
/// Behaves like the networked backends (lazy connection, provisioning,
/// not-found policy, change feed semantics) without any I/O, which makes it
/// the backend of choice for tests and local development.
///
/// # Example
///
/// ```
/// use neutrino_persistence::backends::memory::MemoryBackend;
/// use neutrino_persistence::core::{Backend, BackendCapability};
///
/// let backend = MemoryBackend::new();
/// assert!(backend.supports(BackendCapability::ChangeFeed));
/// ```
pub struct MemoryBackend {
    connection_string: String,
    connections: Arc<ConnectionManager<MemoryConnector>>,
}

impl Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("connection_string", &self.connection_string)
            .field("connections", &self.connections)
            .finish()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates a backend on `memory://default` with its own connection cache.
    pub fn new() -> Self {
        Self::with_connection_string(format!("{MEMORY_SCHEME}default"))
    }

    /// Creates a backend on the given `memory://` connection string.
    pub fn with_connection_string(connection_string: impl Into<String>) -> Self {
        Self::with_connections(
            connection_string,
            Arc::new(ConnectionManager::new(MemoryConnector)),
        )
    }

    /// Creates a backend that shares an existing connection cache.
    ///
    /// Backends sharing a cache and a connection string see the same data.
    pub fn with_connections(
        connection_string: impl Into<String>,
        connections: Arc<ConnectionManager<MemoryConnector>>,
    ) -> Self {
        Self {
            connection_string: connection_string.into(),
            connections,
        }
    }

    /// The connection cache used by this backend.
    pub fn connections(&self) -> &Arc<ConnectionManager<MemoryConnector>> {
        &self.connections
    }

    /// The connection string this backend targets.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub(crate) async fn handle(&self) -> StorageResult<Arc<ConnectionHandle<MemoryCluster>>> {
        self.connections.acquire(&self.connection_string).await
    }

    /// Acquires the connection and provisions `collection`.
    pub(crate) async fn prepare(
        &self,
        collection: &CollectionRef,
    ) -> StorageResult<Arc<ConnectionHandle<MemoryCluster>>> {
        let handle = self.handle().await?;
        let cluster = handle.session();
        handle
            .provisioner()
            .ensure(collection.database(), collection.name(), || async {
                if cluster.create_collection(collection.database(), collection.name()) {
                    tracing::info!(
                        backend = BACKEND_NAME,
                        collection = %collection,
                        "Created collection"
                    );
                }
                Ok(())
            })
            .await?;
        Ok(handle)
    }

    /// Drops a collection as an operator would, outside this layer.
    ///
    /// The provisioning memo is not updated; the next operation discovers the
    /// missing collection.
    pub async fn drop_collection(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
    ) -> StorageResult<bool> {
        ctx.run("drop_collection", async {
            let handle = self.handle().await?;
            Ok(handle
                .session()
                .drop_collection(collection.database(), collection.name()))
        })
        .await
    }
}

/// Maps a vanished collection to a backend error and forgets its provisioning.
pub(crate) fn missing_collection(
    handle: &ConnectionHandle<MemoryCluster>,
    collection: &CollectionRef,
    _: MissingCollection,
) -> StorageError {
    handle
        .provisioner()
        .invalidate(collection.database(), collection.name());
    StorageError::Backend(BackendError::QueryError {
        message: format!("collection {collection} does not exist"),
    })
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn capabilities(&self) -> Vec<BackendCapability> {
        vec![
            BackendCapability::Crud,
            BackendCapability::Projection,
            BackendCapability::ChangeFeed,
        ]
    }

    fn id_field(&self) -> &'static str {
        ID_FIELD
    }

    fn naming_rules(&self) -> &NamingRules {
        &NamingRules::MONGODB
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        match self.handle().await {
            Ok(_) => Ok(()),
            Err(StorageError::Backend(err)) => Err(err),
            Err(err) => Err(BackendError::Unavailable {
                backend_name: BACKEND_NAME.to_string(),
                message: err.to_string(),
            }),
        }
    }
}
