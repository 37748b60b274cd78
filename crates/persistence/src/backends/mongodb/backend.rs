//! MongoDB backend implementation.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{self, Bson, doc};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};

use crate::core::{
    Backend, BackendCapability, BackendKind, ConnectionHandle, ConnectionManager, Connector,
};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::tenant::NamingRules;
use crate::types::{CollectionRef, IndexKind, IndexSpec};

pub(crate) const BACKEND_NAME: &str = "mongodb";

/// Identifier field used by MongoDB.
pub const ID_FIELD: &str = "_id";

pub(crate) const DUPLICATE_KEY: i32 = 11000;
const NAMESPACE_NOT_FOUND: i32 = 26;
const NAMESPACE_EXISTS: i32 = 48;

/// Configuration for the MongoDB backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoBackendConfig {
    /// Application name reported to the server (default: `"neutrino"`).
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Maximum connections in the driver pool (default: 10).
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,

    /// How long to wait for a usable server (default: 5000).
    #[serde(default = "default_server_selection_timeout_ms")]
    pub server_selection_timeout_ms: u64,

    /// Bound on the initial connect and ping (default: 5000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_app_name() -> String {
    "neutrino".to_string()
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_server_selection_timeout_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for MongoBackendConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            max_pool_size: default_max_pool_size(),
            server_selection_timeout_ms: default_server_selection_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Opens MongoDB clients and checks them with a `ping`.
#[derive(Debug, Clone)]
pub struct MongoConnector {
    config: MongoBackendConfig,
}

impl MongoConnector {
    /// Creates a connector with the given driver settings.
    pub fn new(config: MongoBackendConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for MongoConnector {
    type Session = Client;

    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn connect(&self, connection_string: &str) -> Result<Client, BackendError> {
        let mut options = ClientOptions::parse(connection_string)
            .await
            .map_err(connection_failed)?;
        options.app_name = Some(self.config.app_name.clone());
        options.max_pool_size = Some(self.config.max_pool_size);
        options.server_selection_timeout =
            Some(Duration::from_millis(self.config.server_selection_timeout_ms));
        options.connect_timeout = Some(Duration::from_millis(self.config.connect_timeout_ms));

        let client = Client::with_options(options).map_err(connection_failed)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(connection_failed)?;
        Ok(client)
    }
}

fn connection_failed(err: MongoError) -> BackendError {
    BackendError::ConnectionFailed {
        backend_name: BACKEND_NAME.to_string(),
        message: err.to_string(),
    }
}

/// MongoDB document storage.
///
/// Collections are created on first use together with their
/// [`IndexSpec`]. Every operation works on its own clone of the shared
/// [`Client`], which is dropped when the operation ends, however it ends.
pub struct MongoBackend {
    connection_string: String,
    connections: Arc<ConnectionManager<MongoConnector>>,
}

impl Debug for MongoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoBackend")
            .field(
                "connection_string",
                &crate::core::redact_connection_string(&self.connection_string),
            )
            .field("connections", &self.connections)
            .finish()
    }
}

impl MongoBackend {
    /// Creates a backend for `connection_string` with its own connection cache.
    pub fn new(connection_string: impl Into<String>, config: MongoBackendConfig) -> Self {
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let connections =
            ConnectionManager::new(MongoConnector::new(config)).with_connect_timeout(timeout);
        Self::with_connections(connection_string, Arc::new(connections))
    }

    /// Creates a backend that shares an existing connection cache.
    pub fn with_connections(
        connection_string: impl Into<String>,
        connections: Arc<ConnectionManager<MongoConnector>>,
    ) -> Self {
        Self {
            connection_string: connection_string.into(),
            connections,
        }
    }

    /// The connection cache used by this backend.
    pub fn connections(&self) -> &Arc<ConnectionManager<MongoConnector>> {
        &self.connections
    }

    /// Acquires the client and provisions `collection`.
    ///
    /// Returns the handle (for invalidation) and a collection bound to a
    /// fresh client clone.
    pub(crate) async fn prepare(
        &self,
        collection: &CollectionRef,
    ) -> StorageResult<(Arc<ConnectionHandle<Client>>, Collection<bson::Document>)> {
        let handle = self.connections.acquire(&self.connection_string).await?;
        let client = handle.session().clone();
        handle
            .provisioner()
            .ensure(collection.database(), collection.name(), || {
                provision(&client, collection)
            })
            .await?;

        let coll = client
            .database(collection.database())
            .collection::<bson::Document>(collection.name());
        Ok((handle, coll))
    }
}

async fn provision(client: &Client, collection: &CollectionRef) -> StorageResult<()> {
    let db = client.database(collection.database());
    let existing = db
        .list_collection_names()
        .filter(doc! { "name": collection.name() })
        .await?;

    if !existing.iter().any(|name| name == collection.name()) {
        match db.create_collection(collection.name()).await {
            Ok(()) => {
                tracing::info!(backend = BACKEND_NAME, collection = %collection, "Created collection");
            }
            Err(err) if error_code(&err) == Some(NAMESPACE_EXISTS) => {
                tracing::debug!(backend = BACKEND_NAME, collection = %collection, "Collection created concurrently");
            }
            Err(err) => return Err(err.into()),
        }
    }

    if let Some(index) = collection.index() {
        db.collection::<bson::Document>(collection.name())
            .create_index(index_model(index))
            .await?;
        tracing::info!(
            backend = BACKEND_NAME,
            collection = %collection,
            index = %index.index_name(),
            "Ensured index"
        );
    }
    Ok(())
}

/// Builds the driver index model for `spec`.
pub(crate) fn index_model(spec: &IndexSpec) -> IndexModel {
    let mut keys = bson::Document::new();
    for key in &spec.keys {
        let order = match key.kind {
            IndexKind::Ascending => Bson::Int32(1),
            IndexKind::Descending => Bson::Int32(-1),
            IndexKind::Text => Bson::String("text".to_string()),
        };
        keys.insert(key.field.clone(), order);
    }

    let options = IndexOptions::builder()
        .name(spec.index_name())
        .unique(spec.unique)
        .sparse(spec.sparse)
        .build();
    IndexModel::builder().keys(keys).options(options).build()
}

/// Server error code carried by a command or write error.
pub(crate) fn error_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => Some(concern.code),
        _ => None,
    }
}

/// Maps a driver error from a CRUD call to a storage error.
///
/// A missing namespace forgets the provisioning of `collection`.
pub(crate) fn query_failed(
    handle: &ConnectionHandle<Client>,
    collection: &CollectionRef,
    err: MongoError,
) -> StorageError {
    let message = err.to_string();
    match err.kind.as_ref() {
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. } => BackendError::Unavailable {
            backend_name: BACKEND_NAME.to_string(),
            message,
        }
        .into(),
        ErrorKind::Command(_) | ErrorKind::Write(_) => {
            if error_code(&err) == Some(NAMESPACE_NOT_FOUND) {
                handle
                    .provisioner()
                    .invalidate(collection.database(), collection.name());
            }
            BackendError::QueryError { message }.into()
        }
        _ => err.into(),
    }
}

#[async_trait]
impl Backend for MongoBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MongoDB
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn capabilities(&self) -> Vec<BackendCapability> {
        vec![
            BackendCapability::Crud,
            BackendCapability::Projection,
            BackendCapability::SecondaryIndexes,
        ]
    }

    fn id_field(&self) -> &'static str {
        ID_FIELD
    }

    fn naming_rules(&self) -> &NamingRules {
        &NamingRules::MONGODB
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let handle = match self.connections.acquire(&self.connection_string).await {
            Ok(handle) => handle,
            Err(StorageError::Backend(err)) => return Err(err),
            Err(err) => {
                return Err(BackendError::Unavailable {
                    backend_name: BACKEND_NAME.to_string(),
                    message: err.to_string(),
                });
            }
        };
        handle
            .session()
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|err| BackendError::Unavailable {
                backend_name: BACKEND_NAME.to_string(),
                message: err.to_string(),
            })
    }
}
