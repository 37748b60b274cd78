//! Tenant-scoped access to the configured backend.
//!
//! [`StoreRegistry`] owns the single backend instance of a process and hands
//! out [`StoreHandle`]s, each bound to one logical collection (a tenant scope
//! plus a type name). A handle resolves its physical name once, through the
//! backend's [`NamingRules`](crate::tenant::NamingRules), and forwards every
//! call to the backend.
//!
//! # Example
//!
//! ```
//! use neutrino_persistence::core::OperationContext;
//! use neutrino_persistence::store::StoreRegistry;
//! use neutrino_persistence::tenant::TenantId;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let registry = StoreRegistry::memory("neutrino");
//! let orders = registry.scoped(&TenantId::new("acme"), "orders");
//! assert_eq!(orders.collection().name(), "acme.orders");
//!
//! let ctx = OperationContext::background();
//! let doc = json!({"name": "widget"}).as_object().cloned().unwrap();
//! let stored = orders.insert(&ctx, doc).await.unwrap();
//! assert!(stored.contains_key("id"));
//! # });
//! ```

use std::fmt::Debug;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backends::memory::MemoryBackend;
use crate::config::{BackendSelection, StorageConfig};
use crate::core::{Backend, BackendCapability, DocumentStorage, OperationContext, Subscription};
use crate::error::{BackendError, StorageResult};
use crate::tenant::TenantId;
use crate::types::{
    ChangeEvent, CollectionRef, Document, Filter, IndexKind, IndexSpec, Patch, Projection,
};

/// System collection of user accounts.
pub const USERS: &str = "users";
/// System collection mapping application ids to their owners.
pub const APPS_MAP: &str = "appsmap";
/// System collection of service-wide settings.
pub const SYSTEM: &str = "system";
/// Per-user collection of applications.
pub const APPLICATIONS: &str = "applications";

/// Entry point to tenant-scoped collections.
#[derive(Clone)]
pub struct StoreRegistry {
    backend: Arc<dyn DocumentStorage>,
    database: String,
    change_buffer: usize,
}

impl Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("backend", &self.backend.name())
            .field("database", &self.database)
            .field("change_buffer", &self.change_buffer)
            .finish()
    }
}

impl StoreRegistry {
    /// Wraps an existing backend.
    pub fn new(backend: Arc<dyn DocumentStorage>, database: impl Into<String>) -> Self {
        Self {
            backend,
            database: database.into(),
            change_buffer: StorageConfig::default().change_buffer,
        }
    }

    /// A registry over a fresh in-memory backend.
    pub fn memory(database: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), database)
    }

    /// Builds the configured backend and checks that it is reachable.
    ///
    /// # Errors
    ///
    /// * `BackendError::Unavailable` - If the backend's feature is not compiled in
    /// * `BackendError::ConnectionFailed` - If the backend cannot be reached
    pub async fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        let backend = build_backend(config)?;
        backend.health_check().await?;

        tracing::info!(
            backend = backend.name(),
            database = %config.database,
            "Storage backend ready"
        );

        Ok(Self {
            backend,
            database: config.database.clone(),
            change_buffer: config.change_buffer,
        })
    }

    /// Overrides the suggested change feed channel capacity.
    pub fn with_change_buffer(mut self, change_buffer: usize) -> Self {
        self.change_buffer = change_buffer.max(1);
        self
    }

    /// The shared backend.
    pub fn backend(&self) -> &Arc<dyn DocumentStorage> {
        &self.backend
    }

    /// Database holding every collection.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Suggested capacity for channels passed to [`StoreHandle::subscribe`].
    pub fn change_buffer(&self) -> usize {
        self.change_buffer
    }

    /// Opens a channel sized for change feeds.
    pub fn change_channel(&self) -> (mpsc::Sender<ChangeEvent>, mpsc::Receiver<ChangeEvent>) {
        mpsc::channel(self.change_buffer)
    }

    /// A handle on `type_name` owned by `tenant`.
    pub fn scoped(&self, tenant: &TenantId, type_name: &str) -> StoreHandle {
        self.handle(tenant, type_name, None)
    }

    /// A handle that provisions `index` along with the collection.
    pub fn scoped_with_index(
        &self,
        tenant: &TenantId,
        type_name: &str,
        index: IndexSpec,
    ) -> StoreHandle {
        self.handle(tenant, type_name, Some(index))
    }

    fn handle(&self, tenant: &TenantId, type_name: &str, index: Option<IndexSpec>) -> StoreHandle {
        let name = self.backend.naming_rules().physical_name(tenant, type_name);
        let mut collection =
            CollectionRef::new(self.database.as_str(), name).with_logical(tenant.clone(), type_name);
        if let Some(index) = index {
            collection = collection.with_index(index);
        }
        StoreHandle {
            backend: Arc::clone(&self.backend),
            collection,
        }
    }

    // ========================================================================
    // Well-known collections
    // ========================================================================

    /// User accounts.
    pub fn users(&self) -> StoreHandle {
        self.scoped(&TenantId::system(), USERS)
    }

    /// Application id to owner mapping.
    pub fn apps_map(&self) -> StoreHandle {
        self.scoped(&TenantId::system(), APPS_MAP)
    }

    /// Service-wide settings.
    pub fn system(&self) -> StoreHandle {
        self.scoped(&TenantId::system(), SYSTEM)
    }

    /// Applications owned by `user`, unique by name.
    pub fn apps(&self, user: &str) -> StoreHandle {
        let index = IndexSpec::new().key("name", IndexKind::Text).unique(true);
        self.scoped_with_index(&TenantId::new(user), APPLICATIONS, index)
    }

    /// Users of the application `app_id`.
    pub fn app_users(&self, app_id: &str) -> StoreHandle {
        self.scoped(&TenantId::new(app_id), USERS)
    }

    /// Documents of `type_name` inside the application `app_id`.
    pub fn type_store(&self, app_id: &str, type_name: &str) -> StoreHandle {
        self.scoped(&TenantId::new(app_id), type_name)
    }
}

fn build_backend(config: &StorageConfig) -> StorageResult<Arc<dyn DocumentStorage>> {
    match config.backend {
        BackendSelection::Memory => Ok(Arc::new(MemoryBackend::with_connection_string(
            config.connection_string.as_str(),
        ))),

        #[cfg(feature = "mongodb")]
        BackendSelection::MongoDB => {
            use crate::backends::mongodb::{MongoBackend, MongoBackendConfig};

            let mongo = MongoBackendConfig {
                max_pool_size: config.max_pool_size,
                connect_timeout_ms: config.connect_timeout_ms,
                ..Default::default()
            };
            Ok(Arc::new(MongoBackend::new(
                config.connection_string.as_str(),
                mongo,
            )))
        }

        #[cfg(feature = "rethinkdb")]
        BackendSelection::RethinkDB => {
            use crate::backends::rethinkdb::{RethinkBackend, RethinkBackendConfig};

            let rethink = RethinkBackendConfig {
                user: config.rethinkdb_user.clone(),
                password: config.rethinkdb_password.clone(),
                connect_timeout_ms: config.connect_timeout_ms,
            };
            Ok(Arc::new(RethinkBackend::new(
                config.connection_string.as_str(),
                rethink,
            )))
        }

        #[allow(unreachable_patterns)]
        other => Err(BackendError::Unavailable {
            backend_name: other.to_string(),
            message: format!("built without the '{other}' feature"),
        }
        .into()),
    }
}

/// CRUD and change feed access to one logical collection.
///
/// Cloning is cheap; clones share the backend.
#[derive(Clone)]
pub struct StoreHandle {
    backend: Arc<dyn DocumentStorage>,
    collection: CollectionRef,
}

impl Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("backend", &self.backend.name())
            .field("collection", &self.collection)
            .finish()
    }
}

impl StoreHandle {
    /// The physical collection this handle targets.
    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    /// Identifier field of the backend.
    pub fn id_field(&self) -> &'static str {
        self.backend.id_field()
    }

    /// Stores a new document, generating its identifier when missing.
    pub async fn insert(&self, ctx: &OperationContext, doc: Document) -> StorageResult<Document> {
        self.backend.insert(ctx, &self.collection, doc).await
    }

    /// Merges `patch` into every document matching `filter`.
    pub async fn update(
        &self,
        ctx: &OperationContext,
        filter: &Filter,
        patch: &Patch,
    ) -> StorageResult<u64> {
        self.backend.update(ctx, &self.collection, filter, patch).await
    }

    /// Merges `patch` into the document `id`.
    pub async fn update_id(
        &self,
        ctx: &OperationContext,
        id: &str,
        patch: &Patch,
    ) -> StorageResult<()> {
        self.backend.update_id(ctx, &self.collection, id, patch).await
    }

    /// Replaces the document `id` wholesale.
    pub async fn replace_id(
        &self,
        ctx: &OperationContext,
        id: &str,
        doc: Document,
    ) -> StorageResult<()> {
        self.backend.replace_id(ctx, &self.collection, id, doc).await
    }

    /// Fetches the document `id`.
    pub async fn find_id(
        &self,
        ctx: &OperationContext,
        id: &str,
        projection: &Projection,
    ) -> StorageResult<Document> {
        self.backend
            .find_id(ctx, &self.collection, id, projection)
            .await
    }

    /// Fetches every document matching `filter`.
    pub async fn find(
        &self,
        ctx: &OperationContext,
        filter: &Filter,
        projection: &Projection,
    ) -> StorageResult<Vec<Document>> {
        self.backend
            .find(ctx, &self.collection, filter, projection)
            .await
    }

    /// Fetches any one document matching `filter`.
    pub async fn find_one(
        &self,
        ctx: &OperationContext,
        filter: &Filter,
    ) -> StorageResult<Option<Document>> {
        self.backend.find_one(ctx, &self.collection, filter).await
    }

    /// Deletes the document `id`.
    pub async fn remove_id(&self, ctx: &OperationContext, id: &str) -> StorageResult<()> {
        self.backend.remove_id(ctx, &self.collection, id).await
    }

    /// Creates the collection and its index if they do not exist yet.
    pub async fn ensure(&self, ctx: &OperationContext) -> StorageResult<()> {
        self.backend.ensure_collection(ctx, &self.collection).await
    }

    /// Streams changes to documents matching `filter` into `sink`.
    ///
    /// # Errors
    ///
    /// * `BackendError::UnsupportedCapability` - If the backend has no change feed
    /// * `SubscriptionError::CursorOpenFailed` - If the feed could not be opened
    pub async fn subscribe(
        &self,
        ctx: &OperationContext,
        filter: &Filter,
        sink: mpsc::Sender<ChangeEvent>,
    ) -> StorageResult<Subscription> {
        let Some(feed) = self.backend.change_feed() else {
            return Err(BackendError::UnsupportedCapability {
                backend_name: self.backend.name().to_string(),
                capability: BackendCapability::ChangeFeed.to_string(),
            }
            .into());
        };
        feed.subscribe(ctx, &self.collection, filter, sink).await
    }
}
