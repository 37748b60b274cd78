//! Registry and configuration tests.
//!
//! These exercise `StoreRegistry` construction and the well-known collections
//! over the in-memory backend, plus the capability check on backends that
//! cannot stream changes.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use neutrino_persistence::backends::memory::MemoryBackend;
use neutrino_persistence::core::BackendCapability;
use neutrino_persistence::error::{BackendError, StorageError, StorageResult};
use neutrino_persistence::tenant::NamingRules;
use neutrino_persistence::types::{
    CollectionRef, Document, Filter, IndexKind, Patch, Projection,
};
use neutrino_persistence::{
    Backend, BackendKind, BackendSelection, DocumentStorage, OperationContext, StorageConfig,
    StoreRegistry, TenantId,
};

use common::{ctx, doc};

// ============================================================================
// Construction
// ============================================================================

#[tokio::test]
async fn test_registry_from_default_config() {
    let registry = StoreRegistry::from_config(&StorageConfig::default())
        .await
        .unwrap();
    assert_eq!(registry.database(), "neutrino");
    assert_eq!(registry.backend().kind(), BackendKind::Memory);
    assert_eq!(registry.change_buffer(), 256);
}

#[tokio::test]
async fn test_registry_from_json_config() {
    let config: StorageConfig = serde_json::from_value(json!({
        "backend": "memory",
        "connection_string": "memory://tests",
        "database": "apps",
        "operation_timeout_ms": 1000
    }))
    .unwrap();
    assert_eq!(config.backend, BackendSelection::Memory);

    let registry = StoreRegistry::from_config(&config).await.unwrap();
    let ctx = OperationContext::from_config(&config);
    assert!(ctx.deadline().is_some());

    let users = registry.users();
    assert_eq!(users.collection().database(), "apps");
    users
        .insert(&ctx, doc(json!({"id": "jane", "email": "jane@example.com"})))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_config_is_fatal() {
    let config = StorageConfig {
        connection_string: "mysql://localhost".to_string(),
        ..Default::default()
    };
    let err = StoreRegistry::from_config(&config).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Backend(BackendError::ConnectionFailed { .. })
    ));
    assert!(err.is_fatal());
}

// ============================================================================
// Well-known Collections
// ============================================================================

#[tokio::test]
async fn test_system_collections_are_unprefixed() {
    let registry = StoreRegistry::memory("neutrino");
    assert_eq!(registry.users().collection().name(), "users");
    assert_eq!(registry.apps_map().collection().name(), "appsmap");
    assert_eq!(registry.system().collection().name(), "system");
    assert!(registry.users().collection().tenant().is_system());
}

#[tokio::test]
async fn test_application_collections() {
    let registry = StoreRegistry::memory("neutrino");

    let apps = registry.apps("jane");
    let index = apps.collection().index().unwrap();
    assert_eq!(index.keys[0].field, "name");
    assert_eq!(index.keys[0].kind, IndexKind::Text);
    assert!(index.unique);

    let app = apps
        .insert(&ctx(), doc(json!({"name": "todo"})))
        .await
        .unwrap();
    let app_id = app["id"].as_str().unwrap().to_string();

    registry
        .apps_map()
        .insert(&ctx(), doc(json!({"id": app_id.as_str(), "owner": "jane"})))
        .await
        .unwrap();

    let items = registry.type_store(&app_id, "items");
    items
        .insert(&ctx(), doc(json!({"title": "buy milk", "done": false})))
        .await
        .unwrap();
    registry
        .app_users(&app_id)
        .insert(&ctx(), doc(json!({"id": "bob"})))
        .await
        .unwrap();

    // App users never land in the system users collection.
    assert!(
        registry
            .users()
            .find(&ctx(), &Filter::all(), &Projection::all())
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        items
            .update(
                &ctx(),
                &Filter::eq("done", false),
                &Patch::new().set("done", true)
            )
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_scoped_handles_share_storage() {
    let registry = StoreRegistry::memory("neutrino");
    let tenant = TenantId::new("acme");

    registry
        .scoped(&tenant, "orders")
        .insert(&ctx(), doc(json!({"id": "o1"})))
        .await
        .unwrap();

    let again = registry.scoped(&tenant, "orders");
    assert!(again.find_id(&ctx(), "o1", &Projection::all()).await.is_ok());
}

// ============================================================================
// Capability Checks
// ============================================================================

/// A backend that stores documents but cannot stream changes.
#[derive(Debug, Default)]
struct FeedlessBackend {
    inner: MemoryBackend,
}

#[async_trait]
impl Backend for FeedlessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Custom("feedless")
    }

    fn name(&self) -> &'static str {
        "feedless"
    }

    fn capabilities(&self) -> Vec<BackendCapability> {
        vec![BackendCapability::Crud]
    }

    fn id_field(&self) -> &'static str {
        self.inner.id_field()
    }

    fn naming_rules(&self) -> &NamingRules {
        self.inner.naming_rules()
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        self.inner.health_check().await
    }
}

#[async_trait]
impl DocumentStorage for FeedlessBackend {
    async fn insert(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        doc: Document,
    ) -> StorageResult<Document> {
        self.inner.insert(ctx, collection, doc).await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        filter: &Filter,
        patch: &Patch,
    ) -> StorageResult<u64> {
        self.inner.update(ctx, collection, filter, patch).await
    }

    async fn update_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
        patch: &Patch,
    ) -> StorageResult<()> {
        self.inner.update_id(ctx, collection, id, patch).await
    }

    async fn replace_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
        doc: Document,
    ) -> StorageResult<()> {
        self.inner.replace_id(ctx, collection, id, doc).await
    }

    async fn find_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
        projection: &Projection,
    ) -> StorageResult<Document> {
        self.inner.find_id(ctx, collection, id, projection).await
    }

    async fn find(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        filter: &Filter,
        projection: &Projection,
    ) -> StorageResult<Vec<Document>> {
        self.inner.find(ctx, collection, filter, projection).await
    }

    async fn find_one(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        filter: &Filter,
    ) -> StorageResult<Option<Document>> {
        self.inner.find_one(ctx, collection, filter).await
    }

    async fn remove_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
    ) -> StorageResult<()> {
        self.inner.remove_id(ctx, collection, id).await
    }

    async fn ensure_collection(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
    ) -> StorageResult<()> {
        self.inner.ensure_collection(ctx, collection).await
    }
}

#[tokio::test]
async fn test_subscribe_requires_change_feed() {
    let registry = StoreRegistry::new(Arc::new(FeedlessBackend::default()), "neutrino");
    assert!(!registry.backend().supports(BackendCapability::ChangeFeed));

    common::feed_unsupported(&registry).await;

    // CRUD still works.
    common::insert_then_find(&registry).await;
}

#[tokio::test]
async fn test_unsupported_capability_names_the_backend() {
    let registry = StoreRegistry::new(Arc::new(FeedlessBackend::default()), "neutrino");
    let (tx, _rx) = mpsc::channel(1);
    let err = registry
        .system()
        .subscribe(&ctx(), &Filter::all(), tx)
        .await
        .unwrap_err();
    match err {
        StorageError::Backend(BackendError::UnsupportedCapability {
            backend_name,
            capability,
        }) => {
            assert_eq!(backend_name, "feedless");
            assert_eq!(capability, "change-feed");
        }
        other => panic!("unexpected error: {other}"),
    }
}
