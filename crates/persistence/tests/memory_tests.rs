//! In-memory backend integration tests.
//!
//! The memory backend needs no external services, so these tests run the full
//! shared scenario set plus the lifecycle cases that are hard to provoke on a
//! real server (stale collections, concurrent first connects).
//!
//! Run with: `cargo test -p neutrino-persistence --test memory_tests`

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use neutrino_persistence::backends::memory::MemoryBackend;
use neutrino_persistence::core::ConnectionManager;
use neutrino_persistence::error::{OperationError, StorageError};
use neutrino_persistence::types::{ChangeKind, Filter, Patch, Projection};
use neutrino_persistence::{Backend, DocumentStorage, OperationContext, StoreRegistry, TenantId};

use common::{ctx, doc, next_event};

fn registry() -> StoreRegistry {
    StoreRegistry::memory("neutrino").with_change_buffer(16)
}

// ============================================================================
// Shared Scenarios
// ============================================================================

#[tokio::test]
async fn test_memory_crud_suite() {
    common::crud_suite(&registry()).await;
}

#[tokio::test]
async fn test_memory_feed_suite() {
    common::feed_suite(&registry()).await;
}

// ============================================================================
// acme/orders Walkthrough
// ============================================================================

#[tokio::test]
async fn test_acme_orders_lifecycle() {
    let registry = registry();
    let orders = registry.scoped(&TenantId::new("acme"), "orders");
    assert_eq!(orders.collection().name(), "acme.orders");

    let (tx, mut rx) = registry.change_channel();
    let subscription = orders.subscribe(&ctx(), &Filter::all(), tx).await.unwrap();

    let stored = orders
        .insert(&ctx(), doc(json!({"name": "widget", "qty": 3})))
        .await
        .unwrap();
    let id = stored["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 32);

    orders
        .update_id(&ctx(), &id, &Patch::new().set("qty", 4))
        .await
        .unwrap();
    let found = orders.find_id(&ctx(), &id, &Projection::all()).await.unwrap();
    assert_eq!(found["name"], json!("widget"));
    assert_eq!(found["qty"], json!(4));

    orders.remove_id(&ctx(), &id).await.unwrap();

    let kinds = [
        next_event(&mut rx).await.kind,
        next_event(&mut rx).await.kind,
        next_event(&mut rx).await.kind,
    ];
    assert_eq!(
        kinds,
        [ChangeKind::Create, ChangeKind::Update, ChangeKind::Delete]
    );

    subscription.cancel();
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_acme_orders_distinct_from_similar_names() {
    let registry = registry();
    let names: HashSet<String> = [
        (TenantId::new("acme"), "orders"),
        (TenantId::new("acme.orders"), "x"),
        (TenantId::new("acme_orders"), "x"),
        (TenantId::new("acme"), "orders.x"),
        (TenantId::system(), "acme.orders"),
    ]
    .iter()
    .map(|(tenant, ty)| registry.scoped(tenant, ty).collection().name().to_string())
    .collect();
    assert_eq!(names.len(), 5);
}

#[tokio::test]
async fn test_generated_ids_are_unique() {
    let registry = registry();
    let orders = registry.scoped(&TenantId::new("acme"), "orders");

    let mut ids = HashSet::new();
    for n in 0..200 {
        let stored = orders.insert(&ctx(), doc(json!({"n": n}))).await.unwrap();
        assert!(ids.insert(stored["id"].as_str().unwrap().to_string()));
    }
    assert_eq!(
        orders
            .find(&ctx(), &Filter::all(), &Projection::all())
            .await
            .unwrap()
            .len(),
        200
    );
}

// ============================================================================
// Connection and Provisioning Lifecycle
// ============================================================================

#[tokio::test]
async fn test_concurrent_first_use_connects_once() {
    let connections = Arc::new(ConnectionManager::new(
        neutrino_persistence::backends::memory::MemoryConnector,
    ));
    let backend = Arc::new(MemoryBackend::with_connections(
        "memory://shared",
        Arc::clone(&connections),
    ));
    let registry = StoreRegistry::new(backend, "neutrino");

    let mut tasks = Vec::new();
    for n in 0..16 {
        let handle = registry.scoped(&TenantId::new("acme"), "orders");
        tasks.push(tokio::spawn(async move {
            handle
                .insert(&OperationContext::background(), common::doc(json!({"n": n})))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(connections.connection_count(), 1);
    assert!(connections.is_connected("memory://shared"));
}

#[tokio::test]
async fn test_backends_sharing_a_cache_share_data() {
    let connections = Arc::new(ConnectionManager::new(
        neutrino_persistence::backends::memory::MemoryConnector,
    ));
    let first = StoreRegistry::new(
        Arc::new(MemoryBackend::with_connections("memory://a", Arc::clone(&connections))),
        "neutrino",
    );
    let second = StoreRegistry::new(
        Arc::new(MemoryBackend::with_connections("memory://a", Arc::clone(&connections))),
        "neutrino",
    );

    first
        .users()
        .insert(&ctx(), doc(json!({"id": "jane"})))
        .await
        .unwrap();
    assert!(
        second
            .users()
            .find_id(&ctx(), "jane", &Projection::all())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_dropped_collection_is_reprovisioned() {
    let backend = Arc::new(MemoryBackend::new());
    let registry = StoreRegistry::new(backend.clone(), "neutrino");
    let orders = registry.scoped(&TenantId::new("acme"), "orders");

    orders
        .insert(&ctx(), doc(json!({"id": "o1"})))
        .await
        .unwrap();
    assert!(backend.drop_collection(&ctx(), orders.collection()).await.unwrap());

    // The first call after the drop fails and forgets the provisioning.
    let err = orders
        .insert(&ctx(), doc(json!({"id": "o2"})))
        .await
        .unwrap_err();
    assert!(!err.is_fatal());

    // The next call provisions again and succeeds.
    orders
        .insert(&ctx(), doc(json!({"id": "o2"})))
        .await
        .unwrap();
    let all = orders
        .find(&ctx(), &Filter::all(), &Projection::all())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_ensure_collection_is_idempotent() {
    let registry = registry();
    let apps = registry.apps("jane@example.com");
    apps.ensure(&ctx()).await.unwrap();
    apps.ensure(&ctx()).await.unwrap();
    assert!(
        apps.find(&ctx(), &Filter::all(), &Projection::all())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_unreachable_backend_is_fatal() {
    let registry = StoreRegistry::new(
        Arc::new(MemoryBackend::with_connection_string("redis://localhost")),
        "neutrino",
    );
    let err = registry
        .users()
        .find_one(&ctx(), &Filter::all())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
}

// ============================================================================
// Deadlines and Cancellation
// ============================================================================

#[tokio::test]
async fn test_expired_deadline_aborts_call() {
    let registry = registry();
    let orders = registry.scoped(&TenantId::new("acme"), "orders");
    let ctx = OperationContext::background().with_timeout(Duration::ZERO);

    let err = orders
        .insert(&ctx, doc(json!({"id": "o1"})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Operation(OperationError::DeadlineExceeded { .. })
    ));

    // Nothing was written.
    let err = orders
        .find_id(&common::ctx(), "o1", &Projection::all())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_cancelled_context_aborts_call() {
    let registry = registry();
    let ctx = OperationContext::background();
    ctx.cancel();

    let err = registry
        .system()
        .find(&ctx, &Filter::all(), &Projection::all())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Operation(OperationError::Cancelled { .. })
    ));
}

#[tokio::test]
async fn test_subscription_follows_parent_context() {
    let registry = registry();
    let orders = registry.scoped(&TenantId::new("acme"), "orders");
    let parent = OperationContext::background();
    let (tx, mut rx) = registry.change_channel();
    let subscription = orders
        .subscribe(&parent.child(), &Filter::all(), tx)
        .await
        .unwrap();

    parent.cancel();
    assert!(rx.recv().await.is_none());
    assert!(subscription.is_cancelled());
    subscription.join().await.unwrap();
}

#[tokio::test]
async fn test_dropping_receiver_ends_subscription() {
    let registry = registry();
    let orders = registry.scoped(&TenantId::new("acme"), "orders");
    let (tx, rx) = registry.change_channel();
    let subscription = orders.subscribe(&ctx(), &Filter::all(), tx).await.unwrap();

    drop(rx);
    orders
        .insert(&ctx(), doc(json!({"id": "o1"})))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), subscription.join())
        .await
        .expect("feed did not stop after the receiver was dropped")
        .unwrap();
}

#[tokio::test]
async fn test_backend_is_usable_as_trait_object() {
    let backend: Arc<dyn DocumentStorage> = Arc::new(MemoryBackend::new());
    assert!(backend.change_feed().is_some());
    assert_eq!(backend.id_field(), "id");
}
