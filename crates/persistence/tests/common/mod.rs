//! Shared scenarios for backend integration tests.
//!
//! Every backend test binary builds a [`StoreRegistry`] for its backend and
//! runs the scenarios below against it. Each scenario works in a fresh tenant
//! so tests can share one database.

#![allow(dead_code)]

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use neutrino_persistence::error::{BackendError, ResourceError, StorageError, ValidationError};
use neutrino_persistence::types::{ChangeEvent, ChangeKind, Document, Filter, Patch, Projection};
use neutrino_persistence::{OperationContext, StoreHandle, StoreRegistry, TenantId};

/// How long a scenario waits for a change event before failing.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds a document from a JSON object literal.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A tenant no other test uses.
pub fn fresh_tenant(prefix: &str) -> TenantId {
    TenantId::new(format!("{prefix}{}", uuid::Uuid::new_v4().simple()))
}

/// A handle on `orders` inside a fresh tenant.
pub fn fresh_orders(registry: &StoreRegistry) -> StoreHandle {
    registry.scoped(&fresh_tenant("acme"), "orders")
}

pub fn ctx() -> OperationContext {
    OperationContext::background()
}

fn sorted_ids(docs: &[Document], id_field: &str) -> Vec<String> {
    let mut ids: Vec<String> = docs
        .iter()
        .filter_map(|d| d.get(id_field).and_then(Value::as_str).map(String::from))
        .collect();
    ids.sort();
    ids
}

/// Waits for the next event or fails after [`EVENT_TIMEOUT`].
pub async fn next_event(rx: &mut mpsc::Receiver<ChangeEvent>) -> ChangeEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a change event")
        .expect("change channel closed early")
}

// ============================================================================
// CRUD scenarios
// ============================================================================

/// Insert generates an identifier and find_id returns the stored document.
pub async fn insert_then_find(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let id_field = orders.id_field();

    let stored = orders
        .insert(&ctx(), doc(json!({"name": "widget", "qty": 3})))
        .await
        .unwrap();
    let id = stored[id_field].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    let found = orders.find_id(&ctx(), &id, &Projection::all()).await.unwrap();
    assert_eq!(found["name"], json!("widget"));
    assert_eq!(found["qty"], json!(3));
    assert_eq!(found[id_field], json!(id));
}

/// A caller-supplied identifier is kept and a second insert with it fails.
pub async fn insert_duplicate(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let id_field = orders.id_field();

    let stored = orders
        .insert(&ctx(), doc(json!({id_field: "o1", "name": "widget"})))
        .await
        .unwrap();
    assert_eq!(stored[id_field], json!("o1"));

    let err = orders
        .insert(&ctx(), doc(json!({id_field: "o1", "name": "gadget"})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Resource(ResourceError::AlreadyExists { .. })
    ));
}

/// update_id merges top-level fields and leaves the rest alone.
pub async fn update_merges_fields(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let id_field = orders.id_field();
    orders
        .insert(
            &ctx(),
            doc(json!({id_field: "o1", "name": "widget", "meta": {"a": 1, "b": 2}})),
        )
        .await
        .unwrap();

    let patch = Patch::new()
        .set("name", "widget-v2")
        .set("meta", json!({"c": 3}));
    orders.update_id(&ctx(), "o1", &patch).await.unwrap();

    let found = orders.find_id(&ctx(), "o1", &Projection::all()).await.unwrap();
    assert_eq!(found["name"], json!("widget-v2"));
    // Nested objects are replaced, not merged.
    assert_eq!(found["meta"], json!({"c": 3}));
}

/// update returns the number of matched documents; zero is not an error.
pub async fn update_by_filter(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let id_field = orders.id_field();
    for (id, status) in [("o1", "open"), ("o2", "open"), ("o3", "closed")] {
        orders
            .insert(&ctx(), doc(json!({id_field: id, "status": status})))
            .await
            .unwrap();
    }

    let matched = orders
        .update(
            &ctx(),
            &Filter::eq("status", "open"),
            &Patch::new().set("status", "shipped"),
        )
        .await
        .unwrap();
    assert_eq!(matched, 2);

    let shipped = orders
        .find(&ctx(), &Filter::eq("status", "shipped"), &Projection::all())
        .await
        .unwrap();
    assert_eq!(sorted_ids(&shipped, id_field), vec!["o1", "o2"]);

    let none = orders
        .update(
            &ctx(),
            &Filter::eq("status", "lost"),
            &Patch::new().set("status", "found"),
        )
        .await
        .unwrap();
    assert_eq!(none, 0);
}

/// replace_id drops fields the replacement does not carry.
pub async fn replace_removes_fields(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let id_field = orders.id_field();
    orders
        .insert(&ctx(), doc(json!({id_field: "o1", "name": "widget", "qty": 3})))
        .await
        .unwrap();

    orders
        .replace_id(&ctx(), "o1", doc(json!({"name": "gadget"})))
        .await
        .unwrap();

    let found = orders.find_id(&ctx(), "o1", &Projection::all()).await.unwrap();
    assert_eq!(found["name"], json!("gadget"));
    assert!(!found.contains_key("qty"));
    assert_eq!(found[id_field], json!("o1"));
}

/// Operations addressed to a missing identifier report not-found.
pub async fn missing_ids_are_not_found(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);

    let err = orders
        .find_id(&ctx(), "nope", &Projection::all())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = orders
        .update_id(&ctx(), "nope", &Patch::new().set("a", 1))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = orders
        .replace_id(&ctx(), "nope", doc(json!({"a": 1})))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = orders.remove_id(&ctx(), "nope").await.unwrap_err();
    assert!(err.is_not_found());
}

/// A removed document can no longer be found.
pub async fn remove_then_find(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let id_field = orders.id_field();
    orders
        .insert(&ctx(), doc(json!({id_field: "o1", "name": "widget"})))
        .await
        .unwrap();

    orders.remove_id(&ctx(), "o1").await.unwrap();

    let err = orders
        .find_id(&ctx(), "o1", &Projection::all())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(
        orders
            .find_one(&ctx(), &Filter::eq("name", "widget"))
            .await
            .unwrap()
            .is_none()
    );
}

/// Projections keep the listed fields plus the identifier.
pub async fn find_with_projection(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let id_field = orders.id_field();
    orders
        .insert(
            &ctx(),
            doc(json!({id_field: "o1", "name": "widget", "qty": 3, "owner": "jane"})),
        )
        .await
        .unwrap();

    let projection = Projection::fields(["name"]);
    let found = orders.find_id(&ctx(), "o1", &projection).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found["name"], json!("widget"));
    assert_eq!(found[id_field], json!("o1"));

    let all = orders
        .find(&ctx(), &Filter::all(), &projection)
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert!(!all[0].contains_key("qty"));
}

/// find returns an empty list and find_one returns `None` on no match.
pub async fn find_without_matches(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let id_field = orders.id_field();
    orders
        .insert(&ctx(), doc(json!({id_field: "o1", "status": "open"})))
        .await
        .unwrap();

    let found = orders
        .find(&ctx(), &Filter::eq("status", "closed"), &Projection::all())
        .await
        .unwrap();
    assert!(found.is_empty());

    let one = orders
        .find_one(&ctx(), &Filter::eq("status", "open"))
        .await
        .unwrap();
    assert_eq!(one.unwrap()[id_field], json!("o1"));
}

/// Two tenants with the same type name never see each other's documents.
pub async fn tenants_are_isolated(registry: &StoreRegistry) {
    let acme = registry.scoped(&fresh_tenant("acme"), "orders");
    let globex = registry.scoped(&fresh_tenant("globex"), "orders");
    assert_ne!(acme.collection().name(), globex.collection().name());
    let id_field = acme.id_field();

    acme.insert(&ctx(), doc(json!({id_field: "o1", "owner": "acme"})))
        .await
        .unwrap();

    let err = globex
        .find_id(&ctx(), "o1", &Projection::all())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(
        globex
            .find(&ctx(), &Filter::all(), &Projection::all())
            .await
            .unwrap()
            .is_empty()
    );
}

/// Update operators other than `$set` are rejected before reaching the backend.
pub async fn operators_are_rejected(registry: &StoreRegistry) {
    let err = Patch::try_from(json!({"$inc": {"qty": 1}})).unwrap_err();
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::InvalidPatch { .. })
    ));

    let orders = fresh_orders(registry);
    let err = orders
        .find(
            &ctx(),
            &Filter::from(doc(json!({"$or": [{"qty": 1}, {"qty": 2}]}))),
            &Projection::all(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::MalformedFilter { .. })
    ));

    // Operators nested in a value and dotted paths are rejected the same way
    // on every backend instead of reaching the query language.
    orders
        .insert(&ctx(), doc(json!({"qty": 2, "a": {"b": 1}})))
        .await
        .unwrap();
    for filter in [
        Filter::eq("qty", json!({"$gt": 1})),
        Filter::eq("a", json!({"b": {"$exists": true}})),
        Filter::eq("a.b", 1),
    ] {
        let err = orders
            .find(&ctx(), &filter, &Projection::all())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::MalformedFilter { .. })
        ));
        let err = orders
            .update(&ctx(), &filter, &Patch::new().set("qty", 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::MalformedFilter { .. })
        ));
    }
}

/// Runs every CRUD scenario.
pub async fn crud_suite(registry: &StoreRegistry) {
    insert_then_find(registry).await;
    insert_duplicate(registry).await;
    update_merges_fields(registry).await;
    update_by_filter(registry).await;
    replace_removes_fields(registry).await;
    missing_ids_are_not_found(registry).await;
    remove_then_find(registry).await;
    find_with_projection(registry).await;
    find_without_matches(registry).await;
    tenants_are_isolated(registry).await;
    operators_are_rejected(registry).await;
}

// ============================================================================
// Change feed scenarios
// ============================================================================

/// K mutations of matching documents produce exactly K events, in order.
pub async fn feed_delivers_in_order(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let id_field = orders.id_field();
    let (tx, mut rx) = registry.change_channel();
    let subscription = orders
        .subscribe(&ctx(), &Filter::eq("status", "open"), tx)
        .await
        .unwrap();

    orders
        .insert(&ctx(), doc(json!({id_field: "o1", "status": "open"})))
        .await
        .unwrap();
    // Not matching: no event.
    orders
        .insert(&ctx(), doc(json!({id_field: "o2", "status": "closed"})))
        .await
        .unwrap();
    orders
        .update_id(&ctx(), "o1", &Patch::new().set("qty", 5))
        .await
        .unwrap();
    orders.remove_id(&ctx(), "o1").await.unwrap();

    let created = next_event(&mut rx).await;
    assert_eq!(created.kind, ChangeKind::Create);
    assert_eq!(created.document[id_field], json!("o1"));

    let updated = next_event(&mut rx).await;
    assert_eq!(updated.kind, ChangeKind::Update);
    assert_eq!(updated.document["qty"], json!(5));

    let deleted = next_event(&mut rx).await;
    assert_eq!(deleted.kind, ChangeKind::Delete);
    assert_eq!(deleted.document[id_field], json!("o1"));

    subscription.shutdown().await.unwrap();
    assert!(rx.recv().await.is_none());
}

/// A document leaving the filter is reported as a delete.
pub async fn feed_reports_leaving_documents(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let id_field = orders.id_field();
    let (tx, mut rx) = registry.change_channel();
    let _subscription = orders
        .subscribe(&ctx(), &Filter::eq("status", "open"), tx)
        .await
        .unwrap();

    orders
        .insert(&ctx(), doc(json!({id_field: "o1", "status": "open"})))
        .await
        .unwrap();
    orders
        .update_id(&ctx(), "o1", &Patch::new().set("status", "closed"))
        .await
        .unwrap();

    assert_eq!(next_event(&mut rx).await.kind, ChangeKind::Create);
    assert_eq!(next_event(&mut rx).await.kind, ChangeKind::Delete);
}

/// Cancelling the context ends the feed and closes the channel.
pub async fn feed_closes_on_cancel(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let ctx = ctx();
    let (tx, mut rx) = registry.change_channel();
    let subscription = orders.subscribe(&ctx, &Filter::all(), tx).await.unwrap();

    ctx.cancel();
    let closed = tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("channel did not close after cancel");
    assert!(closed.is_none());
    subscription.join().await.unwrap();
}

/// Runs every change feed scenario.
pub async fn feed_suite(registry: &StoreRegistry) {
    feed_delivers_in_order(registry).await;
    feed_reports_leaving_documents(registry).await;
    feed_closes_on_cancel(registry).await;
}

/// Subscribing on a backend without change feeds is rejected.
pub async fn feed_unsupported(registry: &StoreRegistry) {
    let orders = fresh_orders(registry);
    let (tx, _rx) = registry.change_channel();
    let err = orders
        .subscribe(&ctx(), &Filter::all(), tx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Backend(BackendError::UnsupportedCapability { .. })
    ));
}
