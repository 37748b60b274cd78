//! Core document storage trait.
//!
//! This module defines the [`DocumentStorage`] trait, the uniform CRUD
//! contract every backend implements. All operations take an
//! [`OperationContext`] first and the target [`CollectionRef`] second.

use async_trait::async_trait;

use super::backend::Backend;
use super::changes::ChangeFeedProvider;
use super::context::OperationContext;
use crate::error::{ResourceError, StorageError, StorageResult};
use crate::types::{CollectionRef, Document, Filter, Patch, Projection};

/// Core storage trait for tenant-scoped documents.
///
/// Implementations acquire a connection through their connection manager,
/// ensure the collection is provisioned, and run the backend call inside
/// [`OperationContext::run`] so deadlines and cancellation are honored.
///
/// # Identifiers
///
/// Each backend names its identifier field differently (see
/// [`Backend::id_field`]). Identifiers are strings; `insert` generates one when
/// the document has none.
///
/// # Missing documents
///
/// `update_id`, `replace_id`, `find_id` and `remove_id` all report a missing
/// document as `ResourceError::NotFound`, on every backend.
///
/// # Example
///
/// ```ignore
/// use neutrino_persistence::core::{DocumentStorage, OperationContext};
/// use neutrino_persistence::types::{CollectionRef, Filter, Patch, Projection};
/// use serde_json::json;
///
/// async fn example<S: DocumentStorage>(storage: &S) -> StorageResult<()> {
///     let ctx = OperationContext::background();
///     let orders = CollectionRef::new("neutrino", "acme.orders");
///
///     let doc = json!({"name": "widget", "qty": 5}).as_object().cloned().unwrap();
///     let stored = storage.insert(&ctx, &orders, doc).await?;
///     let id = stored[storage.id_field()].as_str().unwrap();
///
///     storage.update_id(&ctx, &orders, id, &Patch::new().set("name", "widget-v2")).await?;
///     let found = storage.find(&ctx, &orders, &Filter::eq("qty", 5), &Projection::all()).await?;
///     assert_eq!(found.len(), 1);
///
///     storage.remove_id(&ctx, &orders, id).await
/// }
/// ```
#[async_trait]
pub trait DocumentStorage: Backend {
    /// Inserts a new document.
    ///
    /// # Returns
    ///
    /// The stored document, including its (possibly generated) identifier.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(AlreadyExists)` - If the identifier is taken
    /// * `StorageError::Validation(InvalidDocument)` - If the identifier is not a string
    async fn insert(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        doc: Document,
    ) -> StorageResult<Document>;

    /// Merges `patch` into every document matching `filter`.
    ///
    /// # Returns
    ///
    /// The number of matching documents. Zero is not an error.
    async fn update(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        filter: &Filter,
        patch: &Patch,
    ) -> StorageResult<u64>;

    /// Merges `patch` into the document with identifier `id`.
    async fn update_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
        patch: &Patch,
    ) -> StorageResult<()>;

    /// Replaces the content of the document with identifier `id`.
    ///
    /// The identifier is preserved; fields absent from `doc` are removed.
    async fn replace_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
        doc: Document,
    ) -> StorageResult<()>;

    /// Reads one document by identifier.
    async fn find_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
        projection: &Projection,
    ) -> StorageResult<Document>;

    /// Reads every document matching `filter`, in backend-defined order.
    async fn find(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        filter: &Filter,
        projection: &Projection,
    ) -> StorageResult<Vec<Document>>;

    /// Reads the first document matching `filter`, if any.
    async fn find_one(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        filter: &Filter,
    ) -> StorageResult<Option<Document>>;

    /// Deletes the document with identifier `id`.
    async fn remove_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
    ) -> StorageResult<()>;

    /// Provisions the collection (and its index) ahead of the first operation.
    async fn ensure_collection(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
    ) -> StorageResult<()>;

    /// Returns the change feed of this backend, if it has one.
    fn change_feed(&self) -> Option<&dyn ChangeFeedProvider> {
        None
    }
}

pub(crate) fn not_found(collection: &CollectionRef, id: &str) -> StorageError {
    StorageError::Resource(ResourceError::NotFound {
        collection: collection.name().to_string(),
        id: id.to_string(),
    })
}

pub(crate) fn already_exists(collection: &CollectionRef, id: &str) -> StorageError {
    StorageError::Resource(ResourceError::AlreadyExists {
        collection: collection.name().to_string(),
        id: id.to_string(),
    })
}
