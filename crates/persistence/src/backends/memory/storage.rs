//! [`DocumentStorage`] implementation for the in-memory backend.

use async_trait::async_trait;

use super::backend::{ID_FIELD, MemoryBackend, missing_collection};
use super::cluster::WriteOutcome;
use crate::core::storage::{already_exists, not_found};
use crate::core::{ChangeFeedProvider, DocumentStorage, OperationContext};
use crate::error::StorageResult;
use crate::types::{CollectionRef, Document, Filter, Patch, Projection, ensure_id};

#[async_trait]
impl DocumentStorage for MemoryBackend {
    async fn insert(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        mut doc: Document,
    ) -> StorageResult<Document> {
        ctx.run("insert", async move {
            let id = ensure_id(&mut doc, ID_FIELD)?;
            let handle = self.prepare(collection).await?;
            let outcome = handle
                .session()
                .insert(collection.database(), collection.name(), id.clone(), doc.clone())
                .map_err(|missing| missing_collection(&handle, collection, missing))?;

            match outcome {
                WriteOutcome::Duplicate => Err(already_exists(collection, &id)),
                _ => {
                    tracing::debug!(collection = %collection, id = %id, "Inserted document");
                    Ok(doc)
                }
            }
        })
        .await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        filter: &Filter,
        patch: &Patch,
    ) -> StorageResult<u64> {
        ctx.run("update", async {
            filter.validate()?;
            patch.check_identifier(ID_FIELD)?;
            let handle = self.prepare(collection).await?;
            handle
                .session()
                .update(collection.database(), collection.name(), filter, patch)
                .map_err(|missing| missing_collection(&handle, collection, missing))
        })
        .await
    }

    async fn update_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
        patch: &Patch,
    ) -> StorageResult<()> {
        ctx.run("update_id", async {
            patch.check_identifier(ID_FIELD)?;
            let handle = self.prepare(collection).await?;
            let outcome = handle
                .session()
                .update_id(collection.database(), collection.name(), id, patch)
                .map_err(|missing| missing_collection(&handle, collection, missing))?;
            expect_applied(outcome, collection, id)
        })
        .await
    }

    async fn replace_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
        mut doc: Document,
    ) -> StorageResult<()> {
        ctx.run("replace_id", async move {
            doc.insert(ID_FIELD.to_string(), id.into());
            let handle = self.prepare(collection).await?;
            let outcome = handle
                .session()
                .replace_id(collection.database(), collection.name(), id, doc)
                .map_err(|missing| missing_collection(&handle, collection, missing))?;
            expect_applied(outcome, collection, id)
        })
        .await
    }

    async fn find_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
        projection: &Projection,
    ) -> StorageResult<Document> {
        ctx.run("find_id", async {
            let handle = self.prepare(collection).await?;
            let mut doc = handle
                .session()
                .get(collection.database(), collection.name(), id)
                .map_err(|missing| missing_collection(&handle, collection, missing))?
                .ok_or_else(|| not_found(collection, id))?;
            projection.apply(&mut doc, ID_FIELD);
            Ok(doc)
        })
        .await
    }

    async fn find(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        filter: &Filter,
        projection: &Projection,
    ) -> StorageResult<Vec<Document>> {
        ctx.run("find", async {
            filter.validate()?;
            let handle = self.prepare(collection).await?;
            let mut docs = handle
                .session()
                .scan(collection.database(), collection.name(), filter, None)
                .map_err(|missing| missing_collection(&handle, collection, missing))?;
            for doc in &mut docs {
                projection.apply(doc, ID_FIELD);
            }
            Ok(docs)
        })
        .await
    }

    async fn find_one(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        filter: &Filter,
    ) -> StorageResult<Option<Document>> {
        ctx.run("find_one", async {
            filter.validate()?;
            let handle = self.prepare(collection).await?;
            let docs = handle
                .session()
                .scan(collection.database(), collection.name(), filter, Some(1))
                .map_err(|missing| missing_collection(&handle, collection, missing))?;
            Ok(docs.into_iter().next())
        })
        .await
    }

    async fn remove_id(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        id: &str,
    ) -> StorageResult<()> {
        ctx.run("remove_id", async {
            let handle = self.prepare(collection).await?;
            let outcome = handle
                .session()
                .remove_id(collection.database(), collection.name(), id)
                .map_err(|missing| missing_collection(&handle, collection, missing))?;
            expect_applied(outcome, collection, id)
        })
        .await
    }

    async fn ensure_collection(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
    ) -> StorageResult<()> {
        ctx.run("ensure_collection", async {
            self.prepare(collection).await.map(|_| ())
        })
        .await
    }

    fn change_feed(&self) -> Option<&dyn ChangeFeedProvider> {
        Some(self)
    }
}

fn expect_applied(outcome: WriteOutcome, collection: &CollectionRef, id: &str) -> StorageResult<()> {
    match outcome {
        WriteOutcome::Applied => Ok(()),
        WriteOutcome::Missing => Err(not_found(collection, id)),
        WriteOutcome::Duplicate => Err(already_exists(collection, id)),
    }
}
