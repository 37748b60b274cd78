//! [`DocumentStorage`] implementation for MongoDB.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;

use super::backend::{DUPLICATE_KEY, ID_FIELD, MongoBackend, error_code, query_failed};
use super::convert::{
    filter_to_bson, from_bson, id_filter, patch_to_update, projection_to_bson, to_bson,
};
use crate::core::storage::{already_exists, not_found};
use crate::core::{DocumentStorage, OperationContext};
use crate::error::StorageResult;
use crate::types::{CollectionRef, Document, Filter, Patch, Projection, ensure_id};

#[async_trait]
impl DocumentStorage for MongoBackend {
    async fn insert(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        mut doc: Document,
    ) -> StorageResult<Document> {
        ctx.run("insert", async move {
            let id = ensure_id(&mut doc, ID_FIELD)?;
            let record = to_bson(&doc)?;
            let (handle, coll) = self.prepare(collection).await?;

            match coll.insert_one(record).await {
                Ok(_) => {
                    tracing::debug!(collection = %collection, id = %id, "Inserted document");
                    Ok(doc)
                }
                Err(err) if error_code(&err) == Some(DUPLICATE_KEY) => {
                    Err(already_exists(collection, &id))
                }
                Err(err) => Err(query_failed(&handle, collection, err)),
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
            let selector = filter_to_bson(filter)?;
            let (handle, coll) = self.prepare(collection).await?;

            // An empty $set is rejected by the server; report the match count instead.
            if patch.is_empty() {
                return coll
                    .count_documents(selector)
                    .await
                    .map_err(|err| query_failed(&handle, collection, err));
            }

            let result = coll
                .update_many(selector, patch_to_update(patch)?)
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;
            tracing::debug!(
                collection = %collection,
                matched = result.matched_count,
                modified = result.modified_count,
                "Updated documents"
            );
            Ok(result.matched_count)
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
            let (handle, coll) = self.prepare(collection).await?;

            let matched = if patch.is_empty() {
                coll.find_one(id_filter(id))
                    .projection(doc! { ID_FIELD: 1 })
                    .await
                    .map_err(|err| query_failed(&handle, collection, err))?
                    .is_some()
            } else {
                coll.update_one(id_filter(id), patch_to_update(patch)?)
                    .await
                    .map_err(|err| query_failed(&handle, collection, err))?
                    .matched_count
                    > 0
            };

            if matched {
                Ok(())
            } else {
                Err(not_found(collection, id))
            }
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
            // The server keeps the stored `_id`, which may be an ObjectId.
            doc.remove(ID_FIELD);
            let replacement = to_bson(&doc)?;
            let (handle, coll) = self.prepare(collection).await?;

            let result = coll
                .replace_one(id_filter(id), replacement)
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;
            if result.matched_count == 0 {
                return Err(not_found(collection, id));
            }
            Ok(())
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
            let (handle, coll) = self.prepare(collection).await?;

            let mut action = coll.find_one(id_filter(id));
            if let Some(fields) = projection_to_bson(projection) {
                action = action.projection(fields);
            }
            let found = action
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;
            match found {
                Some(record) => from_bson(record),
                None => Err(not_found(collection, id)),
            }
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
            let selector = filter_to_bson(filter)?;
            let (handle, coll) = self.prepare(collection).await?;

            let mut action = coll.find(selector);
            if let Some(fields) = projection_to_bson(projection) {
                action = action.projection(fields);
            }
            let records: Vec<_> = action
                .await
                .map_err(|err| query_failed(&handle, collection, err))?
                .try_collect()
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;

            records.into_iter().map(from_bson).collect()
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
            let selector = filter_to_bson(filter)?;
            let (handle, coll) = self.prepare(collection).await?;

            coll.find_one(selector)
                .await
                .map_err(|err| query_failed(&handle, collection, err))?
                .map(from_bson)
                .transpose()
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
            let (handle, coll) = self.prepare(collection).await?;

            let result = coll
                .delete_one(id_filter(id))
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;
            if result.deleted_count == 0 {
                return Err(not_found(collection, id));
            }
            tracing::debug!(collection = %collection, id = %id, "Removed document");
            Ok(())
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
}
