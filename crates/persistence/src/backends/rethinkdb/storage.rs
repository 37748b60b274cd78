//! [`DocumentStorage`] implementation for RethinkDB.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::backend::{ID_FIELD, RethinkBackend, query_failed, table};
use crate::core::storage::{already_exists, not_found};
use crate::core::{ChangeFeedProvider, DocumentStorage, OperationContext};
use crate::error::{BackendError, StorageResult};
use crate::types::{CollectionRef, Document, Filter, Patch, Projection, ensure_id, into_document};

/// Summary returned by write terms.
#[derive(Debug, Default, Deserialize)]
struct WriteResult {
    #[serde(default)]
    inserted: u64,
    #[serde(default)]
    replaced: u64,
    #[serde(default)]
    unchanged: u64,
    #[serde(default)]
    deleted: u64,
    #[serde(default)]
    errors: u64,
    #[serde(default)]
    first_error: Option<String>,
}

impl WriteResult {
    fn parse(value: Value) -> StorageResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Documents the write matched, whether or not it changed them.
    fn matched(&self) -> u64 {
        self.replaced + self.unchanged
    }

    fn is_duplicate(&self) -> bool {
        self.first_error
            .as_deref()
            .is_some_and(|message| message.starts_with("Duplicate primary key"))
    }

    fn check(self) -> StorageResult<Self> {
        if self.errors > 0 {
            return Err(BackendError::QueryError {
                message: self
                    .first_error
                    .unwrap_or_else(|| format!("{} write errors", self.errors)),
            }
            .into());
        }
        Ok(self)
    }
}

fn into_documents(value: Value) -> StorageResult<Vec<Document>> {
    match value {
        Value::Array(items) => items.into_iter().map(into_document).collect(),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![into_document(other)?]),
    }
}

#[async_trait]
impl DocumentStorage for RethinkBackend {
    async fn insert(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        mut doc: Document,
    ) -> StorageResult<Document> {
        ctx.run("insert", async move {
            let id = ensure_id(&mut doc, ID_FIELD)?;
            let handle = self.prepare(collection).await?;
            let result = handle
                .session()
                .run(table(collection).insert(&doc))
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;

            let result = WriteResult::parse(result)?;
            if result.is_duplicate() {
                return Err(already_exists(collection, &id));
            }
            let result = result.check()?;
            tracing::debug!(collection = %collection, id = %id, inserted = result.inserted, "Inserted document");
            Ok(doc)
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
            let result = handle
                .session()
                .run(table(collection).filter(filter).update(patch))
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;

            let result = WriteResult::parse(result)?.check()?;
            tracing::debug!(
                collection = %collection,
                matched = result.matched(),
                modified = result.replaced,
                "Updated documents"
            );
            Ok(result.matched())
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
            let result = handle
                .session()
                .run(table(collection).get(id).update(patch))
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;

            if WriteResult::parse(result)?.check()?.matched() == 0 {
                return Err(not_found(collection, id));
            }
            Ok(())
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
            let result = handle
                .session()
                .run(table(collection).get(id).replace_existing(&doc))
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;

            if WriteResult::parse(result)?.check()?.matched() == 0 {
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
            let handle = self.prepare(collection).await?;
            // pluck on a missing row is an error, so project client-side.
            let found = handle
                .session()
                .run(table(collection).get(id))
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;

            match found {
                Value::Null => Err(not_found(collection, id)),
                value => {
                    let mut doc = into_document(value)?;
                    projection.apply(&mut doc, ID_FIELD);
                    Ok(doc)
                }
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
            let handle = self.prepare(collection).await?;
            let found = handle
                .session()
                .run(table(collection).filter(filter).pluck(projection, ID_FIELD))
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;
            into_documents(found)
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
            let found = handle
                .session()
                .run(table(collection).filter(filter).limit(1))
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;
            Ok(into_documents(found)?.into_iter().next())
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
            let result = handle
                .session()
                .run(table(collection).get(id).delete())
                .await
                .map_err(|err| query_failed(&handle, collection, err))?;

            if WriteResult::parse(result)?.check()?.deleted == 0 {
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

    fn change_feed(&self) -> Option<&dyn ChangeFeedProvider> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_write_result_counts() {
        let result = WriteResult::parse(json!({
            "replaced": 2, "unchanged": 1, "skipped": 0, "errors": 0, "inserted": 0, "deleted": 0
        }))
        .unwrap();
        assert_eq!(result.matched(), 3);
        assert!(result.check().is_ok());
    }

    #[test]
    fn test_write_result_duplicate() {
        let result = WriteResult::parse(json!({
            "inserted": 0,
            "errors": 1,
            "first_error": "Duplicate primary key `id`:\n{\n\t\"id\":\t\"x\"\n}\n{\n\t\"id\":\t\"x\"\n}"
        }))
        .unwrap();
        assert!(result.is_duplicate());
        assert!(result.check().is_err());
    }

    #[test]
    fn test_into_documents() {
        assert!(into_documents(Value::Null).unwrap().is_empty());
        let docs = into_documents(json!([{"id": "a"}, {"id": "b"}])).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(into_documents(json!([1])).is_err());
    }
}
