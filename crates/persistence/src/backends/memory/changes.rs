//! Change feeds for the in-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::backend::{MemoryBackend, missing_collection};
use super::cluster::{MemoryCluster, RawChange};
use crate::core::{ChangeCursor, ChangeFeedProvider, ConnectionHandle, OperationContext, Subscription};
use crate::error::{StorageError, StorageResult, SubscriptionError};
use crate::types::{ChangeEvent, CollectionRef, Filter};

/// A registered watcher on one collection, filtered client-side.
struct MemoryCursor {
    handle: Arc<ConnectionHandle<MemoryCluster>>,
    watcher_id: u64,
    collection: String,
    filter: Filter,
    changes: mpsc::UnboundedReceiver<RawChange>,
}

#[async_trait]
impl ChangeCursor for MemoryCursor {
    async fn next_change(&mut self) -> StorageResult<Option<ChangeEvent>> {
        while let Some(RawChange { old, new }) = self.changes.recv().await {
            let old = old.filter(|doc| self.filter.matches(doc));
            let new = new.filter(|doc| self.filter.matches(doc));
            if let Some(event) = ChangeEvent::from_states(self.collection.as_str(), old, new) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        self.handle.session().unwatch(self.watcher_id);
        self.changes.close();
    }
}

#[async_trait]
impl ChangeFeedProvider for MemoryBackend {
    async fn subscribe(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        filter: &Filter,
        sink: mpsc::Sender<ChangeEvent>,
    ) -> StorageResult<Subscription> {
        let cursor = ctx
            .run("subscribe", async {
                filter.validate()?;
                let handle = self.prepare(collection).await?;
                let (watcher_id, changes) = handle
                    .session()
                    .watch(collection.database(), collection.name())
                    .map_err(|missing| {
                        cursor_open_failed(collection, missing_collection(&handle, collection, missing))
                    })?;

                Ok(MemoryCursor {
                    handle,
                    watcher_id,
                    collection: collection.name().to_string(),
                    filter: filter.clone(),
                    changes,
                })
            })
            .await?;

        Ok(Subscription::spawn(
            collection,
            cursor,
            sink,
            ctx.cancellation().child_token(),
        ))
    }
}

fn cursor_open_failed(collection: &CollectionRef, err: StorageError) -> StorageError {
    SubscriptionError::CursorOpenFailed {
        collection: collection.name().to_string(),
        message: err.to_string(),
    }
    .into()
}
