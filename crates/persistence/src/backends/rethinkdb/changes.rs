//! Change feeds for RethinkDB.
//!
//! A subscription runs `table.filter(...).changes()`. The server answers
//! with partial batches of `{old_val, new_val}` pairs; the cursor asks for
//! each following batch with CONTINUE and ends the feed with STOP.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::backend::{RethinkBackend, query_failed, table};
use super::session::{Query, RethinkSession};
use crate::core::{ChangeCursor, ChangeFeedProvider, ConnectionHandle, OperationContext, Subscription};
use crate::error::{StorageError, StorageResult, SubscriptionError};
use crate::types::{ChangeEvent, CollectionRef, Filter};

struct RethinkCursor {
    // Keeps the session alive while the feed runs.
    _handle: Arc<ConnectionHandle<RethinkSession>>,
    query: Query,
    collection: String,
    pending: VecDeque<Value>,
}

impl RethinkCursor {
    fn decode(&self, change: Value) -> Option<ChangeEvent> {
        let Value::Object(mut change) = change else {
            return None;
        };
        let old = take_document(change.remove("old_val"));
        let new = take_document(change.remove("new_val"));
        ChangeEvent::from_states(self.collection.as_str(), old, new)
    }
}

fn take_document(value: Option<Value>) -> Option<crate::types::Document> {
    match value {
        Some(Value::Object(doc)) => Some(doc),
        _ => None,
    }
}

#[async_trait]
impl ChangeCursor for RethinkCursor {
    async fn next_change(&mut self) -> StorageResult<Option<ChangeEvent>> {
        loop {
            while let Some(change) = self.pending.pop_front() {
                if let Some(event) = self.decode(change) {
                    return Ok(Some(event));
                }
            }
            if !self.query.has_more() {
                return Ok(None);
            }

            let batch = self.query.next_response().await.map_err(|err| {
                StorageError::from(SubscriptionError::StreamFailed {
                    collection: self.collection.clone(),
                    message: err.to_string(),
                })
            })?;
            self.pending.extend(batch.results);
        }
    }

    async fn close(&mut self) {
        self.query.stop();
        self.pending.clear();
    }
}

#[async_trait]
impl ChangeFeedProvider for RethinkBackend {
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

                let mut query = handle
                    .session()
                    .start(table(collection).filter(filter).changes())
                    .map_err(|err| cursor_open_failed(collection, err))?;
                // The first response confirms the feed is open.
                let first = query.next_response().await.map_err(|err| {
                    cursor_open_failed(collection, query_failed(&handle, collection, err))
                })?;

                Ok(RethinkCursor {
                    _handle: handle,
                    query,
                    collection: collection.name().to_string(),
                    pending: first.results.into(),
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
