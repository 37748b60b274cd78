//! Change feed subscriptions.
//!
//! A backend with live change notifications implements
//! [`ChangeFeedProvider`]. `subscribe` opens the backend cursor before it
//! returns, so a cursor that cannot be opened is reported immediately; the
//! cursor is then drained by a spawned task that forwards each change to the
//! caller's channel in delivery order.
//!
//! The returned [`Subscription`] is the only way to stop the feed. Cancelling
//! it (or dropping it, or dropping the receiving end of the channel) closes the
//! backend cursor and drops the sender, so the receiver observes end-of-stream.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::context::OperationContext;
use crate::error::{BackendError, StorageError, StorageResult};
use crate::types::{ChangeEvent, CollectionRef, Filter};

/// Backends that can stream live changes.
#[async_trait]
pub trait ChangeFeedProvider: Send + Sync {
    /// Streams changes to documents matching `filter` into `sink`.
    ///
    /// The subscription is cancelled together with `ctx`. The context deadline
    /// applies to opening the cursor only.
    ///
    /// # Errors
    ///
    /// * `StorageError::Subscription(CursorOpenFailed)` - If the cursor could not be opened
    async fn subscribe(
        &self,
        ctx: &OperationContext,
        collection: &CollectionRef,
        filter: &Filter,
        sink: mpsc::Sender<ChangeEvent>,
    ) -> StorageResult<Subscription>;
}

/// An open backend change cursor.
#[async_trait]
pub trait ChangeCursor: Send {
    /// Waits for the next change. `None` means the backend ended the feed.
    async fn next_change(&mut self) -> StorageResult<Option<ChangeEvent>>;

    /// Releases the cursor on the backend.
    async fn close(&mut self);
}

/// Handle to a running change feed.
#[derive(Debug)]
#[must_use = "dropping a Subscription cancels the feed"]
pub struct Subscription {
    collection: Arc<str>,
    token: CancellationToken,
    task: Option<JoinHandle<StorageResult<()>>>,
}

impl Subscription {
    /// Drains `cursor` into `sink` on a new task until `token` is cancelled.
    pub fn spawn<C>(
        collection: &CollectionRef,
        cursor: C,
        sink: mpsc::Sender<ChangeEvent>,
        token: CancellationToken,
    ) -> Self
    where
        C: ChangeCursor + 'static,
    {
        let name: Arc<str> = Arc::from(collection.name());
        let task = tokio::spawn(run_feed(name.clone(), cursor, sink, token.clone()));
        tracing::debug!(collection = %name, "Change feed started");

        Self {
            collection: name,
            token,
            task: Some(task),
        }
    }

    /// Physical name of the watched collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Stops the feed. The channel closes once the task has released the cursor.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the feed was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `true` once the forwarding task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Waits for the forwarding task to exit and returns how it ended.
    pub async fn join(mut self) -> StorageResult<()> {
        match self.task.take() {
            Some(task) => task.await.map_err(|err| {
                StorageError::Backend(BackendError::Internal {
                    backend_name: "change-feed".to_string(),
                    message: format!("change feed task failed: {err}"),
                    source: Some(Box::new(err)),
                })
            })?,
            None => Ok(()),
        }
    }

    /// Cancels the feed and waits for the task to release the cursor.
    pub async fn shutdown(self) -> StorageResult<()> {
        self.cancel();
        self.join().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_feed<C: ChangeCursor>(
    collection: Arc<str>,
    mut cursor: C,
    sink: mpsc::Sender<ChangeEvent>,
    token: CancellationToken,
) -> StorageResult<()> {
    let result = pump(&mut cursor, &sink, &token).await;
    cursor.close().await;
    drop(sink);

    match &result {
        Ok(()) => tracing::debug!(collection = %collection, "Change feed closed"),
        Err(err) => tracing::error!(collection = %collection, error = %err, "Change feed failed"),
    }
    result
}

async fn pump<C: ChangeCursor>(
    cursor: &mut C,
    sink: &mpsc::Sender<ChangeEvent>,
    token: &CancellationToken,
) -> StorageResult<()> {
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            _ = sink.closed() => return Ok(()),
            next = cursor.next_change() => next?,
        };

        let Some(event) = next else {
            return Ok(());
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            sent = sink.send(event) => {
                if sent.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
