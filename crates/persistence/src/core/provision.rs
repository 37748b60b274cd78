//! Collection provisioning memo.
//!
//! Creating a collection (and its indexes) is an idempotent check-then-create
//! on every backend, but running it before every operation wastes a round
//! trip. [`CollectionProvisioner`] remembers which collections were provisioned
//! successfully through a connection so the hot path skips the check.
//!
//! The memo is best-effort: a collection dropped behind our back is reported
//! by the next operation as a backend error, and the backend calls
//! [`CollectionProvisioner::invalidate`] so the following call provisions
//! again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::error::{BackendError, StorageError, StorageResult};

type ProvisionKey = (String, String);

/// Runs provisioning at most once per (database, collection) after success.
#[derive(Debug)]
pub struct CollectionProvisioner {
    backend_name: &'static str,
    cells: Mutex<HashMap<ProvisionKey, Arc<OnceCell<()>>>>,
}

impl CollectionProvisioner {
    /// Creates an empty memo for the named backend.
    pub fn new(backend_name: &'static str) -> Self {
        Self {
            backend_name,
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, database: &str, collection: &str) -> Arc<OnceCell<()>> {
        let mut cells = self.cells.lock();
        cells
            .entry((database.to_string(), collection.to_string()))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Ensures `database.collection` exists by running `provision` unless a
    /// previous run already succeeded.
    ///
    /// Concurrent callers share a single in-flight run. Failures are not
    /// remembered, and are always reported as
    /// [`BackendError::ProvisioningFailed`] so that callers see one policy
    /// regardless of backend. Cancellation and deadline errors pass through
    /// unchanged.
    pub async fn ensure<F, Fut>(
        &self,
        database: &str,
        collection: &str,
        provision: F,
    ) -> StorageResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<()>>,
    {
        let cell = self.cell(database, collection);
        if cell.initialized() {
            return Ok(());
        }

        cell.get_or_try_init(provision)
            .await
            .map(|_| ())
            .map_err(|err| self.provisioning_error(collection, err))
    }

    fn provisioning_error(&self, collection: &str, err: StorageError) -> StorageError {
        match err {
            StorageError::Backend(BackendError::ProvisioningFailed { .. })
            | StorageError::Operation(_) => err,
            other => {
                tracing::error!(
                    backend = self.backend_name,
                    collection = %collection,
                    error = %other,
                    "Collection provisioning failed"
                );
                StorageError::Backend(BackendError::ProvisioningFailed {
                    backend_name: self.backend_name.to_string(),
                    collection: collection.to_string(),
                    message: other.to_string(),
                })
            }
        }
    }

    /// Forgets that `database.collection` was provisioned.
    ///
    /// Returns `true` if it was remembered.
    pub fn invalidate(&self, database: &str, collection: &str) -> bool {
        let removed = self
            .cells
            .lock()
            .remove(&(database.to_string(), collection.to_string()))
            .is_some_and(|cell| cell.initialized());
        if removed {
            tracing::warn!(
                backend = self.backend_name,
                database = %database,
                collection = %collection,
                "Collection no longer exists, will provision again"
            );
        }
        removed
    }

    /// Returns `true` if `database.collection` was provisioned successfully.
    pub fn is_provisioned(&self, database: &str, collection: &str) -> bool {
        self.cells
            .lock()
            .get(&(database.to_string(), collection.to_string()))
            .is_some_and(|cell| cell.initialized())
    }

    /// Number of collections currently remembered as provisioned.
    pub fn provisioned_count(&self) -> usize {
        self.cells
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }
}
