//! In-process document store shared by every handle on one connection string.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::types::{Document, Filter, Patch};

type CollectionKey = (String, String);

/// Outcome of a mutation addressed by identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    Applied,
    Missing,
    Duplicate,
}

/// A raw `(old, new)` change delivered to watchers before filtering.
#[derive(Debug, Clone)]
pub(crate) struct RawChange {
    pub(crate) old: Option<Document>,
    pub(crate) new: Option<Document>,
}

#[derive(Debug)]
struct Watcher {
    id: u64,
    key: CollectionKey,
    tx: mpsc::UnboundedSender<RawChange>,
}

#[derive(Debug, Default)]
struct ClusterState {
    collections: HashMap<CollectionKey, BTreeMap<String, Document>>,
    watchers: Vec<Watcher>,
    next_watcher: u64,
}

impl ClusterState {
    fn notify(&mut self, key: &CollectionKey, old: Option<Document>, new: Option<Document>) {
        let change = RawChange { old, new };
        self.watchers
            .retain(|watcher| &watcher.key != key || watcher.tx.send(change.clone()).is_ok());
    }
}

/// The storage behind one `memory://` connection string.
///
/// All mutations and watcher notifications happen under one lock, so every
/// watcher sees changes in commit order.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

/// Returned when an operation addresses a collection that does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MissingCollection;

fn key(database: &str, collection: &str) -> CollectionKey {
    (database.to_string(), collection.to_string())
}

impl MemoryCluster {
    /// Creates an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the collection if needed. Returns `true` if it was created.
    pub fn create_collection(&self, database: &str, collection: &str) -> bool {
        let mut state = self.state.lock();
        let key = key(database, collection);
        if state.collections.contains_key(&key) {
            return false;
        }
        state.collections.insert(key, BTreeMap::new());
        true
    }

    /// Drops the collection and ends every change feed watching it.
    ///
    /// Returns `true` if the collection existed.
    pub fn drop_collection(&self, database: &str, collection: &str) -> bool {
        let mut state = self.state.lock();
        let key = key(database, collection);
        state.watchers.retain(|watcher| watcher.key != key);
        state.collections.remove(&key).is_some()
    }

    /// Returns `true` if the collection exists.
    pub fn has_collection(&self, database: &str, collection: &str) -> bool {
        self.state
            .lock()
            .collections
            .contains_key(&key(database, collection))
    }

    /// Number of documents in the collection, if it exists.
    pub fn document_count(&self, database: &str, collection: &str) -> Option<usize> {
        self.state
            .lock()
            .collections
            .get(&key(database, collection))
            .map(BTreeMap::len)
    }

    pub(crate) fn insert(
        &self,
        database: &str,
        collection: &str,
        id: String,
        doc: Document,
    ) -> Result<WriteOutcome, MissingCollection> {
        let mut state = self.state.lock();
        let key = key(database, collection);
        let docs = state.collections.get_mut(&key).ok_or(MissingCollection)?;
        if docs.contains_key(&id) {
            return Ok(WriteOutcome::Duplicate);
        }
        docs.insert(id, doc.clone());
        state.notify(&key, None, Some(doc));
        Ok(WriteOutcome::Applied)
    }

    pub(crate) fn update(
        &self,
        database: &str,
        collection: &str,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<u64, MissingCollection> {
        let mut state = self.state.lock();
        let key = key(database, collection);
        let docs = state.collections.get_mut(&key).ok_or(MissingCollection)?;

        let mut matched = 0;
        let mut changes = Vec::new();
        for doc in docs.values_mut().filter(|doc| filter.matches(doc)) {
            matched += 1;
            let old = doc.clone();
            patch.apply_to(doc);
            if *doc != old {
                changes.push((old, doc.clone()));
            }
        }

        for (old, new) in changes {
            state.notify(&key, Some(old), Some(new));
        }
        Ok(matched)
    }

    pub(crate) fn update_id(
        &self,
        database: &str,
        collection: &str,
        id: &str,
        patch: &Patch,
    ) -> Result<WriteOutcome, MissingCollection> {
        self.modify(database, collection, id, |doc| patch.apply_to(doc))
    }

    pub(crate) fn replace_id(
        &self,
        database: &str,
        collection: &str,
        id: &str,
        replacement: Document,
    ) -> Result<WriteOutcome, MissingCollection> {
        self.modify(database, collection, id, move |doc| *doc = replacement)
    }

    fn modify<F>(
        &self,
        database: &str,
        collection: &str,
        id: &str,
        change: F,
    ) -> Result<WriteOutcome, MissingCollection>
    where
        F: FnOnce(&mut Document),
    {
        let mut state = self.state.lock();
        let key = key(database, collection);
        let docs = state.collections.get_mut(&key).ok_or(MissingCollection)?;
        let Some(doc) = docs.get_mut(id) else {
            return Ok(WriteOutcome::Missing);
        };

        let old = doc.clone();
        change(doc);
        let new = doc.clone();
        if new != old {
            state.notify(&key, Some(old), Some(new));
        }
        Ok(WriteOutcome::Applied)
    }

    pub(crate) fn remove_id(
        &self,
        database: &str,
        collection: &str,
        id: &str,
    ) -> Result<WriteOutcome, MissingCollection> {
        let mut state = self.state.lock();
        let key = key(database, collection);
        let docs = state.collections.get_mut(&key).ok_or(MissingCollection)?;
        match docs.remove(id) {
            Some(old) => {
                state.notify(&key, Some(old), None);
                Ok(WriteOutcome::Applied)
            }
            None => Ok(WriteOutcome::Missing),
        }
    }

    pub(crate) fn get(
        &self,
        database: &str,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, MissingCollection> {
        let state = self.state.lock();
        let docs = state
            .collections
            .get(&key(database, collection))
            .ok_or(MissingCollection)?;
        Ok(docs.get(id).cloned())
    }

    pub(crate) fn scan(
        &self,
        database: &str,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, MissingCollection> {
        let state = self.state.lock();
        let docs = state
            .collections
            .get(&key(database, collection))
            .ok_or(MissingCollection)?;
        Ok(docs
            .values()
            .filter(|doc| filter.matches(doc))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    pub(crate) fn watch(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<(u64, mpsc::UnboundedReceiver<RawChange>), MissingCollection> {
        let mut state = self.state.lock();
        let key = key(database, collection);
        if !state.collections.contains_key(&key) {
            return Err(MissingCollection);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_watcher;
        state.next_watcher += 1;
        state.watchers.push(Watcher { id, key, tx });
        Ok((id, rx))
    }

    pub(crate) fn unwatch(&self, watcher_id: u64) {
        self.state
            .lock()
            .watchers
            .retain(|watcher| watcher.id != watcher_id);
    }

    /// Number of open change feeds.
    pub fn watcher_count(&self) -> usize {
        self.state.lock().watchers.len()
    }
}
