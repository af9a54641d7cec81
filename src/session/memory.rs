//! In-memory document store and the session that works against it.
//!
//! Documents are JSON values grouped into collections and keyed by string.
//! A [`MemoryUnitOfWork`] stages changes privately; reads see the staged
//! state first, then the shared store. The store takes no part in the
//! ambient transaction, so `flush` only validates the staged changes and
//! holds them back; `commit`, which runs after the ambient transaction
//! committed, applies them all at once or none of them. A session closed
//! before that discards them and the store stays untouched.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::session::error::{SessionError, SessionResult};
use crate::session::UnitOfWork;

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

/// Shared document store. Clones refer to the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a committed document.
    pub fn get(&self, collection: &str, key: &str) -> Option<Value> {
        self.collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
    }

    pub fn contains(&self, collection: &str, key: &str) -> bool {
        self.get(collection, key).is_some()
    }

    /// Number of committed documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Open a new session over this store.
    pub fn session(&self) -> MemoryUnitOfWork {
        MemoryUnitOfWork::new(self.clone())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let collections = self.collections.read();
        f.debug_map()
            .entries(collections.iter().map(|(name, docs)| (name, docs.len())))
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Change {
    Insert { collection: String, key: String, doc: Value },
    Upsert { collection: String, key: String, doc: Value },
    Remove { collection: String, key: String },
}

impl Change {
    fn target(&self) -> (&str, &str) {
        match self {
            Change::Insert { collection, key, .. }
            | Change::Upsert { collection, key, .. }
            | Change::Remove { collection, key } => (collection, key),
        }
    }
}

#[derive(Default)]
struct Staged {
    changes: Vec<Change>,
    /// Changes before this index passed `flush` and wait for `commit`.
    flushed: usize,
}

/// Session staging changes against a [`MemoryStore`].
pub struct MemoryUnitOfWork {
    store: MemoryStore,
    staged: Mutex<Staged>,
    flushes: AtomicUsize,
    fail_next_flush: AtomicBool,
    closed: AtomicBool,
}

impl MemoryUnitOfWork {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            staged: Mutex::new(Staged::default()),
            flushes: AtomicUsize::new(0),
            fail_next_flush: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    /// Stage a new document. Fails if the key is already visible.
    pub fn insert(&self, collection: &str, key: &str, doc: Value) -> SessionResult<()> {
        self.ensure_open()?;
        let mut staged = self.staged.lock();
        if Self::visible(&self.store, &staged.changes, collection, key).is_some() {
            return Err(SessionError::already_exists(collection, key));
        }
        staged.changes.push(Change::Insert {
            collection: collection.to_string(),
            key: key.to_string(),
            doc,
        });
        Ok(())
    }

    /// Stage a document, replacing any existing one.
    pub fn upsert(&self, collection: &str, key: &str, doc: Value) -> SessionResult<()> {
        self.ensure_open()?;
        self.staged.lock().changes.push(Change::Upsert {
            collection: collection.to_string(),
            key: key.to_string(),
            doc,
        });
        Ok(())
    }

    /// Stage removal of a document. Fails if the key is not visible.
    pub fn remove(&self, collection: &str, key: &str) -> SessionResult<()> {
        self.ensure_open()?;
        let mut staged = self.staged.lock();
        if Self::visible(&self.store, &staged.changes, collection, key).is_none() {
            return Err(SessionError::not_found(collection, key));
        }
        staged.changes.push(Change::Remove {
            collection: collection.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }

    /// Read a document as this session sees it.
    pub fn get(&self, collection: &str, key: &str) -> SessionResult<Option<Value>> {
        self.ensure_open()?;
        let staged = self.staged.lock();
        Ok(Self::visible(&self.store, &staged.changes, collection, key))
    }

    /// Every document of a collection as this session sees it, ordered by key.
    pub fn list(&self, collection: &str) -> SessionResult<Vec<(String, Value)>> {
        self.ensure_open()?;
        let staged = self.staged.lock();
        let mut docs = self
            .store
            .collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default();
        for change in staged.changes.iter().filter(|c| c.target().0 == collection) {
            Self::apply(&mut docs, change);
        }
        Ok(docs.into_iter().collect())
    }

    /// Number of staged, unflushed changes.
    pub fn pending(&self) -> usize {
        let staged = self.staged.lock();
        staged.changes.len() - staged.flushed
    }

    /// Number of flushed changes waiting for `commit`.
    pub fn prepared(&self) -> usize {
        self.staged.lock().flushed
    }

    /// Number of successful flushes.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make the next flush fail without touching the store.
    pub fn fail_next_flush(&self) {
        self.fail_next_flush.store(true, Ordering::SeqCst);
    }

    fn visible(
        store: &MemoryStore,
        staged: &[Change],
        collection: &str,
        key: &str,
    ) -> Option<Value> {
        let latest = staged
            .iter()
            .rev()
            .find(|c| c.target() == (collection, key));
        match latest {
            Some(Change::Insert { doc, .. }) | Some(Change::Upsert { doc, .. }) => {
                Some(doc.clone())
            }
            Some(Change::Remove { .. }) => None,
            None => store.get(collection, key),
        }
    }

    /// The store as it would look after `changes`, or the first conflict.
    fn prepare(collections: &Collections, changes: &[Change]) -> SessionResult<Collections> {
        let mut scratch = collections.clone();
        for change in changes {
            let (collection, key) = change.target();
            let docs = scratch.entry(collection.to_string()).or_default();
            match change {
                Change::Insert { .. } if docs.contains_key(key) => {
                    return Err(SessionError::already_exists(collection, key));
                }
                Change::Remove { .. } if !docs.contains_key(key) => {
                    return Err(SessionError::not_found(collection, key));
                }
                _ => Self::apply(docs, change),
            }
        }
        scratch.retain(|_, docs| !docs.is_empty());
        Ok(scratch)
    }

    fn apply(docs: &mut BTreeMap<String, Value>, change: &Change) {
        match change {
            Change::Insert { key, doc, .. } | Change::Upsert { key, doc, .. } => {
                docs.insert(key.clone(), doc.clone());
            }
            Change::Remove { key, .. } => {
                docs.remove(key);
            }
        }
    }
}

impl UnitOfWork for MemoryUnitOfWork {
    fn flush(&self) -> SessionResult<()> {
        self.ensure_open()?;
        if self.fail_next_flush.swap(false, Ordering::SeqCst) {
            return Err(SessionError::Flush("injected flush failure".to_string()));
        }

        let mut staged = self.staged.lock();
        Self::prepare(&self.store.collections.read(), &staged.changes)?;
        staged.flushed = staged.changes.len();
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&self) -> SessionResult<()> {
        self.ensure_open()?;
        let mut staged = self.staged.lock();
        if staged.flushed == 0 {
            return Ok(());
        }

        // Another session may have committed since the flush; re-validate
        // so a conflict still applies nothing.
        let flushed = staged.flushed;
        let mut collections = self.store.collections.write();
        *collections = Self::prepare(&collections, &staged.changes[..flushed])?;
        staged.changes.drain(..flushed);
        staged.flushed = 0;
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.staged.lock() = Staged::default();
    }
}

impl std::fmt::Debug for MemoryUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryUnitOfWork")
            .field("pending", &self.pending())
            .field("prepared", &self.prepared())
            .field("flushes", &self.flush_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_staged_changes_invisible_until_commit() {
        let store = MemoryStore::new();
        let session = store.session();

        session.insert("users", "1", json!({"name": "Alice"})).unwrap();
        assert_eq!(
            session.get("users", "1").unwrap(),
            Some(json!({"name": "Alice"}))
        );
        assert!(!store.contains("users", "1"));

        session.flush().unwrap();
        assert!(!store.contains("users", "1"));
        assert_eq!(session.pending(), 0);
        assert_eq!(session.prepared(), 1);
        assert_eq!(session.flush_count(), 1);

        session.commit().unwrap();
        assert!(store.contains("users", "1"));
        assert_eq!(session.prepared(), 0);
    }

    #[test]
    fn test_close_after_flush_discards_prepared() {
        let store = MemoryStore::new();
        let session = store.session();
        session.insert("users", "1", json!({})).unwrap();
        session.flush().unwrap();

        session.close();
        assert!(!store.contains("users", "1"));
        assert!(matches!(session.commit(), Err(SessionError::Closed)));
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let store = MemoryStore::new();
        let session = store.session();
        session.insert("users", "1", json!({})).unwrap();

        let err = session.insert("users", "1", json!({})).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists { .. }));
    }

    #[test]
    fn test_remove_and_list() {
        let store = MemoryStore::new();
        let first = store.session();
        first.insert("users", "a", json!(1)).unwrap();
        first.insert("users", "b", json!(2)).unwrap();
        first.flush().unwrap();
        first.commit().unwrap();

        let second = store.session();
        second.remove("users", "a").unwrap();
        second.upsert("users", "c", json!(3)).unwrap();
        let keys: Vec<_> = second
            .list("users")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);

        assert!(matches!(
            second.remove("users", "zzz"),
            Err(SessionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_conflicting_flush_applies_nothing() {
        let store = MemoryStore::new();
        let first = store.session();
        let second = store.session();

        first.insert("users", "1", json!("first")).unwrap();
        second.upsert("users", "2", json!("second")).unwrap();
        second.insert("users", "1", json!("second")).unwrap();

        first.flush().unwrap();
        first.commit().unwrap();
        assert!(second.flush().is_err());
        assert!(!store.contains("users", "2"));
        assert_eq!(store.get("users", "1"), Some(json!("first")));
    }

    #[test]
    fn test_conflicting_commit_applies_nothing() {
        let store = MemoryStore::new();
        let first = store.session();
        let second = store.session();

        first.insert("users", "1", json!("first")).unwrap();
        second.upsert("users", "2", json!("second")).unwrap();
        second.insert("users", "1", json!("second")).unwrap();

        first.flush().unwrap();
        second.flush().unwrap();
        first.commit().unwrap();

        assert!(matches!(
            second.commit(),
            Err(SessionError::AlreadyExists { .. })
        ));
        assert!(!store.contains("users", "2"));
        assert_eq!(store.get("users", "1"), Some(json!("first")));
    }

    #[test]
    fn test_close_discards_pending() {
        let store = MemoryStore::new();
        let session = store.session();
        session.insert("users", "1", json!({})).unwrap();
        session.close();

        assert!(session.is_closed());
        assert!(matches!(session.flush(), Err(SessionError::Closed)));
        assert_eq!(store.len("users"), 0);
    }

    #[test]
    fn test_injected_flush_failure() {
        let store = MemoryStore::new();
        let session = store.session();
        session.insert("users", "1", json!({})).unwrap();
        session.fail_next_flush();

        assert!(matches!(session.flush(), Err(SessionError::Flush(_))));
        assert_eq!(session.flush_count(), 0);
        session.flush().unwrap();
        session.commit().unwrap();
        assert!(store.contains("users", "1"));
    }
}
