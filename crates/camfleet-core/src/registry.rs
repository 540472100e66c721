// ── Fleet registry ──
//
// Identity-sorted collection of cameras or interfaces. The registry is
// not synchronised itself: its host (the LAN supervisor) keeps it behind
// one mutex and only takes that lock for the mutation. Readers that
// don't want the lock use the `watch` snapshot, rebuilt on mutation.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;

/// Anything stored in a registry exposes a stable identity.
pub trait Keyed {
    fn key(&self) -> &str;
}

pub struct Registry<T: Keyed + Send + Sync + 'static> {
    /// Primary storage, sorted by identity.
    by_key: BTreeMap<String, Arc<T>>,

    /// Sorted snapshot, rebuilt on mutation for lock-free readers.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Keyed + Send + Sync + 'static> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed + Send + Sync + 'static> Registry<T> {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_key: BTreeMap::new(),
            snapshot,
        }
    }

    /// Insert if absent. Returns `false` (and leaves the registry untouched)
    /// when the identity is already present.
    pub fn add(&mut self, item: Arc<T>) -> bool {
        let key = item.key();
        if self.by_key.contains_key(key) {
            return false;
        }
        self.by_key.insert(key.to_owned(), item);
        self.rebuild_snapshot();
        true
    }

    /// Remove by identity. Returns the removed item if it existed.
    pub fn remove(&mut self, key: &str) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key);
        if removed.is_some() {
            self.rebuild_snapshot();
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(Arc::clone)
    }

    pub fn has(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Items in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.by_key.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Current sorted snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    fn rebuild_snapshot(&self) {
        let values: Vec<Arc<T>> = self.by_key.values().map(Arc::clone).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
