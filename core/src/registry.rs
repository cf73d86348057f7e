//! Generic registry of live room state, keyed by [`RoomId`].
//!
//! Backed by `parking_lot::RwLock` rather than an async lock: every
//! operation here is a short, non-blocking map manipulation, never an
//! `.await`, so there is no risk of holding the lock across a suspend
//! point. This mirrors how the rest of this crate reserves `tokio::sync`
//! locks for state that is mutated *while* awaiting something (config
//! store, scheduler) and `parking_lot` for pure in-memory bookkeeping
//! (rate limiter, this registry).

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ids::RoomId;

/// Thread-safe map from room identity to an `Arc<T>` handle, with
/// insert-if-absent semantics so two concurrent "ensure this room
/// exists" callers never stomp each other's handle.
pub struct Registry<T> {
    entries: RwLock<BTreeMap<RoomId, Arc<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &RoomId) -> Option<Arc<T>> {
        self.entries.read().get(id).cloned()
    }

    pub fn contains(&self, id: &RoomId) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Inserts `make()`'s result under `id` only if absent; either way
    /// returns the entry now stored there. `make` is only invoked when
    /// an insert is actually needed.
    pub fn set_if_absent(&self, id: RoomId, make: impl FnOnce() -> T) -> Arc<T> {
        if let Some(existing) = self.get(&id) {
            return existing;
        }
        let mut entries = self.entries.write();
        entries
            .entry(id)
            .or_insert_with(|| Arc::new(make()))
            .clone()
    }

    /// Inserts an already-constructed handle under `id`, overwriting
    /// whatever was there. Unlike [`set_if_absent`](Self::set_if_absent),
    /// this is for callers that already hold the `Arc<T>` they want
    /// stored (e.g. a test wiring a `Room` it built directly).
    pub fn insert(&self, id: RoomId, value: Arc<T>) {
        self.entries.write().insert(id, value);
    }

    pub fn remove(&self, id: &RoomId) -> Option<Arc<T>> {
        self.entries.write().remove(id)
    }

    /// Re-keys an entry from `old` to `new`, e.g. once an adapter
    /// resolves a platform-native id for a room first registered under
    /// its URL-derived id. No-op if `old` isn't present; if `new`
    /// already exists, it is overwritten with `old`'s value.
    pub fn rename(&self, old: &RoomId, new: RoomId) {
        let mut entries = self.entries.write();
        if let Some(value) = entries.remove(old) {
            entries.insert(new, value);
        }
    }

    /// A point-in-time snapshot of every `(id, handle)` pair, for
    /// iteration without holding the lock.
    pub fn snapshot(&self) -> Vec<(RoomId, Arc<T>)> {
        self.entries
            .read()
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect()
    }

    pub fn ids(&self) -> Vec<RoomId> {
        self.entries.read().keys().cloned().collect()
    }
}
