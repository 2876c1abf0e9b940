// ── Keyed reactive collection ──
//
// Storage keyed by an identity string with an optional secondary routing
// index, plus push-based change notification via a `watch` channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Lookup tables of one collection, swapped in as a whole.
struct Maps<T> {
    by_key: HashMap<String, Arc<T>>,

    /// Secondary index: routing key -> identity key.
    index_to_key: HashMap<String, String>,

    /// Reverse of `index_to_key` for cleanup on replace and removal.
    key_to_index: HashMap<String, String>,
}

impl<T> Maps<T> {
    fn empty() -> Self {
        Self {
            by_key: HashMap::new(),
            index_to_key: HashMap::new(),
            key_to_index: HashMap::new(),
        }
    }

    fn link(&mut self, key: &str, index: String) {
        self.index_to_key.insert(index.clone(), key.to_owned());
        self.key_to_index.insert(key.to_owned(), index);
    }

    /// Drop the routing entry owned by `key`. An index that has since been
    /// claimed by another key is left alone.
    fn unlink(&mut self, key: &str) {
        let Some(index) = self.key_to_index.remove(key) else {
            return;
        };
        if self.index_to_key.get(&index).is_some_and(|owner| owner == key) {
            self.index_to_key.remove(&index);
        }
    }
}

impl<T> Clone for Maps<T> {
    fn clone(&self) -> Self {
        Self {
            by_key: self.by_key.clone(),
            index_to_key: self.index_to_key.clone(),
            key_to_index: self.key_to_index.clone(),
        }
    }
}

/// A concurrent, reactive collection for a single entity type.
///
/// `by_key` holds the records under their identity key (network address
/// for devices, call id for calls); `index_to_key` maps a secondary
/// routing key (directory number) back to the identity key. Writers are
/// serialized through `write_gate`, build the next tables off to the side
/// and swap them in at once. Readers never take the gate and only ever
/// see complete tables.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    maps: ArcSwap<Maps<T>>,

    write_gate: Mutex<()>,

    /// Full snapshot ordered by identity key, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            maps: ArcSwap::from_pointee(Maps::empty()),
            write_gate: Mutex::new(()),
            snapshot,
        }
    }

    /// Insert or replace an entity. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: String, index: Option<String>, entity: T) -> bool {
        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = Maps::clone(&self.maps.load());
        next.unlink(&key);
        if let Some(index) = index {
            next.link(&key, index);
        }
        let is_new = next.by_key.insert(key, Arc::new(entity)).is_none();

        self.commit(next);
        is_new
    }

    /// Remove an entity by key. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, key: &str) -> Option<Arc<T>> {
        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = Maps::clone(&self.maps.load());
        let removed = next.by_key.remove(key)?;
        next.unlink(key);
        self.commit(next);
        Some(removed)
    }

    /// Apply `update` to every entity matching `matches`, publishing one
    /// snapshot for the whole batch. Returns how many entities changed.
    pub(crate) fn update_where<P, F>(&self, matches: P, update: F) -> usize
    where
        P: Fn(&T) -> bool,
        F: Fn(&mut T),
    {
        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = Maps::clone(&self.maps.load());
        let mut updated = 0;
        for entity in next.by_key.values_mut() {
            if matches(entity) {
                let mut changed = T::clone(entity);
                update(&mut changed);
                *entity = Arc::new(changed);
                updated += 1;
            }
        }
        if updated > 0 {
            self.commit(next);
        }
        updated
    }

    /// Replace the whole collection, publishing a single snapshot.
    pub(crate) fn replace_all(&self, items: Vec<(String, Option<String>, T)>) {
        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = Maps::empty();
        for (key, index, entity) in items {
            if let Some(index) = index {
                next.link(&key, index);
            }
            next.by_key.insert(key, Arc::new(entity));
        }
        self.commit(next);
    }

    /// Look up an entity by its identity key.
    pub(crate) fn get_by_key(&self, key: &str) -> Option<Arc<T>> {
        self.maps.load().by_key.get(key).cloned()
    }

    /// Look up an entity by its routing key (secondary index).
    pub(crate) fn get_by_index(&self, index: &str) -> Option<Arc<T>> {
        let maps = self.maps.load();
        let key = maps.index_to_key.get(index)?;
        maps.by_key.get(key).cloned()
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.maps.load().by_key.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Swap in `next` and broadcast its ordered snapshot. Caller holds
    /// the write gate.
    fn commit(&self, next: Maps<T>) {
        let mut entries: Vec<(&String, &Arc<T>)> = next.by_key.iter().collect();
        entries.sort_unstable_by_key(|(key, _)| *key);
        let values: Vec<Arc<T>> = entries.into_iter().map(|(_, v)| Arc::clone(v)).collect();

        self.maps.store(Arc::new(next));
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
