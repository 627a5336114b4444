//! Insertion-ordered bidirectional map of entries a transaction has looked up.

use crate::container::CacheEntry;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Key↔entry map that remembers insertion order.
///
/// Forward and reverse indexes are updated together on every insert, so
/// `get(key)` and `key_of(entry)` always agree. Re-inserting a key keeps
/// its original position; inserting an entry already mapped under another
/// key moves the entry to the new key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookedUpEntries<K, E> {
    order: Vec<K>,
    forward: BTreeMap<K, E>,
    reverse: BTreeMap<E, K>,
}

static EMPTY: LookedUpEntries<Bytes, CacheEntry> = LookedUpEntries::new();

/// Shared empty view returned when a transaction has looked nothing up.
pub fn empty_looked_up_entries() -> &'static LookedUpEntries<Bytes, CacheEntry> {
    &EMPTY
}

impl<K: Ord + Clone, E: Ord + Clone> Default for LookedUpEntries<K, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> LookedUpEntries<K, E> {
    pub const fn new() -> Self {
        Self {
            order: Vec::new(),
            forward: BTreeMap::new(),
            reverse: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl<K: Ord + Clone, E: Ord + Clone> LookedUpEntries<K, E> {
    /// Insert or overwrite, returning the entry previously mapped to `key`.
    pub fn put(&mut self, key: K, entry: E) -> Option<E> {
        if let Some(other_key) = self.reverse.get(&entry).cloned() {
            if other_key != key {
                self.forward.remove(&other_key);
                self.order.retain(|k| *k != other_key);
            }
        }

        let previous = self.forward.insert(key.clone(), entry.clone());
        match &previous {
            Some(old) => {
                self.reverse.remove(old);
            }
            None => self.order.push(key.clone()),
        }
        self.reverse.insert(entry, key);
        previous
    }

    pub fn get(&self, key: &K) -> Option<&E> {
        self.forward.get(key)
    }

    /// Reverse lookup.
    pub fn key_of(&self, entry: &E) -> Option<&K> {
        self.reverse.get(entry)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.forward.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    /// Pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &E)> {
        self.order
            .iter()
            .filter_map(move |k| self.forward.get(k).map(|e| (k, e)))
    }
}
