//! In-memory data container holding live stored values.

use super::entries::{now_millis, InternalEntry, StoredValue};
use crate::types::CacheStats;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Local data container backed by a concurrent map.
///
/// Expired entries are removed lazily when read and eagerly by
/// [`DataContainer::purge_expired`].
pub struct DataContainer {
    /// Key to stored value.
    entries: DashMap<Bytes, StoredValue>,

    /// Hit counter for statistics.
    hits: AtomicU64,

    /// Miss counter for statistics.
    misses: AtomicU64,

    /// Entries dropped because they had expired.
    expirations: AtomicU64,
}

impl Default for DataContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl DataContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Read an entry, touching its last-used time.
    pub fn get(&self, key: &[u8]) -> Option<InternalEntry> {
        self.get_at(key, now_millis())
    }

    /// Read an entry as of `now`.
    pub fn get_at(&self, key: &[u8], now: i64) -> Option<InternalEntry> {
        let found = match self.entries.entry(Bytes::copy_from_slice(key)) {
            Entry::Occupied(occupied) if occupied.get().is_expired_at(now) => {
                occupied.remove();
                self.expirations.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key_len = key.len(), "dropped expired entry on read");
                None
            }
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().set_last_used(now);
                Some(InternalEntry::new(
                    occupied.key().clone(),
                    occupied.get().clone(),
                ))
            }
            Entry::Vacant(_) => None,
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Read an entry without touching it or the statistics.
    pub fn peek(&self, key: &[u8]) -> Option<InternalEntry> {
        self.entries
            .get(key)
            .map(|e| InternalEntry::new(e.key().clone(), e.value().clone()))
    }

    /// Check whether a live entry exists.
    pub fn contains(&self, key: &[u8]) -> bool {
        let now = now_millis();
        self.entries
            .get(key)
            .is_some_and(|e| !e.value().is_expired_at(now))
    }

    /// Store a value, returning the previous live value.
    ///
    /// Timing parameters use -1 for unbounded.
    pub fn put(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        lifespan: i64,
        max_idle: i64,
    ) -> Option<StoredValue> {
        let now = now_millis();
        let stored = StoredValue::create(value, now, lifespan, max_idle);
        self.insert_at(key.into(), stored, now)
    }

    /// Store an already built value, returning the previous live value.
    pub fn insert(&self, key: impl Into<Bytes>, value: StoredValue) -> Option<StoredValue> {
        self.insert_at(key.into(), value, now_millis())
    }

    fn insert_at(&self, key: Bytes, value: StoredValue, now: i64) -> Option<StoredValue> {
        self.entries
            .insert(key, value)
            .filter(|previous| !previous.is_expired_at(now))
    }

    /// Remove an entry, returning its live value.
    pub fn remove(&self, key: &[u8]) -> Option<StoredValue> {
        let now = now_millis();
        self.entries
            .remove(key)
            .map(|(_, v)| v)
            .filter(|v| !v.is_expired_at(now))
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the container holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys of every entry currently held.
    pub fn keys(&self) -> Vec<Bytes> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Remove every entry expired as of `now`, returning how many were dropped.
    pub fn purge_expired(&self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired_at(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            self.expirations
                .fetch_add(purged as u64, Ordering::Relaxed);
            tracing::debug!(purged, "purged expired entries");
        }
        purged
    }

    /// Get container statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len() as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}
