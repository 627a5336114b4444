//! Cache store collaborator: the persistence tier behind the data container.

use super::codec;
use super::entries::StoredValue;
use crate::error::Result;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Persistence collaborator consulted on read misses and written through on
/// writes unless the caller passes `SkipCacheStore`.
pub trait CacheStore: Send + Sync {
    /// Load a stored value.
    fn load(&self, key: &[u8]) -> Result<Option<StoredValue>>;

    /// Persist a stored value.
    fn store(&self, key: Bytes, value: &StoredValue) -> Result<()>;

    /// Delete a key, returning whether it existed.
    fn remove(&self, key: &[u8]) -> Result<bool>;

    /// Delete every key.
    fn clear(&self) -> Result<()>;
}

/// Store that keeps codec-encoded values in memory.
///
/// Values go through the same encoding they would on disk, so a round trip
/// through this store exercises the wire format.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    data: RwLock<HashMap<Bytes, Bytes>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl CacheStore for InMemoryCacheStore {
    fn load(&self, key: &[u8]) -> Result<Option<StoredValue>> {
        let encoded = self.data.read().get(key).cloned();
        match encoded {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store(&self, key: Bytes, value: &StoredValue) -> Result<()> {
        let encoded = codec::encode(value)?;
        self.data.write().insert(key, encoded);
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.write().remove(key).is_some())
    }

    fn clear(&self) -> Result<()> {
        self.data.write().clear();
        Ok(())
    }
}
