//! Cache store that fails a chosen write.

use crate::container::{CacheStore, InMemoryCacheStore, StoredValue};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory store whose `fail_on`-th call to `store` fails (1-based).
///
/// Every other call goes through to the wrapped store.
#[derive(Debug)]
pub struct FailingStore {
    inner: InMemoryCacheStore,
    stores: AtomicUsize,
    fail_on: usize,
}

impl FailingStore {
    pub fn failing_on(fail_on: usize) -> Self {
        Self {
            inner: InMemoryCacheStore::new(),
            stores: AtomicUsize::new(0),
            fail_on,
        }
    }

    /// Number of `store` calls seen so far, the failed one included.
    pub fn store_calls(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}

impl CacheStore for FailingStore {
    fn load(&self, key: &[u8]) -> Result<Option<StoredValue>> {
        self.inner.load(key)
    }

    fn store(&self, key: Bytes, value: &StoredValue) -> Result<()> {
        let call = self.stores.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(Error::Store(format!("write {call} rejected")));
        }
        self.inner.store(key, value)
    }

    fn remove(&self, key: &[u8]) -> Result<bool> {
        self.inner.remove(key)
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }
}
