//! Core types used throughout the cache.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Node identifier (cluster address) in the cluster.
pub type NodeId = u64;

/// Per-invocation behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Flag {
    /// Return the previous value even when the caller did not ask for it.
    ForceReturnValue,
    /// Do not acquire stripe locks for this call.
    SkipLocking,
    /// Try the stripe lock once instead of waiting the configured timeout.
    ZeroLockAcquisitionTimeout,
    /// Neither read through nor write through the cache store.
    SkipCacheStore,
    /// Report lock timeouts as `false` instead of an error.
    FailSilently,
}

/// Options threaded explicitly through a single cache call.
///
/// Replaces ambient per-thread flag state: every operation receives the
/// options it runs with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationOptions {
    /// Flags for this call.
    pub flags: BTreeSet<Flag>,
    /// Lifespan override in milliseconds (-1 = unbounded).
    pub lifespan_ms: Option<i64>,
    /// Max-idle override in milliseconds (-1 = unbounded).
    pub max_idle_ms: Option<i64>,
}

impl InvocationOptions {
    /// Options with no flags and no expiration overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a flag.
    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.insert(flag);
        self
    }

    /// Set the lifespan for entries written by this call.
    pub fn with_lifespan(mut self, lifespan: Duration) -> Self {
        self.lifespan_ms = Some(lifespan.as_millis() as i64);
        self
    }

    /// Set the max-idle time for entries written by this call.
    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle_ms = Some(max_idle.as_millis() as i64);
        self
    }

    /// Check whether a flag is set.
    pub fn has(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }
}

/// A write operation recorded by a transaction.
///
/// Modifications are replayed in insertion order on commit and shipped to
/// replicas as part of the prepare message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Modification {
    /// Insert or update a key-value pair.
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        lifespan_ms: i64,
        max_idle_ms: i64,
    },

    /// Insert only if the key is absent.
    PutIfAbsent {
        key: Vec<u8>,
        value: Vec<u8>,
        lifespan_ms: i64,
        max_idle_ms: i64,
    },

    /// Replace the value only if the key is present.
    Replace {
        key: Vec<u8>,
        value: Vec<u8>,
        lifespan_ms: i64,
        max_idle_ms: i64,
    },

    /// Delete a key.
    Remove { key: Vec<u8> },

    /// Clear all entries.
    Clear,
}

impl Modification {
    /// Create an immortal Put.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
            lifespan_ms: -1,
            max_idle_ms: -1,
        }
    }

    /// Create a Put with explicit timing (-1 = unbounded).
    pub fn put_with_expiry(
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        lifespan_ms: i64,
        max_idle_ms: i64,
    ) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
            lifespan_ms,
            max_idle_ms,
        }
    }

    /// Create a Remove.
    pub fn remove(key: impl Into<Vec<u8>>) -> Self {
        Self::Remove { key: key.into() }
    }

    /// Create a Clear.
    pub fn clear() -> Self {
        Self::Clear
    }

    /// The key this modification touches, if it is a single-key write.
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            Self::Put { key, .. }
            | Self::PutIfAbsent { key, .. }
            | Self::Replace { key, .. }
            | Self::Remove { key } => Some(key),
            Self::Clear => None,
        }
    }

    /// Whether applying this modification needs every stripe.
    pub fn requires_global_lock(&self) -> bool {
        matches!(self, Self::Clear)
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries in the data container.
    pub entry_count: u64,
    /// Number of reads that found a live entry.
    pub hits: u64,
    /// Number of reads that found nothing, or an expired entry.
    pub misses: u64,
    /// Number of entries removed because they expired.
    pub expirations: u64,
}
