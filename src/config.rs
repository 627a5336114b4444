//! Configuration types for the cache.

use crate::error::{Error, Result};
use crate::types::NodeId;
use std::time::Duration;

/// Main configuration for a cache instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Identifier of the local node.
    pub node_id: NodeId,

    /// Number of owners (primary + backups) per key.
    pub num_owners: usize,

    /// Number of virtual segments each node contributes to the hash wheel.
    pub segments_per_node: usize,

    /// Stripe locking configuration.
    pub locking: LockingConfig,

    /// Transaction configuration.
    pub transaction: TransactionConfig,

    /// Default expiration for entries written without overrides.
    pub expiration: ExpirationConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            num_owners: 2,
            segments_per_node: 256,
            locking: LockingConfig::default(),
            transaction: TransactionConfig::default(),
            expiration: ExpirationConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new configuration for the given node.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    /// Set the number of owners per key.
    pub fn with_num_owners(mut self, num_owners: usize) -> Self {
        self.num_owners = num_owners;
        self
    }

    /// Set the number of virtual segments per node.
    pub fn with_segments_per_node(mut self, segments: usize) -> Self {
        self.segments_per_node = segments;
        self
    }

    /// Set the locking configuration.
    pub fn with_locking(mut self, locking: LockingConfig) -> Self {
        self.locking = locking;
        self
    }

    /// Set the number of lock stripes.
    pub fn with_concurrency_level(mut self, stripes: usize) -> Self {
        self.locking.concurrency_level = stripes;
        self
    }

    /// Set the default lock acquisition timeout.
    pub fn with_lock_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.locking.lock_acquisition_timeout = timeout;
        self
    }

    /// Set the transaction configuration.
    pub fn with_transaction(mut self, transaction: TransactionConfig) -> Self {
        self.transaction = transaction;
        self
    }

    /// Set the default lifespan for new entries.
    pub fn with_default_lifespan(mut self, lifespan: Duration) -> Self {
        self.expiration.lifespan = Some(lifespan);
        self
    }

    /// Set the default max-idle for new entries.
    pub fn with_default_max_idle(mut self, max_idle: Duration) -> Self {
        self.expiration.max_idle = Some(max_idle);
        self
    }

    /// Reject configurations the cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.locking.concurrency_level == 0 {
            return Err(Error::Config("concurrency_level must be at least 1".into()));
        }
        if self.num_owners == 0 {
            return Err(Error::Config("num_owners must be at least 1".into()));
        }
        if self.segments_per_node == 0 {
            return Err(Error::Config("segments_per_node must be at least 1".into()));
        }
        Ok(())
    }
}

/// Stripe locking configuration.
#[derive(Debug, Clone)]
pub struct LockingConfig {
    /// Number of lock stripes.
    pub concurrency_level: usize,

    /// How long a caller waits for a stripe before giving up.
    pub lock_acquisition_timeout: Duration,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            concurrency_level: 32,
            lock_acquisition_timeout: Duration::from_secs(10),
        }
    }
}

impl LockingConfig {
    /// Create a locking config with the given stripe count.
    pub fn new(concurrency_level: usize) -> Self {
        Self {
            concurrency_level,
            ..Default::default()
        }
    }

    /// Set the acquisition timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquisition_timeout = timeout;
        self
    }
}

/// Transaction configuration.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Whether operations may be enlisted in transactions.
    pub enabled: bool,

    /// How long to wait for remote lock acquisition/release replies.
    pub remote_lock_timeout: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remote_lock_timeout: Duration::from_secs(15),
        }
    }
}

/// Default expiration for entries.
#[derive(Debug, Clone, Default)]
pub struct ExpirationConfig {
    /// Default lifespan; `None` means unbounded.
    pub lifespan: Option<Duration>,

    /// Default max-idle; `None` means unbounded.
    pub max_idle: Option<Duration>,
}

impl ExpirationConfig {
    /// Lifespan in milliseconds, -1 when unbounded.
    pub fn lifespan_ms(&self) -> i64 {
        self.lifespan.map_or(-1, |d| d.as_millis() as i64)
    }

    /// Max-idle in milliseconds, -1 when unbounded.
    pub fn max_idle_ms(&self) -> i64 {
        self.max_idle.map_or(-1, |d| d.as_millis() as i64)
    }
}
