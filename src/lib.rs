//! Core of a clustered, transactional key/value cache.
//!
//! This crate provides the pieces every node of the cache runs:
//! - **MurmurHash2** key hashing shared by lock striping and owner placement
//! - **Striped reader/writer locks** with per-key and global acquisition
//! - **Stored values** with lifespan and max-idle expiry and a compact wire codec
//! - **Transaction contexts** with rollback-only marking driven by membership changes
//! - **Remote response envelopes** that keep remote failures apart from transport failures
//!
//! # Features
//!
//! - Timeout-bounded, reentrant stripe locks; global locks taken in ascending order
//! - Two-phase commit over an [`RpcManager`](remoting::RpcManager) collaborator
//! - Optional read-through/write-through [`CacheStore`](container::CacheStore)
//! - Per-call behaviour switches passed explicitly as [`InvocationOptions`]
//!
//! # Example
//!
//! ```rust,no_run
//! use cortado::{CacheConfig, InvocationOptions, TransactionalCache, Xid};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::new(1)
//!         .with_concurrency_level(32)
//!         .with_lock_acquisition_timeout(Duration::from_millis(500));
//!     let cache = TransactionalCache::new(config)?;
//!     let opts = InvocationOptions::default();
//!
//!     cache.put("user:123", "Alice", &opts)?;
//!     assert_eq!(cache.get(b"user:123", &opts)?.as_deref(), Some(&b"Alice"[..]));
//!
//!     let mut tx = cache.begin(Xid::new(1, b"order-7".to_vec(), Vec::new()))?;
//!     cache.tx_put(&mut tx, "user:123", "Bob", &opts)?;
//!     cache.tx_remove(&mut tx, b"user:456", &opts)?;
//!     cache.commit(&mut tx)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Application Layer                │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │          TransactionalCache API             │
//! │  • get / put / remove / clear               │
//! │  • begin / tx_* / commit / rollback         │
//! └─────────────────────────────────────────────┘
//!                     │
//!     ┌───────────────┼───────────────┬───────────────┐
//!     ▼               ▼               ▼               ▼
//! ┌─────────┐   ┌──────────┐   ┌────────────┐   ┌──────────┐
//! │ Striped │   │Transaction│  │   Data     │   │ Remoting │
//! │  Locks  │   │Coordinator│  │ Container  │   │ envelope │
//! └─────────┘   └──────────┘   └────────────┘   └──────────┘
//! ```

pub mod cache;
pub mod cluster;
pub mod config;
pub mod container;
pub mod error;
pub mod hash;
pub mod lock;
pub mod metrics;
pub mod partitioning;
pub mod remoting;
pub mod testing;
pub mod transaction;
pub mod types;

// Re-export main types for convenience
pub use cache::TransactionalCache;
pub use config::{CacheConfig, ExpirationConfig, LockingConfig, TransactionConfig};
pub use error::{CodecError, Error, LockError, Result, TransactionError};
pub use types::{CacheStats, Flag, InvocationOptions, Modification, NodeId};

// Re-export hashing and locking types
pub use hash::{HashKey, MurmurHash2};
pub use lock::{LockOwner, StripedLock};

// Re-export entry model types
pub use container::{CacheEntry, CacheStore, InMemoryCacheStore, InternalEntry, StoredValue};

// Re-export transaction types
pub use transaction::{GlobalTransaction, LocalTransaction, TransactionState, Xid};

// Re-export remoting and cluster types
pub use cluster::{ClusterView, MemberEvent, MemberEventListener};
pub use remoting::{RemoteCommand, RemoteException, Response, RpcManager};

// Re-export metrics types
pub use metrics::{Counter, LockMetricsSnapshot, TransactionMetricsSnapshot};

// Re-export testing types
pub use testing::{LoopbackNetwork, NodeFault, TestCluster};
