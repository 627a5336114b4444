//! Embedded transactional cache.
//!
//! ```text
//!                        ┌──────────────────────────────┐
//!   get/put/remove ─────►│      TransactionalCache      │
//!   begin/tx_*/commit    │                              │
//!                        │  ConsistentHash ─ owners     │
//!                        │  StripedLock    ─ stripes    │──► RpcManager (remote owners)
//!                        │  TransactionCoordinator      │
//!                        │  DataContainer  ─ entries    │──► CacheStore (read/write-through)
//!                        └──────────────────────────────┘
//! ```
//!
//! Non-transactional writes hold the key's stripe (or every stripe, for
//! `clear`) for the duration of the call through a scoped guard.
//! Transactional writes take their stripes on behalf of the transaction and
//! keep them until commit or rollback.

mod remote;
mod undo;

use crate::cluster::{ClusterView, MemberEvent, MemberEventListener};
use crate::config::CacheConfig;
use crate::container::{
    now_millis, CacheEntry, CacheStore, DataContainer, InternalEntry, StoredValue,
};
use crate::error::{Error, Result};
use crate::lock::{LockOwner, StripedLock};
use crate::metrics::{LockMetricsSnapshot, TransactionMetricsSnapshot};
use crate::partitioning::ConsistentHash;
use crate::remoting::RpcManager;
use crate::transaction::{
    GlobalTransaction, LocalTransaction, TransactionCoordinator, TransactionTable, Xid,
};
use crate::types::{CacheStats, Flag, InvocationOptions, Modification, NodeId};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use remote::RemoteTransaction;
use undo::UndoLog;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The cache instance embedded on one node.
pub struct TransactionalCache {
    config: CacheConfig,
    container: Arc<DataContainer>,
    locks: Arc<StripedLock>,
    table: Arc<TransactionTable>,
    coordinator: TransactionCoordinator,
    view: RwLock<ClusterView>,
    topology: RwLock<ConsistentHash>,
    store: Option<Arc<dyn CacheStore>>,
    /// Transactions coordinated elsewhere that hold locks on this node.
    remote_txs: Mutex<HashMap<GlobalTransaction, RemoteTransaction>>,
    /// Extra listeners told about every view this cache installs.
    listeners: RwLock<Vec<Arc<dyn MemberEventListener>>>,
}

impl TransactionalCache {
    /// Create a cache whose only member is the local node.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let locks = Arc::new(StripedLock::from_config(&config.locking));
        let table = Arc::new(TransactionTable::new(config.node_id));
        let coordinator = TransactionCoordinator::new(
            config.node_id,
            locks.clone(),
            table.clone(),
            config.transaction.clone(),
        );
        let topology = ConsistentHash::from_members(
            config.num_owners,
            config.segments_per_node,
            [config.node_id],
        );

        info!(
            node_id = config.node_id,
            stripes = locks.num_stripes(),
            num_owners = config.num_owners,
            "Cache started"
        );

        Ok(Self {
            view: RwLock::new(ClusterView::new([config.node_id])),
            topology: RwLock::new(topology),
            container: Arc::new(DataContainer::new()),
            locks,
            table,
            coordinator,
            store: None,
            remote_txs: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            config,
        })
    }

    /// Attach a cache store for read-through and write-through.
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the messaging collaborator used for remote owners.
    pub fn with_rpc(mut self, rpc: Arc<dyn RpcManager>) -> Self {
        self.coordinator = self.coordinator.with_rpc(rpc);
        self
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn locks(&self) -> &StripedLock {
        &self.locks
    }

    pub fn container(&self) -> &DataContainer {
        &self.container
    }

    pub fn transactions(&self) -> &TransactionTable {
        &self.table
    }

    /// Owners of a key under the current view, primary first.
    pub fn owners(&self, key: &[u8]) -> Vec<NodeId> {
        self.topology.read().owners(key)
    }

    pub fn members(&self) -> Vec<NodeId> {
        self.view.read().members().iter().copied().collect()
    }

    // ==================== Non-transactional operations ====================

    /// Read a value, falling back to the cache store on a miss.
    pub fn get(&self, key: &[u8], options: &InvocationOptions) -> Result<Option<Bytes>> {
        Ok(self
            .lookup(key, options)?
            .map(|entry| entry.value().clone()))
    }

    /// Store a value, returning the previous one.
    ///
    /// With `FailSilently`, a lock timeout skips the write and returns `Ok(None)`.
    pub fn put(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        options: &InvocationOptions,
    ) -> Result<Option<Bytes>> {
        let key: Bytes = key.into();
        let value: Bytes = value.into();
        let (lifespan, max_idle) = self.expiration(options);
        let modification =
            Modification::put_with_expiry(key.to_vec(), value.to_vec(), lifespan, max_idle);
        self.write_locked(&key, &modification, options)
    }

    /// Store a value only if the key has no live entry. Returns the existing value.
    pub fn put_if_absent(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        options: &InvocationOptions,
    ) -> Result<Option<Bytes>> {
        let key: Bytes = key.into();
        let value: Bytes = value.into();
        let (lifespan_ms, max_idle_ms) = self.expiration(options);
        let modification = Modification::PutIfAbsent {
            key: key.to_vec(),
            value: value.to_vec(),
            lifespan_ms,
            max_idle_ms,
        };
        self.write_locked(&key, &modification, options)
    }

    /// Replace the value of a key with a live entry. Returns the replaced value.
    pub fn replace(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        options: &InvocationOptions,
    ) -> Result<Option<Bytes>> {
        let key: Bytes = key.into();
        let value: Bytes = value.into();
        let (lifespan_ms, max_idle_ms) = self.expiration(options);
        let modification = Modification::Replace {
            key: key.to_vec(),
            value: value.to_vec(),
            lifespan_ms,
            max_idle_ms,
        };
        self.write_locked(&key, &modification, options)
    }

    /// Remove a key, returning its value.
    pub fn remove(&self, key: &[u8], options: &InvocationOptions) -> Result<Option<Bytes>> {
        self.write_locked(key, &Modification::remove(key), options)
    }

    /// Remove every entry under the global lock.
    pub fn clear(&self, options: &InvocationOptions) -> Result<()> {
        let _guard = if options.has(Flag::SkipLocking) {
            None
        } else {
            let timeout = self.lock_timeout(options);
            match self.locks.lock_global(true, timeout) {
                Ok(guard) => Some(guard),
                Err(e) if options.has(Flag::FailSilently) => {
                    debug!(error = %e, "clear skipped: global lock not acquired");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        };
        self.apply(&Modification::Clear, options)?;
        Ok(())
    }

    /// Drop every expired entry now.
    pub fn purge_expired(&self) -> usize {
        self.container.purge_expired(now_millis())
    }

    fn write_locked(
        &self,
        key: &[u8],
        modification: &Modification,
        options: &InvocationOptions,
    ) -> Result<Option<Bytes>> {
        let _guard = if options.has(Flag::SkipLocking) {
            None
        } else {
            match self.locks.lock(key, true, self.lock_timeout(options)) {
                Ok(guard) => Some(guard),
                Err(e) if options.has(Flag::FailSilently) => {
                    debug!(error = %e, "write skipped: stripe not acquired");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        };

        if options.has(Flag::ForceReturnValue) && !self.container.contains(key) {
            // pull the previous value into memory so it can be returned
            self.lookup(key, options)?;
        }
        self.apply(modification, options)
    }

    // ==================== Transactions ====================

    /// Start a transaction enlisted under `xid`.
    pub fn begin(&self, xid: Xid) -> Result<LocalTransaction> {
        if !self.config.transaction.enabled {
            return Err(Error::Config("transactions are disabled".into()));
        }
        self.coordinator.begin(Some(xid))
    }

    /// Read within a transaction. Sees the transaction's own writes.
    pub fn tx_get(
        &self,
        tx: &mut LocalTransaction,
        key: &[u8],
        options: &InvocationOptions,
    ) -> Result<Option<Bytes>> {
        if let Some(entry) = tx.looked_up_entry(key) {
            return Ok(entry.value().cloned());
        }
        if tx.has_pending_clear() {
            return Ok(None);
        }
        let entry = match self.lookup(key, options)? {
            Some(found) => CacheEntry::read(found),
            None => CacheEntry::absent(Bytes::copy_from_slice(key)),
        };
        let value = entry.value().cloned();
        tx.put_looked_up_entry(Bytes::copy_from_slice(key), entry)?;
        Ok(value)
    }

    /// Record a put in the transaction. Returns false if a lock timed out under `FailSilently`.
    pub fn tx_put(
        &self,
        tx: &mut LocalTransaction,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        options: &InvocationOptions,
    ) -> Result<bool> {
        let key: Bytes = key.into();
        let value: Bytes = value.into();
        let (lifespan, max_idle) = self.expiration(options);
        let modification =
            Modification::put_with_expiry(key.to_vec(), value.to_vec(), lifespan, max_idle);
        self.tx_write(tx, modification, options)
    }

    /// Record a removal in the transaction.
    pub fn tx_remove(
        &self,
        tx: &mut LocalTransaction,
        key: &[u8],
        options: &InvocationOptions,
    ) -> Result<bool> {
        self.tx_write(tx, Modification::remove(key), options)
    }

    /// Record a clear in the transaction; takes every stripe.
    pub fn tx_clear(&self, tx: &mut LocalTransaction, options: &InvocationOptions) -> Result<bool> {
        self.tx_write(tx, Modification::Clear, options)
    }

    /// Lock what the modification touches, then record it.
    ///
    /// Keys owned elsewhere are locked on their owners first; the nodes
    /// that granted locks are remembered for release at commit/rollback.
    pub fn tx_write(
        &self,
        tx: &mut LocalTransaction,
        modification: Modification,
        options: &InvocationOptions,
    ) -> Result<bool> {
        let timeout = self.lock_timeout(options);
        let locked = match modification.key() {
            Some(key) => self.lock_for_transaction(tx, key, timeout, options),
            None => self.lock_all_for_transaction(tx, timeout, options),
        };
        match locked {
            Ok(()) => {}
            Err(e) if e.is_lock_timeout() && options.has(Flag::FailSilently) => {
                debug!(gtx = %tx.gtx(), error = %e, "transactional write skipped: lock not acquired");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        match Self::entry_after(&modification) {
            Some(entry) => tx.put_looked_up_entry(entry.key().clone(), entry)?,
            None => tx.record_clear()?,
        }
        tx.add_modification(modification)?;
        Ok(true)
    }

    fn lock_for_transaction(
        &self,
        tx: &mut LocalTransaction,
        key: &[u8],
        timeout: Duration,
        options: &InvocationOptions,
    ) -> Result<()> {
        if options.has(Flag::SkipLocking) {
            return Ok(());
        }
        let owners = self.owners(key);
        if owners.is_empty() || owners.contains(&self.config.node_id) {
            self.coordinator.lock_key(tx, key, timeout)?;
        }
        self.coordinator
            .acquire_remote_locks(tx, &owners, vec![key.to_vec()])
    }

    fn lock_all_for_transaction(
        &self,
        tx: &mut LocalTransaction,
        timeout: Duration,
        options: &InvocationOptions,
    ) -> Result<()> {
        if options.has(Flag::SkipLocking) {
            return Ok(());
        }
        self.coordinator.lock_all(tx, timeout)?;
        let members = self.members();
        self.coordinator.acquire_remote_locks(tx, &members, Vec::new())
    }

    /// Prepare and commit, applying the transaction's writes in order.
    ///
    /// Only writes to keys this node owns land here; remote owners apply
    /// theirs when they receive the commit. If one write fails, the writes
    /// already applied are reverted before the transaction rolls back.
    pub fn commit(&self, tx: &mut LocalTransaction) -> Result<()> {
        let options = InvocationOptions::default();
        let mut undo = UndoLog::default();
        self.coordinator.commit(tx, |m| {
            if !m.key().map_or(true, |key| self.is_local_owner(key)) {
                return Ok(());
            }
            if let Err(e) = self.apply_logged(&mut undo, m, &options) {
                self.revert(std::mem::take(&mut undo), &options);
                return Err(e);
            }
            Ok(())
        })
    }

    /// Roll back, releasing every local and remote lock.
    pub fn rollback(&self, tx: &mut LocalTransaction) -> Result<()> {
        self.coordinator.rollback(tx)
    }

    // ==================== Membership ====================

    /// Register a listener for views installed through [`install_view`](Self::install_view).
    pub fn add_listener(&self, listener: Arc<dyn MemberEventListener>) {
        self.listeners.write().push(listener);
    }

    /// Install a new member set as the current view.
    ///
    /// The cache reacts first; registered listeners are notified after.
    pub fn install_view(&self, members: impl IntoIterator<Item = NodeId>) {
        let event = self.view.write().install(members);
        self.on_event(&event);
        for listener in self.listeners.read().iter() {
            listener.on_event(&event);
        }
    }

    // ==================== Lifecycle and statistics ====================

    pub fn stats(&self) -> CacheStats {
        self.container.stats()
    }

    pub fn lock_metrics(&self) -> LockMetricsSnapshot {
        self.locks.metrics().snapshot()
    }

    pub fn transaction_metrics(&self) -> TransactionMetricsSnapshot {
        self.coordinator.metrics().snapshot()
    }

    /// Check that the cache is quiescent. Every stripe must be unheld.
    pub fn stop(&self) -> Result<()> {
        let held = self.locks.locked_stripe_count();
        if !self.table.is_empty() {
            warn!(
                node_id = self.config.node_id,
                in_flight = self.table.len(),
                "Stopping with transactions in flight"
            );
        }
        if held > 0 {
            return Err(Error::Internal(format!(
                "{held} lock stripes still held at stop"
            )));
        }
        info!(node_id = self.config.node_id, "Cache stopped");
        Ok(())
    }

    // ==================== Internals ====================

    fn lookup(&self, key: &[u8], options: &InvocationOptions) -> Result<Option<InternalEntry>> {
        if let Some(entry) = self.container.get(key) {
            return Ok(Some(entry));
        }
        let Some(store) = self.active_store(options) else {
            return Ok(None);
        };
        match store.load(key)? {
            Some(stored) if !stored.is_expired() => {
                let key = Bytes::copy_from_slice(key);
                self.container.insert(key.clone(), stored.clone());
                Ok(Some(stored.to_full_entry(key)))
            }
            _ => Ok(None),
        }
    }

    /// Apply a write to the container and, unless skipped, the store.
    fn apply(&self, modification: &Modification, options: &InvocationOptions) -> Result<Option<Bytes>> {
        let store = self.active_store(options);

        match modification {
            Modification::Put {
                key,
                value,
                lifespan_ms,
                max_idle_ms,
            } => {
                let stored = StoredValue::create(value.clone(), now_millis(), *lifespan_ms, *max_idle_ms);
                self.write(key, stored, store)
            }
            Modification::PutIfAbsent {
                key,
                value,
                lifespan_ms,
                max_idle_ms,
            } => {
                if let Some(existing) = self.lookup(key, options)? {
                    return Ok(Some(existing.value().clone()));
                }
                let stored = StoredValue::create(value.clone(), now_millis(), *lifespan_ms, *max_idle_ms);
                self.write(key, stored, store)
            }
            Modification::Replace {
                key,
                value,
                lifespan_ms,
                max_idle_ms,
            } => {
                let Some(existing) = self.lookup(key, options)? else {
                    return Ok(None);
                };
                let stored = StoredValue::create(value.clone(), now_millis(), *lifespan_ms, *max_idle_ms);
                self.write(key, stored, store)?;
                Ok(Some(existing.value().clone()))
            }
            Modification::Remove { key } => {
                let previous = self.container.remove(key);
                if let Some(store) = store {
                    store.remove(key)?;
                }
                Ok(previous.map(|v| v.value().clone()))
            }
            Modification::Clear => {
                self.container.clear();
                if let Some(store) = store {
                    store.clear()?;
                }
                Ok(None)
            }
        }
    }

    fn write(
        &self,
        key: &[u8],
        stored: StoredValue,
        store: Option<&Arc<dyn CacheStore>>,
    ) -> Result<Option<Bytes>> {
        let key = Bytes::copy_from_slice(key);
        if let Some(store) = store {
            store.store(key.clone(), &stored)?;
        }
        let previous = self.container.insert(key, stored);
        Ok(previous.map(|v| v.value().clone()))
    }

    /// What the transaction will see for the key once `modification` applies.
    fn entry_after(modification: &Modification) -> Option<CacheEntry> {
        match modification {
            Modification::Put {
                key,
                value,
                lifespan_ms,
                max_idle_ms,
            }
            | Modification::PutIfAbsent {
                key,
                value,
                lifespan_ms,
                max_idle_ms,
            }
            | Modification::Replace {
                key,
                value,
                lifespan_ms,
                max_idle_ms,
            } => Some(CacheEntry::written(
                Bytes::copy_from_slice(key),
                StoredValue::create(value.clone(), now_millis(), *lifespan_ms, *max_idle_ms),
            )),
            Modification::Remove { key } => Some(CacheEntry::removed(Bytes::copy_from_slice(key))),
            Modification::Clear => None,
        }
    }

    fn expiration(&self, options: &InvocationOptions) -> (i64, i64) {
        (
            options
                .lifespan_ms
                .unwrap_or_else(|| self.config.expiration.lifespan_ms()),
            options
                .max_idle_ms
                .unwrap_or_else(|| self.config.expiration.max_idle_ms()),
        )
    }

    fn lock_timeout(&self, options: &InvocationOptions) -> Duration {
        if options.has(Flag::ZeroLockAcquisitionTimeout) {
            Duration::ZERO
        } else {
            self.config.locking.lock_acquisition_timeout
        }
    }

    /// Whether the calling thread holds the key's stripe.
    pub fn is_locked_by_current_thread(&self, key: &[u8]) -> bool {
        self.locks.is_held_by(&LockOwner::current_thread(), key)
    }
}

impl MemberEventListener for TransactionalCache {
    fn on_event(&self, event: &MemberEvent) {
        {
            let mut topology = self.topology.write();
            match event {
                MemberEvent::NodeJoin { node_id } | MemberEvent::NodeRecovered { node_id } => {
                    topology.add_node(*node_id)
                }
                MemberEvent::NodeLeave { node_id } | MemberEvent::NodeFailed { node_id } => {
                    topology.remove_node(*node_id)
                }
                MemberEvent::ViewChanged { members, .. } => {
                    topology.set_members(members.iter().copied())
                }
                MemberEvent::NodeSuspect { .. } => {}
            }
        }
        let leavers = event.leavers();
        if !leavers.is_empty() {
            self.release_orphaned(&leavers);
        }
        self.table.on_event(event);
    }
}

impl std::fmt::Debug for TransactionalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalCache")
            .field("node_id", &self.config.node_id)
            .field("entries", &self.container.len())
            .field("stripes", &self.locks.num_stripes())
            .field("in_flight", &self.table.len())
            .finish()
    }
}
