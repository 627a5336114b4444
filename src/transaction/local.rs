//! Per-transaction bookkeeping on the originating node.

use super::lookup::{empty_looked_up_entries, LookedUpEntries};
use super::xid::{GlobalTransaction, Xid};
use crate::container::CacheEntry;
use crate::error::TransactionError;
use crate::types::{Modification, NodeId};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle of a local transaction.
///
/// ```text
/// Active ──enlist──► Enlisted ──prepare──► Preparing ──► Committed
///    │                  │                      │
///    └──────────────────┴──────────────────────┴──────► RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Active,
    Enlisted,
    Preparing,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn name(&self) -> &'static str {
        match self {
            TransactionState::Active => "active",
            TransactionState::Enlisted => "enlisted",
            TransactionState::Preparing => "preparing",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled-back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::RolledBack
        )
    }

    /// Whether writes and look-ups may still be recorded.
    pub fn accepts_writes(&self) -> bool {
        matches!(self, TransactionState::Active | TransactionState::Enlisted)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Part of a transaction that other threads may touch.
///
/// The membership listener reads the remote-lock set and sets the
/// rollback-only flag while the owning thread keeps working; nothing here
/// takes the owner's bookkeeping.
#[derive(Debug)]
pub struct TransactionShared {
    gtx: GlobalTransaction,
    remote_locked_nodes: RwLock<HashSet<NodeId>>,
    marked_for_rollback: AtomicBool,
}

impl TransactionShared {
    fn new(gtx: GlobalTransaction) -> Self {
        Self {
            gtx,
            remote_locked_nodes: RwLock::new(HashSet::new()),
            marked_for_rollback: AtomicBool::new(false),
        }
    }

    pub fn gtx(&self) -> GlobalTransaction {
        self.gtx
    }

    /// Merge nodes into the remote-lock-holder set. The set never shrinks.
    pub fn locks_acquired(&self, nodes: impl IntoIterator<Item = NodeId>) {
        self.remote_locked_nodes.write().extend(nodes);
    }

    pub fn remote_locks_acquired(&self) -> HashSet<NodeId> {
        self.remote_locked_nodes.read().clone()
    }

    /// Whether any remote-lock holder is among `leavers`.
    pub fn has_remote_locks_acquired<'a>(
        &self,
        leavers: impl IntoIterator<Item = &'a NodeId>,
    ) -> bool {
        let nodes = self.remote_locked_nodes.read();
        leavers.into_iter().any(|n| nodes.contains(n))
    }

    /// Set the rollback-only flag. Irreversible; callable from any thread.
    pub fn mark_for_rollback(&self) {
        self.marked_for_rollback.store(true, Ordering::SeqCst);
    }

    pub fn is_marked_for_rollback(&self) -> bool {
        self.marked_for_rollback.load(Ordering::SeqCst)
    }
}

/// A lock the transaction took on the local node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LocalLock {
    Key { key: Bytes, exclusive: bool },
    Global { exclusive: bool },
}

/// Local transaction context.
///
/// Owned by the thread driving the transaction: modifications, looked-up
/// entries and local locks are plain fields mutated through `&mut self`.
/// Only [`TransactionShared`] is visible to other threads.
///
/// Two contexts are equal only when both have been enlisted with the same
/// [`Xid`]; a context that was never enlisted equals nothing.
pub struct LocalTransaction {
    shared: Arc<TransactionShared>,
    xid: Option<Xid>,
    state: TransactionState,
    modifications: Vec<Modification>,
    looked_up: Option<LookedUpEntries<Bytes, CacheEntry>>,
    /// A clear was recorded; keys not looked up since read as absent.
    cleared: bool,
    local_locks: Vec<LocalLock>,
}

impl LocalTransaction {
    pub fn new(gtx: GlobalTransaction) -> Self {
        Self {
            shared: Arc::new(TransactionShared::new(gtx)),
            xid: None,
            state: TransactionState::Active,
            modifications: Vec::new(),
            looked_up: None,
            cleared: false,
            local_locks: Vec::new(),
        }
    }

    pub fn gtx(&self) -> GlobalTransaction {
        self.shared.gtx
    }

    pub fn shared(&self) -> &Arc<TransactionShared> {
        &self.shared
    }

    pub fn xid(&self) -> Option<&Xid> {
        self.xid.as_ref()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Attach the externally issued id. Allowed once, while active.
    pub fn enlist(&mut self, xid: Xid) -> Result<(), TransactionError> {
        if self.xid.is_some() {
            return Err(TransactionError::AlreadyEnlisted {
                gtx: self.gtx().to_string(),
            });
        }
        self.require(TransactionState::Active, "enlist")?;
        tracing::debug!(gtx = %self.gtx(), %xid, "transaction enlisted");
        self.xid = Some(xid);
        self.state = TransactionState::Enlisted;
        Ok(())
    }

    pub fn is_enlisted(&self) -> bool {
        self.xid.is_some()
    }

    /// Append a write. Order is preserved for replay and prepare.
    pub fn add_modification(&mut self, modification: Modification) -> Result<(), TransactionError> {
        self.require_writable("add a modification")?;
        tracing::trace!(gtx = %self.gtx(), count = self.modifications.len() + 1, "modification recorded");
        self.modifications.push(modification);
        Ok(())
    }

    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    /// Record an entry read or locked by this transaction, replacing any
    /// earlier record for the same key.
    pub fn put_looked_up_entry(
        &mut self,
        key: impl Into<Bytes>,
        entry: CacheEntry,
    ) -> Result<(), TransactionError> {
        self.require_writable("look up an entry")?;
        self.looked_up
            .get_or_insert_with(LookedUpEntries::new)
            .put(key.into(), entry);
        Ok(())
    }

    /// Entries looked up so far, or the shared empty view.
    pub fn get_looked_up_entries(&self) -> &LookedUpEntries<Bytes, CacheEntry> {
        match &self.looked_up {
            Some(entries) => entries,
            None => empty_looked_up_entries(),
        }
    }

    pub fn looked_up_entry(&self, key: &[u8]) -> Option<&CacheEntry> {
        self.looked_up
            .as_ref()
            .and_then(|entries| entries.get(&Bytes::copy_from_slice(key)))
    }

    /// Mark every key as removed from this transaction's point of view.
    ///
    /// Entries already looked up become removed entries; keys not looked up
    /// yet read as absent until the transaction writes them.
    pub(crate) fn record_clear(&mut self) -> Result<(), TransactionError> {
        self.require_writable("clear")?;
        if let Some(entries) = self.looked_up.as_mut() {
            let keys: Vec<Bytes> = entries.keys().cloned().collect();
            for key in keys {
                entries.put(key.clone(), CacheEntry::removed(key));
            }
        }
        self.cleared = true;
        Ok(())
    }

    /// Whether a clear is pending in this transaction.
    pub fn has_pending_clear(&self) -> bool {
        self.cleared
    }

    /// True when nothing was written and nothing looked up.
    pub fn is_read_only(&self) -> bool {
        self.modifications.is_empty() && self.get_looked_up_entries().is_empty()
    }

    pub fn locks_acquired(&self, nodes: impl IntoIterator<Item = NodeId>) {
        self.shared.locks_acquired(nodes);
    }

    pub fn remote_locks_acquired(&self) -> HashSet<NodeId> {
        self.shared.remote_locks_acquired()
    }

    pub fn has_remote_locks_acquired<'a>(
        &self,
        leavers: impl IntoIterator<Item = &'a NodeId>,
    ) -> bool {
        self.shared.has_remote_locks_acquired(leavers)
    }

    pub fn mark_for_rollback(&self) {
        self.shared.mark_for_rollback();
    }

    pub fn is_marked_for_rollback(&self) -> bool {
        self.shared.is_marked_for_rollback()
    }

    pub(crate) fn record_local_lock(&mut self, lock: LocalLock) {
        self.local_locks.push(lock);
    }

    pub(crate) fn holds_key_lock(&self, key: &[u8]) -> bool {
        self.local_locks
            .iter()
            .any(|l| matches!(l, LocalLock::Key { key: k, .. } if k.as_ref() == key))
    }

    pub(crate) fn holds_global_lock(&self) -> bool {
        self.local_locks
            .iter()
            .any(|l| matches!(l, LocalLock::Global { .. }))
    }

    /// Locks in reverse acquisition order, leaving none recorded.
    pub(crate) fn take_local_locks(&mut self) -> Vec<LocalLock> {
        let mut locks = std::mem::take(&mut self.local_locks);
        locks.reverse();
        locks
    }

    pub fn local_lock_count(&self) -> usize {
        self.local_locks.len()
    }

    pub(crate) fn begin_prepare(&mut self) -> Result<(), TransactionError> {
        if self.state == TransactionState::Active {
            return Err(TransactionError::NotEnlisted {
                gtx: self.gtx().to_string(),
            });
        }
        self.require(TransactionState::Enlisted, "prepare")?;
        self.transition(TransactionState::Preparing);
        Ok(())
    }

    pub(crate) fn mark_committed(&mut self) -> Result<(), TransactionError> {
        self.require(TransactionState::Preparing, "commit")?;
        self.transition(TransactionState::Committed);
        Ok(())
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        if !self.state.is_terminal() {
            self.transition(TransactionState::RolledBack);
        }
    }

    fn transition(&mut self, to: TransactionState) {
        tracing::debug!(gtx = %self.gtx(), from = %self.state, %to, "transaction state change");
        self.state = to;
    }

    fn require(
        &self,
        expected: TransactionState,
        operation: &'static str,
    ) -> Result<(), TransactionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    pub(crate) fn require_writable(&self, operation: &'static str) -> Result<(), TransactionError> {
        if self.state.accepts_writes() {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> TransactionError {
        TransactionError::InvalidState {
            gtx: self.gtx().to_string(),
            operation,
            state: self.state.name(),
        }
    }
}

impl PartialEq for LocalTransaction {
    fn eq(&self, other: &Self) -> bool {
        match (&self.xid, &other.xid) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for LocalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransaction")
            .field("gtx", &self.gtx())
            .field("xid", &self.xid)
            .field("state", &self.state)
            .field("modifications", &self.modifications.len())
            .field("looked_up", &self.get_looked_up_entries().len())
            .field("remote_locked_nodes", &self.remote_locks_acquired())
            .field("marked_for_rollback", &self.is_marked_for_rollback())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{InternalEntry, StoredValue};

    fn tx() -> LocalTransaction {
        LocalTransaction::new(GlobalTransaction::new(1, 1))
    }

    fn xid(n: u8) -> Xid {
        Xid::new(1, vec![n], vec![0])
    }

    #[test]
    fn test_read_only_until_touched() {
        let mut tx = tx();
        assert!(tx.is_read_only());
        assert!(tx.get_looked_up_entries().is_empty());

        tx.put_looked_up_entry("k", CacheEntry::absent("k")).unwrap();
        assert!(!tx.is_read_only());

        let mut tx2 = self::tx();
        tx2.add_modification(Modification::remove("k")).unwrap();
        assert!(!tx2.is_read_only());
    }

    #[test]
    fn test_looked_up_entry_is_overwritten() {
        let mut tx = tx();
        tx.put_looked_up_entry("k", CacheEntry::absent("k")).unwrap();
        tx.put_looked_up_entry("k", CacheEntry::written("k", StoredValue::immortal("v")))
            .unwrap();

        assert_eq!(tx.get_looked_up_entries().len(), 1);
        assert!(!tx.looked_up_entry(b"k").unwrap().is_null());
    }

    #[test]
    fn test_recorded_clear_hides_looked_up_entries() {
        let mut tx = tx();
        tx.put_looked_up_entry("a", CacheEntry::read(InternalEntry::new("a", StoredValue::immortal("1"))))
            .unwrap();
        tx.put_looked_up_entry("b", CacheEntry::written("b", StoredValue::immortal("2")))
            .unwrap();
        assert!(!tx.has_pending_clear());

        tx.record_clear().unwrap();

        assert!(tx.has_pending_clear());
        assert_eq!(tx.get_looked_up_entries().len(), 2);
        assert!(tx.looked_up_entry(b"a").unwrap().is_null());
        assert!(tx.looked_up_entry(b"b").unwrap().is_null());

        tx.put_looked_up_entry("b", CacheEntry::written("b", StoredValue::immortal("3")))
            .unwrap();
        assert_eq!(
            tx.looked_up_entry(b"b").and_then(|e| e.value()).cloned(),
            Some(Bytes::from("3"))
        );
    }

    #[test]
    fn test_remote_lock_set_grows() {
        let tx = tx();
        tx.locks_acquired([2, 3]);
        tx.locks_acquired([3, 4]);
        assert_eq!(tx.remote_locks_acquired(), HashSet::from([2, 3, 4]));

        assert!(tx.has_remote_locks_acquired(&[9, 4]));
        assert!(!tx.has_remote_locks_acquired(&[1, 9]));
        assert!(!tx.has_remote_locks_acquired(&[]));
    }

    #[test]
    fn test_enlist_once() {
        let mut tx = tx();
        assert!(!tx.is_enlisted());
        tx.enlist(xid(1)).unwrap();
        assert_eq!(tx.state(), TransactionState::Enlisted);
        assert!(matches!(
            tx.enlist(xid(2)),
            Err(TransactionError::AlreadyEnlisted { .. })
        ));
        assert_eq!(tx.xid(), Some(&xid(1)));
    }

    #[test]
    fn test_equality_by_xid_only() {
        let a = LocalTransaction::new(GlobalTransaction::new(1, 1));
        let b = LocalTransaction::new(GlobalTransaction::new(1, 1));
        assert_ne!(a, b);

        let mut a = a;
        let mut b = LocalTransaction::new(GlobalTransaction::new(1, 2));
        a.enlist(xid(7)).unwrap();
        b.enlist(xid(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_writes_rejected_after_prepare() {
        let mut tx = tx();
        assert!(matches!(
            tx.begin_prepare(),
            Err(TransactionError::NotEnlisted { .. })
        ));

        tx.enlist(xid(1)).unwrap();
        tx.add_modification(Modification::put("k", "v")).unwrap();
        tx.begin_prepare().unwrap();

        let err = tx.add_modification(Modification::put("k", "w")).unwrap_err();
        assert_eq!(
            err,
            TransactionError::InvalidState {
                gtx: "GlobalTx:1:1".into(),
                operation: "add a modification",
                state: "preparing",
            }
        );
        assert_eq!(tx.modifications().len(), 1);
    }

    #[test]
    fn test_mark_for_rollback_is_sticky() {
        let tx = tx();
        assert!(!tx.is_marked_for_rollback());
        tx.mark_for_rollback();
        tx.mark_for_rollback();
        assert!(tx.is_marked_for_rollback());
    }

    #[test]
    fn test_local_locks_released_in_reverse() {
        let mut tx = tx();
        tx.record_local_lock(LocalLock::Key {
            key: Bytes::from("a"),
            exclusive: true,
        });
        tx.record_local_lock(LocalLock::Global { exclusive: true });
        assert!(tx.holds_key_lock(b"a"));
        assert!(tx.holds_global_lock());

        let locks = tx.take_local_locks();
        assert_eq!(locks[0], LocalLock::Global { exclusive: true });
        assert_eq!(tx.local_lock_count(), 0);
    }
}
