//! Registry of in-flight local transactions.

use super::local::{LocalTransaction, TransactionShared};
use super::xid::GlobalTransaction;
use crate::cluster::{MemberEvent, MemberEventListener};
use crate::types::NodeId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks every transaction this node originated that has not finished.
///
/// Holds only the cross-thread part of each transaction, so membership
/// notifications can mark transactions rollback-only without touching
/// their owners' bookkeeping.
pub struct TransactionTable {
    local_node: NodeId,
    next_id: AtomicU64,
    transactions: DashMap<GlobalTransaction, Arc<TransactionShared>>,
}

impl TransactionTable {
    pub fn new(local_node: NodeId) -> Self {
        Self {
            local_node,
            next_id: AtomicU64::new(1),
            transactions: DashMap::new(),
        }
    }

    /// Start and register a new transaction.
    pub fn begin(&self) -> LocalTransaction {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tx = LocalTransaction::new(GlobalTransaction::new(self.local_node, id));
        self.transactions.insert(tx.gtx(), tx.shared().clone());
        tracing::trace!(gtx = %tx.gtx(), "transaction registered");
        tx
    }

    pub fn get(&self, gtx: &GlobalTransaction) -> Option<Arc<TransactionShared>> {
        self.transactions.get(gtx).map(|e| e.value().clone())
    }

    /// Forget a finished transaction.
    pub fn remove(&self, gtx: &GlobalTransaction) -> Option<Arc<TransactionShared>> {
        self.transactions.remove(gtx).map(|(_, shared)| shared)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Mark rollback-only every transaction holding remote locks on a leaver.
    ///
    /// Returns how many transactions were newly marked.
    pub fn on_view_change<'a>(&self, leavers: impl IntoIterator<Item = &'a NodeId>) -> usize {
        let leavers: Vec<NodeId> = leavers.into_iter().copied().collect();
        if leavers.is_empty() {
            return 0;
        }

        let mut marked = 0;
        for entry in self.transactions.iter() {
            let shared = entry.value();
            if shared.is_marked_for_rollback() || !shared.has_remote_locks_acquired(&leavers) {
                continue;
            }
            shared.mark_for_rollback();
            marked += 1;
            tracing::warn!(
                gtx = %shared.gtx(),
                ?leavers,
                "transaction marked rollback-only: a remote lock holder left the cluster"
            );
        }
        marked
    }
}

impl MemberEventListener for TransactionTable {
    fn on_event(&self, event: &MemberEvent) {
        let leavers = event.leavers();
        if !leavers.is_empty() {
            self.on_view_change(&leavers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_assigns_sequential_ids() {
        let table = TransactionTable::new(3);
        let a = table.begin();
        let b = table.begin();
        assert_eq!(a.gtx(), GlobalTransaction::new(3, 1));
        assert_eq!(b.gtx(), GlobalTransaction::new(3, 2));
        assert_eq!(table.len(), 2);

        assert!(table.remove(&a.gtx()).is_some());
        assert!(table.get(&a.gtx()).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_leave_event_marks_affected_transactions() {
        let table = TransactionTable::new(1);
        let affected = table.begin();
        let unaffected = table.begin();
        affected.locks_acquired([2, 3]);
        unaffected.locks_acquired([4]);

        table.on_event(&MemberEvent::NodeFailed { node_id: 3 });
        assert!(affected.is_marked_for_rollback());
        assert!(!unaffected.is_marked_for_rollback());

        // already marked transactions are not counted again
        assert_eq!(table.on_view_change(&[3]), 0);
        table.on_event(&MemberEvent::NodeJoin { node_id: 4 });
        assert!(!unaffected.is_marked_for_rollback());
    }
}
