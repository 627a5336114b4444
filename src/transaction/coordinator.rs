//! Drives local transactions through prepare, commit and rollback.

use super::local::{LocalLock, LocalTransaction, TransactionState};
use super::table::TransactionTable;
use super::xid::Xid;
use crate::config::TransactionConfig;
use crate::error::{Error, LockError, Result, TransactionError};
use crate::lock::StripedLock;
use crate::metrics::TransactionMetrics;
use crate::remoting::{RemoteCommand, RemoteException, Response, RpcManager};
use crate::types::{Modification, NodeId};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Transaction coordinator for transactions originating on this node.
///
/// ```text
///  begin ──► lock_key / acquire_remote_locks ──► prepare ──► commit
///                                                   │           │
///                      rollback-only / failure ─────┴───────────┴──► rollback
/// ```
///
/// Every terminal path releases the local stripes the transaction holds
/// and asks every node in its remote-lock set to release its locks.
pub struct TransactionCoordinator {
    local_node: NodeId,
    locks: Arc<StripedLock>,
    table: Arc<TransactionTable>,
    rpc: Option<Arc<dyn RpcManager>>,
    config: TransactionConfig,
    metrics: TransactionMetrics,
}

impl TransactionCoordinator {
    pub fn new(
        local_node: NodeId,
        locks: Arc<StripedLock>,
        table: Arc<TransactionTable>,
        config: TransactionConfig,
    ) -> Self {
        Self {
            local_node,
            locks,
            table,
            rpc: None,
            config,
            metrics: TransactionMetrics::new(),
        }
    }

    /// Attach the messaging collaborator used to reach remote owners.
    pub fn with_rpc(mut self, rpc: Arc<dyn RpcManager>) -> Self {
        self.rpc = Some(rpc);
        self
    }

    pub fn table(&self) -> &Arc<TransactionTable> {
        &self.table
    }

    pub fn metrics(&self) -> &TransactionMetrics {
        &self.metrics
    }

    /// Start a transaction, enlisting it right away when an xid is supplied.
    pub fn begin(&self, xid: Option<Xid>) -> Result<LocalTransaction> {
        let mut tx = self.table.begin();
        if let Some(xid) = xid {
            if let Err(e) = tx.enlist(xid) {
                self.table.remove(&tx.gtx());
                return Err(e.into());
            }
        }
        Ok(tx)
    }

    /// Take the key's stripe exclusively for the transaction.
    ///
    /// A timeout fails just this call; the transaction is not marked
    /// rollback-only.
    pub fn lock_key(&self, tx: &mut LocalTransaction, key: &[u8], timeout: Duration) -> Result<()> {
        tx.require_writable("lock a key")?;
        if tx.holds_key_lock(key) || tx.holds_global_lock() {
            return Ok(());
        }

        let owner = tx.gtx().lock_owner();
        if !self.locks.acquire_lock_for(owner, key, true, timeout) {
            return Err(LockError::Timeout {
                stripe: self.locks.stripe_for(key),
                timeout_ms: timeout.as_millis() as u64,
            }
            .into());
        }
        tx.record_local_lock(LocalLock::Key {
            key: Bytes::copy_from_slice(key),
            exclusive: true,
        });
        Ok(())
    }

    /// Take every stripe exclusively for the transaction.
    pub fn lock_all(&self, tx: &mut LocalTransaction, timeout: Duration) -> Result<()> {
        tx.require_writable("lock the cache")?;
        if tx.holds_global_lock() {
            return Ok(());
        }

        let owner = tx.gtx().lock_owner();
        if !self.locks.acquire_global_lock_for(owner, true, timeout) {
            return Err(LockError::GlobalTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }
            .into());
        }
        tx.record_local_lock(LocalLock::Global { exclusive: true });
        Ok(())
    }

    /// Lock `keys` on every remote target. An empty key list locks every stripe.
    ///
    /// Nodes that granted the locks join the transaction's remote-lock set
    /// even when another target fails, so a later rollback reaches them.
    pub fn acquire_remote_locks(
        &self,
        tx: &mut LocalTransaction,
        targets: &[NodeId],
        keys: Vec<Vec<u8>>,
    ) -> Result<()> {
        tx.require_writable("lock remote keys")?;
        let remote: Vec<NodeId> = targets
            .iter()
            .copied()
            .filter(|n| *n != self.local_node)
            .collect();
        if remote.is_empty() {
            return Ok(());
        }

        let command = RemoteCommand::LockKeys {
            gtx: tx.gtx(),
            keys,
        };
        // one target at a time, so every grant is recorded before a later
        // target can fail the call
        for target in remote {
            for (node_id, response) in self.invoke(&[target], &command)? {
                match response {
                    Response::Success(_) => tx.locks_acquired([node_id]),
                    Response::Unsuccessful => {
                        self.metrics.remote_failures.inc();
                        return Err(Error::RemoteExecution {
                            node_id,
                            exception: RemoteException::new(
                                "LockTimeout",
                                "remote lock not granted",
                            ),
                        });
                    }
                    Response::Exception(_) => {
                        self.metrics.remote_failures.inc();
                        response.into_result(node_id)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// First phase. A rollback-only transaction is rolled back here.
    pub fn prepare(&self, tx: &mut LocalTransaction) -> Result<()> {
        if tx.is_marked_for_rollback() {
            return Err(self.force_rollback(tx, "prepare"));
        }
        tx.begin_prepare()?;

        let remote = self.remote_nodes(tx);
        if remote.is_empty() {
            return Ok(());
        }
        let command = RemoteCommand::Prepare {
            gtx: tx.gtx(),
            modifications: tx.modifications().to_vec(),
        };
        if let Err(e) = self.invoke_all_ok(&remote, &command) {
            tracing::warn!(gtx = %tx.gtx(), error = %e, "prepare failed; rolling back");
            if let Err(rollback_error) = self.rollback(tx) {
                tracing::error!(gtx = %tx.gtx(), error = %rollback_error, "rollback after failed prepare");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Prepare (if not yet prepared) and commit.
    ///
    /// `apply` receives each modification in insertion order. The
    /// rollback-only flag is checked again right before anything is applied.
    pub fn commit<F>(&self, tx: &mut LocalTransaction, mut apply: F) -> Result<()>
    where
        F: FnMut(&Modification) -> Result<()>,
    {
        if tx.state() != TransactionState::Preparing {
            self.prepare(tx)?;
        }
        if tx.is_marked_for_rollback() {
            return Err(self.force_rollback(tx, "commit"));
        }

        let modifications = tx.modifications().to_vec();
        for modification in &modifications {
            if let Err(e) = apply(modification) {
                tracing::error!(gtx = %tx.gtx(), error = %e, "applying modification failed; rolling back");
                if let Err(rollback_error) = self.rollback(tx) {
                    tracing::error!(gtx = %tx.gtx(), error = %rollback_error, "rollback after failed apply");
                }
                return Err(e);
            }
        }

        let remote = self.remote_nodes(tx);
        let remote_result = if remote.is_empty() {
            Ok(())
        } else {
            self.invoke_all_ok(&remote, &RemoteCommand::Commit { gtx: tx.gtx() })
        };

        let release_result = self.release_local_locks(tx);
        tx.mark_committed()?;
        self.table.remove(&tx.gtx());
        self.metrics.commits.inc();
        tracing::debug!(
            gtx = %tx.gtx(),
            modifications = modifications.len(),
            "transaction committed"
        );

        remote_result.and(release_result)
    }

    /// Roll back, releasing local stripes and remote locks.
    ///
    /// Idempotent once rolled back. Cleanup runs to the end even when a
    /// remote node fails; the first failure is returned afterwards.
    pub fn rollback(&self, tx: &mut LocalTransaction) -> Result<()> {
        match tx.state() {
            TransactionState::RolledBack => return Ok(()),
            TransactionState::Committed => {
                return Err(TransactionError::InvalidState {
                    gtx: tx.gtx().to_string(),
                    operation: "roll back",
                    state: TransactionState::Committed.name(),
                }
                .into())
            }
            _ => {}
        }

        let remote = self.remote_nodes(tx);
        let remote_result = if remote.is_empty() {
            Ok(())
        } else {
            self.invoke_all_ok(&remote, &RemoteCommand::Rollback { gtx: tx.gtx() })
        };
        if let Err(e) = &remote_result {
            tracing::error!(gtx = %tx.gtx(), error = %e, ?remote, "remote lock release failed");
        }

        let release_result = self.release_local_locks(tx);
        tx.mark_rolled_back();
        self.table.remove(&tx.gtx());
        self.metrics.rollbacks.inc();
        tracing::debug!(gtx = %tx.gtx(), "transaction rolled back");

        remote_result.and(release_result)
    }

    fn force_rollback(&self, tx: &mut LocalTransaction, phase: &'static str) -> Error {
        self.metrics.forced_rollbacks.inc();
        tracing::warn!(gtx = %tx.gtx(), phase, "transaction is rollback-only; forcing rollback");
        if let Err(e) = self.rollback(tx) {
            tracing::error!(gtx = %tx.gtx(), error = %e, "forced rollback did not complete cleanly");
        }
        TransactionError::RollbackOnly {
            gtx: tx.gtx().to_string(),
        }
        .into()
    }

    fn release_local_locks(&self, tx: &mut LocalTransaction) -> Result<()> {
        let owner = tx.gtx().lock_owner();
        let mut first_error = None;
        for lock in tx.take_local_locks() {
            let result = match &lock {
                LocalLock::Key { key, exclusive } => {
                    self.locks.release_lock_in_mode_for(&owner, key, *exclusive)
                }
                LocalLock::Global { exclusive } => {
                    self.locks.release_global_lock_for(&owner, *exclusive)
                }
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn remote_nodes(&self, tx: &LocalTransaction) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = tx
            .remote_locks_acquired()
            .into_iter()
            .filter(|n| *n != self.local_node)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    fn invoke(&self, targets: &[NodeId], command: &RemoteCommand) -> Result<Vec<(NodeId, Response)>> {
        let rpc = self.rpc.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "{} needs remote nodes {targets:?} but no rpc manager is configured",
                command.name()
            ))
        })?;
        rpc.invoke_remotely(targets, command, self.config.remote_lock_timeout)
            .inspect_err(|e| {
                self.metrics.remote_failures.inc();
                tracing::warn!(command = command.name(), error = %e, "remote invocation failed in transit");
            })
    }

    /// Invoke and require every target to have run the command successfully.
    fn invoke_all_ok(&self, targets: &[NodeId], command: &RemoteCommand) -> Result<()> {
        for (node_id, response) in self.invoke(targets, command)? {
            if let Response::Exception(_) = &response {
                self.metrics.remote_failures.inc();
            }
            response.into_result(node_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransactionConfig;

    const WAIT: Duration = Duration::from_millis(10);

    fn coordinator() -> TransactionCoordinator {
        TransactionCoordinator::new(
            1,
            Arc::new(StripedLock::new(8)),
            Arc::new(TransactionTable::new(1)),
            TransactionConfig::default(),
        )
    }

    fn xid(n: u8) -> Xid {
        Xid::new(1, vec![n], vec![])
    }

    #[test]
    fn test_commit_applies_in_order_and_releases() {
        let coord = coordinator();
        let mut tx = coord.begin(Some(xid(1))).unwrap();

        coord.lock_key(&mut tx, b"a", WAIT).unwrap();
        coord.lock_key(&mut tx, b"a", WAIT).unwrap();
        tx.add_modification(Modification::put("a", "1")).unwrap();
        tx.add_modification(Modification::remove("b")).unwrap();
        assert_eq!(tx.local_lock_count(), 1);

        let mut applied = Vec::new();
        coord
            .commit(&mut tx, |m| {
                applied.push(m.clone());
                Ok(())
            })
            .unwrap();

        assert_eq!(
            applied,
            vec![Modification::put("a", "1"), Modification::remove("b")]
        );
        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(coord.locks.locked_stripe_count(), 0);
        assert!(coord.table().is_empty());
        assert_eq!(coord.metrics().snapshot().commits, 1);
    }

    #[test]
    fn test_commit_of_rollback_only_is_forced_to_roll_back() {
        let coord = coordinator();
        let mut tx = coord.begin(Some(xid(1))).unwrap();
        coord.lock_key(&mut tx, b"k", WAIT).unwrap();
        tx.add_modification(Modification::put("k", "v")).unwrap();
        tx.mark_for_rollback();

        let err = coord.commit(&mut tx, |_| panic!("must not apply")).unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::RollbackOnly { .. })
        ));
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(coord.locks.locked_stripe_count(), 0);
        assert_eq!(coord.metrics().snapshot().forced_rollbacks, 1);
    }

    #[test]
    fn test_lock_timeout_does_not_mark_rollback() {
        let coord = coordinator();
        let mut holder = coord.begin(Some(xid(1))).unwrap();
        let mut waiter = coord.begin(Some(xid(2))).unwrap();

        coord.lock_key(&mut holder, b"k", WAIT).unwrap();
        let err = coord.lock_key(&mut waiter, b"k", Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Lock(LockError::Timeout { .. })));
        assert!(!waiter.is_marked_for_rollback());

        coord.rollback(&mut holder).unwrap();
        coord.lock_key(&mut waiter, b"k", Duration::ZERO).unwrap();
        coord.rollback(&mut waiter).unwrap();
        coord.rollback(&mut waiter).unwrap();
    }

    #[test]
    fn test_remote_targets_without_rpc_is_config_error() {
        let coord = coordinator();
        let mut tx = coord.begin(Some(xid(1))).unwrap();

        // local-only targets need no rpc
        coord.acquire_remote_locks(&mut tx, &[1], vec![b"k".to_vec()]).unwrap();
        let err = coord
            .acquire_remote_locks(&mut tx, &[1, 2], vec![b"k".to_vec()])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(tx.remote_locks_acquired().is_empty());
    }

    #[test]
    fn test_commit_requires_enlistment() {
        let coord = coordinator();
        let mut tx = coord.begin(None).unwrap();
        let err = coord.commit(&mut tx, |_| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::NotEnlisted { .. })
        ));

        let mut committed = coord.begin(Some(xid(2))).unwrap();
        coord.commit(&mut committed, |_| Ok(())).unwrap();
        assert!(coord.rollback(&mut committed).is_err());
    }
}
