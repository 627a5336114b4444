//! Executing commands sent by transaction coordinators on other nodes.

use super::undo::UndoLog;
use super::TransactionalCache;
use crate::error::{LockError, Result};
use crate::remoting::{RemoteCommand, Response};
use crate::transaction::GlobalTransaction;
use crate::types::{InvocationOptions, Modification, NodeId};
use bytes::Bytes;
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

/// Locks and staged writes a remote coordinator holds on this node.
#[derive(Debug, Default)]
pub(super) struct RemoteTransaction {
    keys: Vec<Bytes>,
    global: bool,
    modifications: Vec<Modification>,
}

impl TransactionalCache {
    /// Run a command received from another node and wrap the outcome.
    ///
    /// Failures come back as [`Response::Exception`]: the command reached
    /// this node and ran.
    pub fn handle_remote_command(&self, command: &RemoteCommand) -> Response {
        trace!(command = command.name(), gtx = %command.gtx(), "remote command received");
        Response::from_result(self.execute_remote(command).map(|()| None))
    }

    fn execute_remote(&self, command: &RemoteCommand) -> Result<()> {
        match command {
            RemoteCommand::LockKeys { gtx, keys } if keys.is_empty() => self.remote_lock_all(*gtx),
            RemoteCommand::LockKeys { gtx, keys } => self.remote_lock_keys(*gtx, keys),
            RemoteCommand::Prepare { gtx, modifications } => {
                let owned: Vec<Modification> = modifications
                    .iter()
                    .filter(|m| m.key().map_or(true, |key| self.is_local_owner(key)))
                    .cloned()
                    .collect();
                debug!(gtx = %gtx, staged = owned.len(), "remote transaction prepared");
                self.remote_txs.lock().entry(*gtx).or_default().modifications = owned;
                Ok(())
            }
            RemoteCommand::Commit { gtx } => {
                let Some(remote) = self.remote_txs.lock().remove(gtx) else {
                    return Ok(());
                };
                let options = InvocationOptions::default();
                let mut undo = UndoLog::default();
                let applied = remote
                    .modifications
                    .iter()
                    .try_for_each(|m| self.apply_logged(&mut undo, m, &options).map(|_| ()));
                if applied.is_err() {
                    warn!(gtx = %gtx, "remote commit failed; reverting its writes");
                    self.revert(undo, &options);
                }
                self.release_remote(*gtx, remote);
                applied
            }
            RemoteCommand::Rollback { gtx } => {
                if let Some(remote) = self.remote_txs.lock().remove(gtx) {
                    self.release_remote(*gtx, remote);
                }
                Ok(())
            }
        }
    }

    fn remote_lock_keys(&self, gtx: GlobalTransaction, keys: &[Vec<u8>]) -> Result<()> {
        let timeout = self.config.locking.lock_acquisition_timeout;
        let owner = gtx.lock_owner();

        let mut acquired: Vec<Bytes> = Vec::new();
        for key in keys {
            let held = self
                .remote_txs
                .lock()
                .get(&gtx)
                .is_some_and(|r| r.global || r.keys.iter().any(|k| k.as_ref() == key.as_slice()));
            if held {
                continue;
            }
            if !self.locks.acquire_lock_for(owner, key.as_slice(), true, timeout) {
                self.release_partial(gtx, &acquired);
                return Err(LockError::Timeout {
                    stripe: self.locks.stripe_for(key.as_slice()),
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into());
            }
            let key = Bytes::copy_from_slice(key);
            self.remote_txs
                .lock()
                .entry(gtx)
                .or_default()
                .keys
                .push(key.clone());
            acquired.push(key);
        }
        Ok(())
    }

    /// Undo the grants of one failed lock request. Earlier grants stay.
    fn release_partial(&self, gtx: GlobalTransaction, acquired: &[Bytes]) {
        if acquired.is_empty() {
            return;
        }
        let owner = gtx.lock_owner();
        for key in acquired.iter().rev() {
            let _ = self.locks.release_lock_in_mode_for(&owner, key, true);
        }
        let mut remote_txs = self.remote_txs.lock();
        if let Some(remote) = remote_txs.get_mut(&gtx) {
            remote.keys.retain(|k| !acquired.contains(k));
            if remote.keys.is_empty() && !remote.global && remote.modifications.is_empty() {
                remote_txs.remove(&gtx);
            }
        }
        debug!(gtx = %gtx, released = acquired.len(), "partial remote lock grant released");
    }

    fn remote_lock_all(&self, gtx: GlobalTransaction) -> Result<()> {
        let held = self.remote_txs.lock().get(&gtx).is_some_and(|r| r.global);
        if held {
            return Ok(());
        }
        let timeout = self.config.locking.lock_acquisition_timeout;
        if !self
            .locks
            .acquire_global_lock_for(gtx.lock_owner(), true, timeout)
        {
            return Err(LockError::GlobalTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }
            .into());
        }
        self.remote_txs.lock().entry(gtx).or_default().global = true;
        Ok(())
    }

    fn release_remote(&self, gtx: GlobalTransaction, remote: RemoteTransaction) {
        let owner = gtx.lock_owner();
        // errors are logged and counted by the lock manager
        if remote.global {
            let _ = self.locks.release_global_lock_for(&owner, true);
        }
        for key in remote.keys.iter().rev() {
            let _ = self.locks.release_lock_in_mode_for(&owner, key, true);
        }
        trace!(gtx = %gtx, "remote transaction locks released");
    }

    /// Roll back remote transactions whose coordinator left the cluster.
    pub(super) fn release_orphaned(&self, leavers: &BTreeSet<NodeId>) -> usize {
        let orphaned: Vec<(GlobalTransaction, RemoteTransaction)> = {
            let mut remote_txs = self.remote_txs.lock();
            let gtxs: Vec<GlobalTransaction> = remote_txs
                .keys()
                .filter(|gtx| leavers.contains(&gtx.origin))
                .copied()
                .collect();
            gtxs.into_iter()
                .filter_map(|gtx| remote_txs.remove(&gtx).map(|r| (gtx, r)))
                .collect()
        };
        let count = orphaned.len();
        for (gtx, remote) in orphaned {
            warn!(gtx = %gtx, "coordinator left the cluster; releasing its remote locks");
            self.release_remote(gtx, remote);
        }
        count
    }

    /// Number of remote transactions holding locks or staged writes here.
    pub fn remote_transaction_count(&self) -> usize {
        self.remote_txs.lock().len()
    }

    pub(super) fn is_local_owner(&self, key: &[u8]) -> bool {
        let owners = self.owners(key);
        owners.is_empty() || owners.contains(&self.config.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::container::CacheStore;
    use crate::testing::FailingStore;
    use std::sync::Arc;
    use std::time::Duration;

    const BLOCKED: &[u8] = b"blocked";

    fn cache() -> TransactionalCache {
        let config = CacheConfig::new(1)
            .with_concurrency_level(8)
            .with_lock_acquisition_timeout(Duration::from_millis(30));
        TransactionalCache::new(config).unwrap()
    }

    /// A key whose stripe is none of `taken`.
    fn key_outside(cache: &TransactionalCache, taken: &[usize]) -> Vec<u8> {
        (0..)
            .map(|i| format!("key-{i}").into_bytes())
            .find(|k| !taken.contains(&cache.locks().stripe_for(k.as_slice())))
            .unwrap()
    }

    fn lock_keys(gtx: GlobalTransaction, keys: &[&[u8]]) -> RemoteCommand {
        RemoteCommand::LockKeys {
            gtx,
            keys: keys.iter().map(|k| k.to_vec()).collect(),
        }
    }

    #[test]
    fn test_failed_lock_keys_releases_what_it_took() {
        let cache = cache();
        let holder = GlobalTransaction::new(2, 1);
        let requester = GlobalTransaction::new(3, 1);
        let blocked_stripe = cache.locks().stripe_for(BLOCKED);
        let free = key_outside(&cache, &[blocked_stripe]);
        let free_stripe = cache.locks().stripe_for(free.as_slice());
        let other = key_outside(&cache, &[blocked_stripe, free_stripe]);

        assert!(cache
            .handle_remote_command(&lock_keys(holder, &[BLOCKED]))
            .is_successful());

        let response =
            cache.handle_remote_command(&lock_keys(requester, &[free.as_slice(), BLOCKED]));
        assert_eq!(response.as_exception().unwrap().kind, "LockTimeout");
        assert!(!cache.locks().is_held_by(&requester.lock_owner(), free.as_slice()));
        assert_eq!(cache.remote_transaction_count(), 1);

        // a grant from an earlier request survives a later failed one
        assert!(cache
            .handle_remote_command(&lock_keys(requester, &[free.as_slice()]))
            .is_successful());
        let response = cache.handle_remote_command(&lock_keys(
            requester,
            &[free.as_slice(), other.as_slice(), BLOCKED],
        ));
        assert!(response.as_exception().is_some());
        assert!(cache.locks().is_held_by(&requester.lock_owner(), free.as_slice()));
        assert!(!cache.locks().is_held_by(&requester.lock_owner(), other.as_slice()));
        assert_eq!(cache.remote_transaction_count(), 2);

        for gtx in [requester, holder] {
            assert!(cache
                .handle_remote_command(&RemoteCommand::Rollback { gtx })
                .is_successful());
        }
        assert_eq!(cache.remote_transaction_count(), 0);
        assert_eq!(cache.locks().locked_stripe_count(), 0);
    }

    #[test]
    fn test_failed_remote_commit_reverts_writes() {
        let store = Arc::new(FailingStore::failing_on(3));
        let cache = cache().with_store(store.clone());
        cache.put("a", "old", &InvocationOptions::default()).unwrap();
        let gtx = GlobalTransaction::new(2, 7);

        assert!(cache
            .handle_remote_command(&lock_keys(gtx, &[b"a".as_slice(), b"b".as_slice()]))
            .is_successful());
        assert!(cache
            .handle_remote_command(&RemoteCommand::Prepare {
                gtx,
                modifications: vec![Modification::put("a", "new"), Modification::put("b", "fresh")],
            })
            .is_successful());

        let response = cache.handle_remote_command(&RemoteCommand::Commit { gtx });
        assert_eq!(response.as_exception().unwrap().kind, "Store");

        assert_eq!(
            cache.get(b"a", &InvocationOptions::default()).unwrap(),
            Some(Bytes::from("old"))
        );
        assert!(cache.container().peek(b"b").is_none());
        assert!(store.load(b"b").unwrap().is_none());
        assert_eq!(cache.remote_transaction_count(), 0);
        assert_eq!(cache.locks().locked_stripe_count(), 0);
    }
}
