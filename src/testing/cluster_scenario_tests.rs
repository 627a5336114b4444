//! Transactions spanning several caches over the loopback network.

#[cfg(test)]
mod tests {
    use crate::error::{Error, TransactionError};
    use crate::remoting::{RemoteCommand, RemoteException};
    use crate::testing::{NodeFault, TestCluster};
    use crate::transaction::{TransactionState, Xid};
    use crate::types::InvocationOptions;
    use bytes::Bytes;

    fn xid(n: u8) -> Xid {
        Xid::new(7, vec![n], vec![])
    }

    fn opts() -> InvocationOptions {
        InvocationOptions::default()
    }

    #[test]
    fn test_commit_applies_on_remote_owner() {
        let cluster = TestCluster::new(2, 1).unwrap();
        let key = cluster.key_owned_only_by(2).unwrap();
        let origin = cluster.node(1).unwrap();
        let owner = cluster.node(2).unwrap();

        let mut tx = origin.begin(xid(1)).unwrap();
        assert!(origin.tx_put(&mut tx, key.clone(), "v", &opts()).unwrap());

        assert_eq!(cluster.network.delivered_to(2, "lock_keys"), 1);
        assert!(owner.locks().is_write_locked(&key));
        assert_eq!(origin.locks().locked_stripe_count(), 0);
        assert!(tx.has_remote_locks_acquired(&[2]));
        assert_eq!(owner.remote_transaction_count(), 1);

        origin.commit(&mut tx).unwrap();

        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(owner.get(&key, &opts()).unwrap(), Some(Bytes::from("v")));
        assert!(!origin.container().contains(&key));
        assert_eq!(cluster.network.delivered_to(2, "prepare"), 1);
        assert_eq!(cluster.network.delivered_to(2, "commit"), 1);
        assert_eq!(owner.remote_transaction_count(), 0);
        assert!(!cluster.any_locks_held());
    }

    #[test]
    fn test_remote_lock_is_taken_once_per_key() {
        let cluster = TestCluster::new(2, 1).unwrap();
        let key = cluster.key_owned_only_by(2).unwrap();
        let origin = cluster.node(1).unwrap();

        let mut tx = origin.begin(xid(1)).unwrap();
        origin.tx_put(&mut tx, key.clone(), "a", &opts()).unwrap();
        origin.tx_put(&mut tx, key.clone(), "b", &opts()).unwrap();

        let owner = cluster.node(2).unwrap();
        let stripe = owner.locks().stripe(owner.locks().stripe_for(&key)).unwrap();
        assert_eq!(stripe.write_hold_count(), 1);

        origin.rollback(&mut tx).unwrap();
        assert_eq!(cluster.network.delivered_to(2, "rollback"), 1);
        assert!(!cluster.any_locks_held());
        assert_eq!(owner.get(&key, &opts()).unwrap(), None);
    }

    #[test]
    fn test_remote_contention_reports_lock_timeout() {
        let cluster = TestCluster::new(3, 1).unwrap();
        let key = cluster.key_owned_only_by(2).unwrap();
        let first = cluster.node(1).unwrap();
        let second = cluster.node(3).unwrap();

        let mut holder = first.begin(xid(1)).unwrap();
        first.tx_put(&mut holder, key.clone(), "first", &opts()).unwrap();

        let mut waiter = second.begin(xid(2)).unwrap();
        let err = second
            .tx_put(&mut waiter, key.clone(), "second", &opts())
            .unwrap_err();
        match err {
            Error::RemoteExecution { node_id, exception } => {
                assert_eq!(node_id, 2);
                assert_eq!(exception.kind, "LockTimeout");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(waiter.remote_locks_acquired().is_empty());

        first.commit(&mut holder).unwrap();
        assert!(second.tx_put(&mut waiter, key.clone(), "second", &opts()).unwrap());
        second.commit(&mut waiter).unwrap();

        let owner = cluster.node(2).unwrap();
        assert_eq!(
            owner.get(&key, &opts()).unwrap(),
            Some(Bytes::from("second"))
        );
        assert!(!cluster.any_locks_held());
    }

    #[test]
    fn test_leaver_forces_rollback_and_releases_remote_locks() {
        let cluster = TestCluster::new(3, 1).unwrap();
        let key = cluster.key_owned_only_by(2).unwrap();
        let origin = cluster.node(1).unwrap();

        let mut tx = origin.begin(xid(1)).unwrap();
        origin.tx_put(&mut tx, key.clone(), "v", &opts()).unwrap();

        // only the coordinator sees node 2 leave
        origin.install_view([1, 3]);
        assert!(tx.is_marked_for_rollback());

        let err = origin.commit(&mut tx).unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::RollbackOnly { .. })
        ));
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(cluster.network.delivered_to(2, "rollback"), 1);
        assert_eq!(cluster.network.delivered_to(2, "prepare"), 0);
        assert!(!cluster.any_locks_held());
        assert_eq!(origin.transaction_metrics().forced_rollbacks, 1);
    }

    #[test]
    fn test_unrelated_leaver_does_not_mark() {
        let cluster = TestCluster::new(3, 1).unwrap();
        let key = cluster.key_owned_only_by(2).unwrap();
        let origin = cluster.node(1).unwrap();

        let mut tx = origin.begin(xid(1)).unwrap();
        origin.tx_put(&mut tx, key.clone(), "v", &opts()).unwrap();
        origin.install_view([1, 2]);
        assert!(!tx.is_marked_for_rollback());

        origin.rollback(&mut tx).unwrap();
    }

    #[test]
    fn test_owner_releases_locks_of_departed_coordinator() {
        let cluster = TestCluster::new(2, 1).unwrap();
        let key = cluster.key_owned_only_by(2).unwrap();
        let origin = cluster.node(1).unwrap();
        let owner = cluster.node(2).unwrap();

        let mut tx = origin.begin(xid(1)).unwrap();
        origin.tx_put(&mut tx, key.clone(), "v", &opts()).unwrap();
        assert!(owner.locks().is_write_locked(&key));

        owner.install_view([2]);
        assert_eq!(owner.remote_transaction_count(), 0);
        assert_eq!(owner.locks().locked_stripe_count(), 0);
    }

    #[test]
    fn test_remote_exception_and_network_failure_are_distinct() {
        let cluster = TestCluster::new(2, 1).unwrap();
        let key = cluster.key_owned_only_by(2).unwrap();
        let origin = cluster.node(1).unwrap();

        cluster.network.inject(
            2,
            NodeFault::Exception(RemoteException::new("Store", "disk full")),
        );
        let mut tx = origin.begin(xid(1)).unwrap();
        let err = origin.tx_put(&mut tx, key.clone(), "v", &opts()).unwrap_err();
        assert!(err.is_remote_execution());
        assert!(matches!(
            &err,
            Error::RemoteExecution { node_id: 2, exception } if exception.kind == "Store"
        ));

        cluster.network.inject(2, NodeFault::Unreachable);
        let err = origin.tx_put(&mut tx, key.clone(), "v", &opts()).unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert!(!err.is_remote_execution());

        cluster.network.inject(2, NodeFault::Unsuccessful);
        let err = origin.tx_put(&mut tx, key.clone(), "v", &opts()).unwrap_err();
        assert!(matches!(
            &err,
            Error::RemoteExecution { exception, .. } if exception.kind == "LockTimeout"
        ));

        // none of the failures granted a lock or marked the transaction
        assert!(tx.remote_locks_acquired().is_empty());
        assert!(!tx.is_marked_for_rollback());
        assert!(tx.modifications().is_empty());
        assert_eq!(origin.transaction_metrics().remote_failures, 3);

        cluster.network.heal(2);
        assert!(origin.tx_put(&mut tx, key.clone(), "v", &opts()).unwrap());
        origin.commit(&mut tx).unwrap();
        assert!(!cluster.any_locks_held());
    }

    #[test]
    fn test_unreachable_owner_fails_prepare_and_rolls_back() {
        let cluster = TestCluster::new(2, 1).unwrap();
        let local_key = cluster.key_owned_only_by(1).unwrap();
        let remote_key = cluster.key_owned_only_by(2).unwrap();
        let origin = cluster.node(1).unwrap();
        let owner = cluster.node(2).unwrap();

        let mut tx = origin.begin(xid(1)).unwrap();
        origin.tx_put(&mut tx, local_key.clone(), "l", &opts()).unwrap();
        origin.tx_put(&mut tx, remote_key.clone(), "r", &opts()).unwrap();
        assert_eq!(origin.locks().locked_stripe_count(), 1);

        cluster.network.inject(2, NodeFault::Unreachable);
        let err = origin.commit(&mut tx).unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(origin.locks().locked_stripe_count(), 0);
        assert_eq!(origin.get(&local_key, &opts()).unwrap(), None);

        // node 2 never heard the rollback; its locks go when the coordinator leaves
        assert!(owner.locks().is_write_locked(&remote_key));
        cluster.network.heal(2);
        owner.install_view([2]);
        assert!(!cluster.any_locks_held());
    }

    #[test]
    fn test_transactional_clear_locks_every_member() {
        let cluster = TestCluster::new(2, 1).unwrap();
        let origin = cluster.node(1).unwrap();
        let owner = cluster.node(2).unwrap();
        let key = cluster.key_owned_only_by(2).unwrap();
        owner.put(key.clone(), "v", &opts()).unwrap();

        let mut tx = origin.begin(xid(1)).unwrap();
        assert!(origin.tx_clear(&mut tx, &opts()).unwrap());
        let stripes = owner.locks().num_stripes();
        assert_eq!(owner.locks().total_write_lock_count(), stripes);
        assert_eq!(
            cluster.network.delivered(),
            vec![crate::testing::DeliveredCommand {
                from: 1,
                to: 2,
                command: RemoteCommand::LockKeys {
                    gtx: tx.gtx(),
                    keys: Vec::new(),
                },
            }]
        );

        origin.commit(&mut tx).unwrap();
        assert!(owner.container().is_empty());
        assert!(!cluster.any_locks_held());
    }
}
