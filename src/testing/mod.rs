//! Testing utilities for multi-node cache scenarios.
//!
//! Caches in one process talk to each other through a [`LoopbackNetwork`],
//! which delivers [`RemoteCommand`](crate::remoting::RemoteCommand)s
//! synchronously and can inject faults per node.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TestCluster                             │
//! │                                                                 │
//! │   node 1 ──┐                                       ┌── node 3   │
//! │            │   ┌───────────────────────────────┐   │            │
//! │   node 2 ──┼──►│        LoopbackNetwork        │◄──┘            │
//! │            │   │  - delivery log               │                │
//! │            │   │  - Unreachable / Exception /  │                │
//! │            │   │    Unsuccessful faults        │                │
//! │            │   └───────────────────────────────┘                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use cortado::testing::{NodeFault, TestCluster};
//!
//! let cluster = TestCluster::new(3, 1)?;
//! let key = cluster.key_owned_only_by(2).unwrap();
//!
//! cluster.network.inject(2, NodeFault::Unreachable);
//! let mut tx = cluster.node(1).unwrap().begin(xid)?;
//! assert!(cluster.node(1).unwrap().tx_put(&mut tx, key, "v", &opts).is_err());
//! ```

mod failing_store;
mod loopback;

mod cluster_scenario_tests;
mod lock_scenario_tests;

pub use failing_store::FailingStore;
pub use loopback::{DeliveredCommand, LoopbackNetwork, LoopbackRpc, NodeFault};

use crate::cache::TransactionalCache;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::types::NodeId;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Caches wired together over one [`LoopbackNetwork`], all sharing a view.
#[derive(Debug)]
pub struct TestCluster {
    /// Network connecting the nodes.
    pub network: Arc<LoopbackNetwork>,

    /// One cache per node, in node id order.
    pub caches: Vec<Arc<TransactionalCache>>,

    /// When the cluster was created.
    pub started_at: Instant,
}

impl TestCluster {
    /// Create nodes `1..=node_count`, each key owned by `num_owners` of them.
    pub fn new(node_count: usize, num_owners: usize) -> Result<Self> {
        Self::with_config(node_count, |node_id| {
            CacheConfig::new(node_id)
                .with_num_owners(num_owners)
                .with_lock_acquisition_timeout(Duration::from_millis(100))
        })
    }

    /// Create nodes `1..=node_count` with a config built per node.
    pub fn with_config<F>(node_count: usize, config: F) -> Result<Self>
    where
        F: Fn(NodeId) -> CacheConfig,
    {
        let network = LoopbackNetwork::new();
        let nodes: Vec<NodeId> = (1..=node_count as u64).collect();

        let mut caches = Vec::with_capacity(nodes.len());
        for &node_id in &nodes {
            let cache =
                Arc::new(TransactionalCache::new(config(node_id))?.with_rpc(network.endpoint(node_id)));
            network.register(&cache);
            caches.push(cache);
        }
        for cache in &caches {
            cache.install_view(nodes.iter().copied());
        }

        Ok(Self {
            network,
            caches,
            started_at: Instant::now(),
        })
    }

    pub fn node_count(&self) -> usize {
        self.caches.len()
    }

    /// The cache running as `node_id`.
    pub fn node(&self, node_id: NodeId) -> Option<&Arc<TransactionalCache>> {
        self.caches.iter().find(|c| c.node_id() == node_id)
    }

    /// Install `members` as the view on every node, leavers included.
    pub fn install_view(&self, members: &[NodeId]) {
        for cache in &self.caches {
            cache.install_view(members.iter().copied());
        }
    }

    /// A key whose only owner is `node_id`, if one turns up among the candidate keys.
    pub fn key_owned_only_by(&self, node_id: NodeId) -> Option<Vec<u8>> {
        let cache = self.caches.first()?;
        (0..10_000)
            .map(|i| format!("key-{i}").into_bytes())
            .find(|key| cache.owners(key) == [node_id])
    }

    /// Whether any node still holds a lock stripe.
    pub fn any_locks_held(&self) -> bool {
        self.caches.iter().any(|c| c.locks().locked_stripe_count() > 0)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
