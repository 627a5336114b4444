//! In-process RPC between caches, with fault injection.

use crate::cache::TransactionalCache;
use crate::error::{Error, Result};
use crate::remoting::{RemoteCommand, RemoteException, Response, RpcManager};
use crate::types::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Fault injected for commands addressed to one node.
#[derive(Debug, Clone)]
pub enum NodeFault {
    /// The node cannot be reached; the call fails in transit.
    Unreachable,
    /// The node runs nothing and answers with this exception.
    Exception(RemoteException),
    /// The node answers `Unsuccessful`.
    Unsuccessful,
}

/// One recorded delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredCommand {
    pub from: NodeId,
    pub to: NodeId,
    pub command: RemoteCommand,
}

/// Shared switchboard connecting caches in one process.
#[derive(Debug, Default)]
pub struct LoopbackNetwork {
    nodes: RwLock<HashMap<NodeId, Weak<TransactionalCache>>>,
    faults: RwLock<HashMap<NodeId, NodeFault>>,
    log: RwLock<Vec<DeliveredCommand>>,
    messages: AtomicU64,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// RPC endpoint for `address`.
    pub fn endpoint(self: &Arc<Self>, address: NodeId) -> Arc<LoopbackRpc> {
        Arc::new(LoopbackRpc {
            network: self.clone(),
            address,
        })
    }

    /// Make a cache reachable at its node id.
    pub fn register(&self, cache: &Arc<TransactionalCache>) {
        self.nodes
            .write()
            .insert(cache.node_id(), Arc::downgrade(cache));
    }

    pub fn inject(&self, node_id: NodeId, fault: NodeFault) {
        self.faults.write().insert(node_id, fault);
    }

    pub fn heal(&self, node_id: NodeId) {
        self.faults.write().remove(&node_id);
    }

    /// Every command delivered so far, in order.
    pub fn delivered(&self) -> Vec<DeliveredCommand> {
        self.log.read().clone()
    }

    /// Commands delivered to `node_id` with the given name.
    pub fn delivered_to(&self, node_id: NodeId, name: &str) -> usize {
        self.log
            .read()
            .iter()
            .filter(|d| d.to == node_id && d.command.name() == name)
            .count()
    }

    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    fn deliver(&self, from: NodeId, to: NodeId, command: &RemoteCommand) -> Result<Response> {
        let fault = self.faults.read().get(&to).cloned();
        match fault {
            Some(NodeFault::Unreachable) => {
                return Err(Error::Network(format!("node {to} unreachable from {from}")))
            }
            Some(NodeFault::Exception(exception)) => return Ok(Response::exception(exception)),
            Some(NodeFault::Unsuccessful) => return Ok(Response::Unsuccessful),
            None => {}
        }

        let target = self.nodes.read().get(&to).and_then(Weak::upgrade);
        let Some(cache) = target else {
            return Err(Error::Network(format!("node {to} is not registered")));
        };

        self.messages.fetch_add(1, Ordering::Relaxed);
        self.log.write().push(DeliveredCommand {
            from,
            to,
            command: command.clone(),
        });
        Ok(cache.handle_remote_command(command))
    }
}

/// [`RpcManager`] endpoint of one node on a [`LoopbackNetwork`].
pub struct LoopbackRpc {
    network: Arc<LoopbackNetwork>,
    address: NodeId,
}

impl RpcManager for LoopbackRpc {
    fn address(&self) -> NodeId {
        self.address
    }

    fn invoke_remotely(
        &self,
        targets: &[NodeId],
        command: &RemoteCommand,
        _timeout: Duration,
    ) -> Result<Vec<(NodeId, Response)>> {
        targets
            .iter()
            .map(|&to| {
                self.network
                    .deliver(self.address, to, command)
                    .map(|response| (to, response))
            })
            .collect()
    }
}
