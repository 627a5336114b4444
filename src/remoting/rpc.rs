use super::command::RemoteCommand;
use super::response::Response;
use crate::error::Result;
use crate::types::NodeId;
use std::time::Duration;

/// Messaging collaborator.
///
/// Owns transport, retries and routing. Returns one [`Response`] per target
/// that processed the command; a target that could not be reached fails the
/// whole call with [`Error::Network`](crate::error::Error::Network).
pub trait RpcManager: Send + Sync {
    /// Address of the local node.
    fn address(&self) -> NodeId;

    fn invoke_remotely(
        &self,
        targets: &[NodeId],
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<Vec<(NodeId, Response)>>;
}
