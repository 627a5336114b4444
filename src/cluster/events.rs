//! Cluster membership events delivered by the membership collaborator.

use crate::types::NodeId;
use std::collections::BTreeSet;

/// Membership changes reported by the membership collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberEvent {
    /// A node joined the cluster.
    NodeJoin { node_id: NodeId },

    /// A member left on purpose.
    NodeLeave { node_id: NodeId },

    /// A member stopped answering but is still in the view.
    NodeSuspect {
        node_id: NodeId,
        /// Consecutive health checks that went unanswered.
        failed_pings: usize,
    },

    /// A member was dropped after failing.
    NodeFailed { node_id: NodeId },

    /// A failed member came back.
    NodeRecovered { node_id: NodeId },

    /// A new view was installed.
    ViewChanged {
        view_id: u64,
        members: Vec<NodeId>,
        /// Members of the previous view missing from this one.
        leavers: Vec<NodeId>,
    },
}

impl MemberEvent {
    /// Node the event is about; `None` for a whole-view change.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            MemberEvent::NodeJoin { node_id }
            | MemberEvent::NodeLeave { node_id }
            | MemberEvent::NodeSuspect { node_id, .. }
            | MemberEvent::NodeFailed { node_id }
            | MemberEvent::NodeRecovered { node_id } => Some(*node_id),
            MemberEvent::ViewChanged { .. } => None,
        }
    }

    /// Whether the event adds a member.
    pub fn is_join(&self) -> bool {
        matches!(
            self,
            MemberEvent::NodeJoin { .. } | MemberEvent::NodeRecovered { .. }
        )
    }

    /// Whether the event removes at least one member.
    pub fn is_leave(&self) -> bool {
        match self {
            MemberEvent::NodeLeave { .. } | MemberEvent::NodeFailed { .. } => true,
            MemberEvent::ViewChanged { leavers, .. } => !leavers.is_empty(),
            _ => false,
        }
    }

    /// Nodes this event removes from the cluster.
    pub fn leavers(&self) -> BTreeSet<NodeId> {
        match self {
            MemberEvent::NodeLeave { node_id } | MemberEvent::NodeFailed { node_id } => {
                BTreeSet::from([*node_id])
            }
            MemberEvent::ViewChanged { leavers, .. } => leavers.iter().copied().collect(),
            _ => BTreeSet::new(),
        }
    }
}

/// Receives membership changes; called on the thread that installs the view.
pub trait MemberEventListener: Send + Sync {
    fn on_event(&self, event: &MemberEvent);
}

/// Logs every membership change.
pub struct LoggingEventListener;

impl MemberEventListener for LoggingEventListener {
    fn on_event(&self, event: &MemberEvent) {
        match event {
            MemberEvent::NodeJoin { node_id } => {
                tracing::info!(node_id, "member joined");
            }
            MemberEvent::NodeLeave { node_id } => {
                tracing::info!(node_id, "member left");
            }
            MemberEvent::NodeSuspect {
                node_id,
                failed_pings,
            } => {
                tracing::warn!(node_id, failed_pings, "member suspected");
            }
            MemberEvent::NodeFailed { node_id } => {
                tracing::error!(node_id, "member failed");
            }
            MemberEvent::NodeRecovered { node_id } => {
                tracing::info!(node_id, "member recovered");
            }
            MemberEvent::ViewChanged {
                view_id,
                members,
                leavers,
            } => {
                tracing::info!(view_id, ?members, ?leavers, "view installed");
            }
        }
    }
}

/// Current membership as seen by the local node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterView {
    view_id: u64,
    members: BTreeSet<NodeId>,
}

impl ClusterView {
    pub fn new(members: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            view_id: 1,
            members: members.into_iter().collect(),
        }
    }

    pub fn view_id(&self) -> u64 {
        self.view_id
    }

    pub fn members(&self) -> &BTreeSet<NodeId> {
        &self.members
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.members.contains(&node_id)
    }

    /// Install a new member set and describe the change.
    pub fn install(&mut self, members: impl IntoIterator<Item = NodeId>) -> MemberEvent {
        let members: BTreeSet<NodeId> = members.into_iter().collect();
        let leavers = self.members.difference(&members).copied().collect();
        self.view_id += 1;
        self.members = members;
        MemberEvent::ViewChanged {
            view_id: self.view_id,
            members: self.members.iter().copied().collect(),
            leavers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        let join = MemberEvent::NodeJoin { node_id: 1 };
        assert!(join.is_join());
        assert!(!join.is_leave());
        assert_eq!(join.node_id(), Some(1));
        assert!(join.leavers().is_empty());

        let failed = MemberEvent::NodeFailed { node_id: 4 };
        assert!(failed.is_leave());
        assert_eq!(failed.leavers(), BTreeSet::from([4]));
    }

    #[test]
    fn test_view_install_reports_leavers() {
        let mut view = ClusterView::new([1, 2, 3]);
        let event = view.install([1, 3, 5]);

        assert_eq!(
            event,
            MemberEvent::ViewChanged {
                view_id: 2,
                members: vec![1, 3, 5],
                leavers: vec![2],
            }
        );
        assert!(event.is_leave());
        assert_eq!(event.node_id(), None);
        assert!(view.contains(5));
        assert!(!view.contains(2));
    }
}
