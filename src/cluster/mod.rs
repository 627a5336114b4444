//! Cluster membership collaborator interface.

pub mod events;

pub use events::{ClusterView, LoggingEventListener, MemberEvent, MemberEventListener};
