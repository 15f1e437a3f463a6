//! Cluster membership and join retries.

pub mod events;
pub mod join_manager;
pub mod joiner;

pub use events::{
    ChannelNodeListener, MembershipEvent, NodeBroadcaster, NodeListener, NoopNodeBroadcaster,
    NoopNodeListener,
};
pub use join_manager::{NodeJoinManager, NodeState, NodeStatus};
pub use joiner::{JoinLoop, JoinOutcome, JoinTransport};
