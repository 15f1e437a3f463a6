//! Membership callbacks and the graceful-leave broadcast seam.

use crate::types::{NodeInfo, NodeLeftMsg};
use tokio::sync::mpsc;

/// Events emitted by the join manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// The member list changed. Sorted by name, self included.
    Changed(Vec<NodeInfo>),

    /// A join round finished.
    JoinCompleted,
}

/// Listener for membership changes.
///
/// Called while the join manager holds its lock; implementations must not
/// call back into the join manager.
pub trait NodeListener: Send + Sync + 'static {
    /// Called after a membership mutation with every current member.
    fn on_change(&self, nodes: Vec<NodeInfo>);

    /// Called when a join round finishes.
    fn on_join_completed(&self);
}

/// Gossip fan-out for graceful-leave announcements (at-least-once).
pub trait NodeBroadcaster: Send + Sync + 'static {
    fn broadcast(&self, msg: NodeLeftMsg);
}

/// No-op listener.
pub struct NoopNodeListener;

impl NodeListener for NoopNodeListener {
    fn on_change(&self, _nodes: Vec<NodeInfo>) {}

    fn on_join_completed(&self) {}
}

/// No-op broadcaster.
pub struct NoopNodeBroadcaster;

impl NodeBroadcaster for NoopNodeBroadcaster {
    fn broadcast(&self, _msg: NodeLeftMsg) {}
}

/// Listener that forwards events into a channel, for hosts driven by an
/// async event loop.
pub struct ChannelNodeListener {
    event_tx: mpsc::UnboundedSender<MembershipEvent>,
}

impl ChannelNodeListener {
    /// Create a listener and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MembershipEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self { event_tx }, event_rx)
    }
}

impl NodeListener for ChannelNodeListener {
    fn on_change(&self, nodes: Vec<NodeInfo>) {
        // Receiver gone means the host stopped listening.
        let _ = self.event_tx.send(MembershipEvent::Changed(nodes));
    }

    fn on_join_completed(&self) {
        let _ = self.event_tx.send(MembershipEvent::JoinCompleted);
    }
}
