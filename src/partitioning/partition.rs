//! Per-partition ownership state machine.
//!
//! ```text
//!   Stopped ──start()──▶ Starting ──complete_starting()──▶ Running
//!      ▲                                                      │
//!      └──complete_stopping()── Stopping ◀──────stop()────────┘
//! ```
//!
//! Every mutation ends with the same reconciliation step: a stopped partition
//! starts when this node is the assigned owner and nobody else still holds it,
//! and a running partition stops when ownership moved elsewhere. Transitions
//! in flight (`Starting`/`Stopping`) only record the new owner; the next
//! completion callback picks it up.

use crate::types::{NodeName, PartitionMsg};
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Lifecycle of a partition on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionStatus::Stopped => write!(f, "stopped"),
            PartitionStatus::Starting => write!(f, "starting"),
            PartitionStatus::Running => write!(f, "running"),
            PartitionStatus::Stopping => write!(f, "stopping"),
        }
    }
}

/// Local view of a partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionState {
    /// Local lifecycle status.
    pub status: PartitionStatus,
    /// Node the allocator assigns this partition to. Empty until assigned.
    pub owner: NodeName,
    /// Node that last announced itself as running the partition.
    pub current: NodeName,
    /// Logical clock of the `current` claim.
    pub incarnation: u64,
    /// Whether `current` has since stopped or left.
    pub left: bool,
}

impl PartitionState {
    /// The gossip message describing this state.
    pub fn message(&self) -> PartitionMsg {
        PartitionMsg {
            incarnation: self.incarnation,
            current: self.current.clone(),
            left: self.left,
        }
    }

    /// Merge a received message as a last-writer-wins register.
    ///
    /// Claims are ordered by `(incarnation, current)`. A strictly greater
    /// claim replaces all three fields. An equal claim can only set `left`,
    /// never clear it. Returns whether anything changed.
    pub fn merge(&mut self, msg: &PartitionMsg) -> bool {
        let ours = (self.incarnation, self.current.as_str());
        let theirs = (msg.incarnation, msg.current.as_str());

        match theirs.cmp(&ours) {
            std::cmp::Ordering::Greater => {
                self.incarnation = msg.incarnation;
                self.current = msg.current.clone();
                self.left = msg.left;
                true
            }
            std::cmp::Ordering::Equal if msg.left && !self.left => {
                self.left = true;
                true
            }
            _ => false,
        }
    }
}

/// Side effects requested by a [`Partition`].
///
/// Called with the partition lock held: implementations must not call back
/// into the same partition synchronously. Completion is reported later via
/// [`Partition::complete_starting`] and [`Partition::complete_stopping`].
pub trait PartitionDelegate: Send + Sync {
    /// Begin running the partition locally.
    fn start(&self);

    /// Stop running the partition locally.
    fn stop(&self);

    /// Send the partition's message to every other node.
    fn broadcast(&self, msg: PartitionMsg);
}

/// A single partition and its ownership state machine.
pub struct Partition<D> {
    self_node: NodeName,
    delegate: D,
    state: Mutex<PartitionState>,
}

impl<D: PartitionDelegate> Partition<D> {
    /// Create a stopped partition owned by nobody.
    pub fn new(self_node: impl Into<NodeName>, delegate: D) -> Self {
        Self {
            self_node: self_node.into(),
            delegate,
            state: Mutex::new(PartitionState::default()),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PartitionState {
        self.state.lock().clone()
    }

    /// The message this node would gossip for the partition.
    pub fn message(&self) -> PartitionMsg {
        self.state.lock().message()
    }

    /// Get the delegate.
    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    /// Record the allocator's owner for this partition.
    pub fn update_owner(&self, name: &str) {
        let mut state = self.state.lock();
        if state.owner != name {
            state.owner = name.to_string();
        }
        self.reconcile(&mut state);
    }

    /// Report that a requested start has finished.
    ///
    /// Returns false, and does nothing, unless the partition was starting.
    pub fn complete_starting(&self) -> bool {
        let mut state = self.state.lock();
        if state.status != PartitionStatus::Starting {
            return false;
        }

        state.incarnation += 1;
        state.current = self.self_node.clone();
        state.left = false;
        state.status = PartitionStatus::Running;
        debug!(
            node = %self.self_node,
            incarnation = state.incarnation,
            "Partition running"
        );

        self.delegate.broadcast(state.message());
        self.reconcile(&mut state);
        true
    }

    /// Report that a requested stop has finished.
    ///
    /// Returns false, and does nothing, unless the partition was stopping.
    /// `left` is only announced for this node's own claim; if a peer's claim
    /// has superseded it in the meantime, that claim is left untouched.
    pub fn complete_stopping(&self) -> bool {
        let mut state = self.state.lock();
        if state.status != PartitionStatus::Stopping {
            return false;
        }

        state.status = PartitionStatus::Stopped;
        if state.current == self.self_node {
            state.left = true;
            debug!(
                node = %self.self_node,
                incarnation = state.incarnation,
                "Partition stopped"
            );
            self.delegate.broadcast(state.message());
        } else {
            debug!(
                node = %self.self_node,
                current = %state.current,
                "Partition stopped after losing its claim"
            );
        }

        self.reconcile(&mut state);
        true
    }

    /// Merge a message received from a peer. Returns whether it was newer.
    pub fn recv_broadcast(&self, msg: &PartitionMsg) -> bool {
        let mut state = self.state.lock();
        let changed = state.merge(msg);
        if !changed {
            trace!(
                incarnation = msg.incarnation,
                current = %msg.current,
                left = msg.left,
                "Dropped stale partition message"
            );
        }
        self.reconcile(&mut state);
        changed
    }

    /// A node disappeared without announcing it.
    ///
    /// If it was the current holder, the holder is considered gone. This is
    /// a local inference and does not go through the incarnation merge.
    pub fn node_leave(&self, name: &str) {
        let mut state = self.state.lock();
        if state.current == name && !state.left {
            debug!(node = %name, incarnation = state.incarnation, "Holder left");
            state.left = true;
        }
        self.reconcile(&mut state);
    }

    fn reconcile(&self, state: &mut PartitionState) {
        let owned = state.owner == self.self_node;
        match state.status {
            PartitionStatus::Stopped if owned && (state.current.is_empty() || state.left) => {
                state.status = PartitionStatus::Starting;
                debug!(node = %self.self_node, "Starting partition");
                self.delegate.start();
            }
            PartitionStatus::Running if !owned => {
                state.status = PartitionStatus::Stopping;
                debug!(node = %self.self_node, owner = %state.owner, "Stopping partition");
                self.delegate.stop();
            }
            _ => {}
        }
    }
}

impl<D> std::fmt::Debug for Partition<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("self_node", &self.self_node)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DelegateCall, RecordingDelegate};

    const SELF: &str = "self-node";

    fn partition() -> Partition<RecordingDelegate> {
        Partition::new(SELF, RecordingDelegate::new())
    }

    fn msg(incarnation: u64, current: &str, left: bool) -> PartitionMsg {
        PartitionMsg::new(incarnation, current, left)
    }

    fn state(
        status: PartitionStatus,
        owner: &str,
        current: &str,
        incarnation: u64,
        left: bool,
    ) -> PartitionState {
        PartitionState {
            status,
            owner: owner.into(),
            current: current.into(),
            incarnation,
            left,
        }
    }

    #[test]
    fn test_update_owner_to_self_starts() {
        let p = partition();
        p.update_owner(SELF);

        assert_eq!(p.state(), state(PartitionStatus::Starting, SELF, "", 0, false));
        assert_eq!(p.delegate().start_count(), 1);
    }

    #[test]
    fn test_complete_starting_broadcasts() {
        let p = partition();
        p.update_owner(SELF);
        p.complete_starting();

        assert_eq!(p.delegate().broadcasts(), vec![msg(1, SELF, false)]);
        assert_eq!(p.state(), state(PartitionStatus::Running, SELF, SELF, 1, false));
    }

    #[test]
    fn test_complete_starting_when_not_starting_does_nothing() {
        let p = partition();
        assert!(!p.complete_starting());

        assert!(p.delegate().calls().is_empty());
        assert_eq!(p.state(), PartitionState::default());
    }

    #[test]
    fn test_update_owner_to_other_does_nothing() {
        let p = partition();
        p.update_owner("other-node");

        assert_eq!(p.state(), state(PartitionStatus::Stopped, "other-node", "", 0, false));
        assert_eq!(p.delegate().start_count(), 0);
    }

    #[test]
    fn test_recv_broadcast_updates_current() {
        let p = partition();
        assert!(p.recv_broadcast(&msg(2, "other-node", false)));

        assert_eq!(p.state(), state(PartitionStatus::Stopped, "", "other-node", 2, false));
        assert_eq!(p.delegate().start_count(), 0);
    }

    #[test]
    fn test_owner_update_waits_for_current_holder() {
        let p = partition();
        p.recv_broadcast(&msg(2, "other-node", false));
        p.update_owner(SELF);

        assert_eq!(p.delegate().start_count(), 0);
        assert_eq!(p.state(), state(PartitionStatus::Stopped, SELF, "other-node", 2, false));
    }

    #[test]
    fn test_older_broadcast_dropped() {
        let p = partition();
        p.recv_broadcast(&msg(2, "other-node", false));

        assert!(!p.recv_broadcast(&msg(1, "other-node-2", false)));
        assert!(!p.recv_broadcast(&msg(1, "other-node-3", false)));

        assert_eq!(p.state(), state(PartitionStatus::Stopped, "", "other-node", 2, false));
    }

    #[test]
    fn test_node_leave_of_holder_allows_start() {
        let p = partition();
        p.recv_broadcast(&msg(2, "other-node", false));
        p.node_leave("other-node");
        p.update_owner(SELF);

        assert_eq!(p.state(), state(PartitionStatus::Starting, SELF, "other-node", 2, true));
        assert_eq!(p.delegate().start_count(), 1);
    }

    #[test]
    fn test_node_leave_of_other_node_does_nothing() {
        let p = partition();
        p.recv_broadcast(&msg(2, "other-node", false));
        p.node_leave("other-node-xx");
        p.update_owner(SELF);

        assert_eq!(p.state(), state(PartitionStatus::Stopped, SELF, "other-node", 2, false));
        assert_eq!(p.delegate().start_count(), 0);
    }

    #[test]
    fn test_left_survives_replayed_broadcast() {
        let p = partition();
        p.recv_broadcast(&msg(2, "other-node", false));
        p.node_leave("other-node");
        p.recv_broadcast(&msg(2, "other-node", false));

        assert_eq!(p.state(), state(PartitionStatus::Stopped, "", "other-node", 2, true));
    }

    #[test]
    fn test_owner_then_holder_leave_starts_once() {
        let p = partition();
        p.recv_broadcast(&msg(2, "other-node", false));
        p.update_owner(SELF);

        p.node_leave("other-node");
        p.node_leave("other-node");

        assert_eq!(p.state(), state(PartitionStatus::Starting, SELF, "other-node", 2, true));
        assert_eq!(p.delegate().start_count(), 1);
    }

    #[test]
    fn test_higher_name_wins_at_same_incarnation() {
        let p = partition();
        p.recv_broadcast(&msg(2, "other-node-01", false));
        assert!(p.recv_broadcast(&msg(2, "other-node-02", false)));
        assert!(!p.recv_broadcast(&msg(2, "other-node-01", true)));

        assert_eq!(p.state(), state(PartitionStatus::Stopped, "", "other-node-02", 2, false));
    }

    #[test]
    fn test_left_broadcast_then_start() {
        let p = partition();
        p.recv_broadcast(&msg(2, "other-node", false));
        p.update_owner(SELF);
        p.recv_broadcast(&msg(2, "other-node", true));
        assert_eq!(p.delegate().start_count(), 1);

        p.complete_starting();
        assert_eq!(p.state(), state(PartitionStatus::Running, SELF, SELF, 3, false));
        assert_eq!(p.delegate().broadcasts(), vec![msg(3, SELF, false)]);
    }

    #[test]
    fn test_owner_change_while_starting_only_records() {
        let p = partition();
        p.update_owner(SELF);
        p.update_owner("other-node");

        assert_eq!(p.state(), state(PartitionStatus::Starting, "other-node", "", 0, false));
        assert_eq!(p.delegate().stop_count(), 0);
    }

    #[test]
    fn test_owner_change_while_running_stops() {
        let p = partition();
        p.update_owner(SELF);
        p.complete_starting();
        p.update_owner("other-node");

        assert_eq!(p.state(), state(PartitionStatus::Stopping, "other-node", SELF, 1, false));
        assert_eq!(p.delegate().stop_count(), 1);
    }

    #[test]
    fn test_complete_starting_after_owner_moved_stops_immediately() {
        let p = partition();
        p.update_owner(SELF);
        p.update_owner("other-node");
        p.complete_starting();

        assert_eq!(p.state(), state(PartitionStatus::Stopping, "other-node", SELF, 1, false));
        assert_eq!(
            p.delegate().calls(),
            vec![
                DelegateCall::Start,
                DelegateCall::Broadcast(msg(1, SELF, false)),
                DelegateCall::Stop,
            ]
        );
    }

    #[test]
    fn test_complete_stopping_broadcasts_left() {
        let p = partition();
        p.update_owner(SELF);
        p.complete_starting();
        p.update_owner("other-node");
        p.complete_stopping();

        assert_eq!(p.state(), state(PartitionStatus::Stopped, "other-node", SELF, 1, true));
        assert_eq!(
            p.delegate().broadcasts(),
            vec![msg(1, SELF, false), msg(1, SELF, true)]
        );
    }

    #[test]
    fn test_complete_stopping_keeps_superseding_claim() {
        let p = partition();
        p.update_owner(SELF);
        p.complete_starting();
        p.update_owner("other-node");
        // a peer claim at the same incarnation wins the name tie-break
        assert!(p.recv_broadcast(&msg(1, "tail-node", false)));
        assert!(p.complete_stopping());

        assert_eq!(
            p.state(),
            state(PartitionStatus::Stopped, "other-node", "tail-node", 1, false)
        );
        assert_eq!(p.delegate().broadcasts(), vec![msg(1, SELF, false)]);
    }

    #[test]
    fn test_owner_back_while_stopping_restarts() {
        let p = partition();
        p.update_owner(SELF);
        p.complete_starting();
        p.update_owner("other-node");
        p.update_owner(SELF);
        p.complete_stopping();

        assert_eq!(p.state(), state(PartitionStatus::Starting, SELF, SELF, 1, true));
        assert_eq!(p.delegate().start_count(), 2);
    }

    #[test]
    fn test_complete_stopping_when_not_stopping_does_nothing() {
        let p = partition();
        assert!(!p.complete_stopping());
        assert!(p.delegate().calls().is_empty());
        assert_eq!(p.state(), PartitionState::default());
    }

    #[test]
    fn test_message_reflects_state() {
        let p = partition();
        assert_eq!(p.message(), msg(0, "", false));

        p.update_owner(SELF);
        p.complete_starting();
        assert_eq!(p.message(), msg(1, SELF, false));

        p.update_owner("other-node");
        p.complete_stopping();
        assert_eq!(p.message(), msg(1, SELF, true));
    }

    #[test]
    fn test_merge_table() {
        struct Case {
            name: &'static str,
            before: PartitionMsg,
            msg: PartitionMsg,
            after: PartitionMsg,
            changed: bool,
        }

        let cases = [
            Case {
                name: "from-empty",
                before: msg(0, "", false),
                msg: msg(1, "node01", false),
                after: msg(1, "node01", false),
                changed: true,
            },
            Case {
                name: "from-empty-with-left",
                before: msg(0, "", false),
                msg: msg(1, "node01", true),
                after: msg(1, "node01", true),
                changed: true,
            },
            Case {
                name: "higher-incarnation-with-left",
                before: msg(1, "node02", false),
                msg: msg(2, "node01", true),
                after: msg(2, "node01", true),
                changed: true,
            },
            Case {
                name: "lower-incarnation",
                before: msg(3, "node01", false),
                msg: msg(2, "node09", true),
                after: msg(3, "node01", false),
                changed: false,
            },
            Case {
                name: "same-incarnation-higher-name-with-left",
                before: msg(2, "node01", false),
                msg: msg(2, "node02", true),
                after: msg(2, "node02", true),
                changed: true,
            },
            Case {
                name: "same-incarnation-lower-name",
                before: msg(2, "node02", false),
                msg: msg(2, "node01", true),
                after: msg(2, "node02", false),
                changed: false,
            },
            Case {
                name: "same-incarnation-same-name-left-before",
                before: msg(2, "node01", true),
                msg: msg(2, "node01", false),
                after: msg(2, "node01", true),
                changed: false,
            },
            Case {
                name: "same-incarnation-greater-name-left-before",
                before: msg(2, "node01", true),
                msg: msg(2, "node02", false),
                after: msg(2, "node02", false),
                changed: true,
            },
            Case {
                name: "bigger-incarnation-left-before",
                before: msg(2, "node01", true),
                msg: msg(3, "node01", false),
                after: msg(3, "node01", false),
                changed: true,
            },
            Case {
                name: "same-incarnation-same-name-left-after",
                before: msg(2, "node01", false),
                msg: msg(2, "node01", true),
                after: msg(2, "node01", true),
                changed: true,
            },
        ];

        for case in cases {
            let mut s = PartitionState {
                incarnation: case.before.incarnation,
                current: case.before.current.clone(),
                left: case.before.left,
                ..Default::default()
            };
            assert_eq!(s.merge(&case.msg), case.changed, "case {}", case.name);
            assert_eq!(s.message(), case.after, "case {}", case.name);
        }
    }
}
