//! Membership merge and join-target computation.
//!
//! The join manager keeps one record per node name. Records sharing an
//! address are grouped so that a restarted process reusing an address does
//! not leave tombstones behind forever, while a statically configured
//! address is never forgotten entirely.

use crate::clock::Clock;
use crate::cluster::events::{NodeBroadcaster, NodeListener};
use crate::config::ShimConfig;
use crate::types::{NodeInfo, NodeLeftMsg, NodeName};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Status of a known node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Reachable member.
    Alive,
    /// Announced a graceful leave at `left_at`.
    GracefulLeft { left_at: Instant },
}

/// Record of a known node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub status: NodeStatus,
    pub addr: String,
}

impl NodeState {
    /// An alive record.
    pub fn alive(addr: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Alive,
            addr: addr.into(),
        }
    }

    /// A graceful-leave tombstone.
    pub fn graceful_left(addr: impl Into<String>, left_at: Instant) -> Self {
        Self {
            status: NodeStatus::GracefulLeft { left_at },
            addr: addr.into(),
        }
    }

    /// Whether the node is alive.
    pub fn is_alive(&self) -> bool {
        self.status == NodeStatus::Alive
    }

    fn left_at(&self) -> Option<Instant> {
        match self.status {
            NodeStatus::Alive => None,
            NodeStatus::GracefulLeft { left_at } => Some(left_at),
        }
    }

    /// Whether a tombstone has outlived `expiry`. Alive records never expire.
    pub fn is_expired(&self, now: Instant, expiry: Duration) -> bool {
        match self.left_at() {
            None => false,
            Some(left_at) => left_at + expiry <= now,
        }
    }
}

type NodeMap = HashMap<NodeName, NodeState>;

/// Decides which node records survive a membership mutation.
#[derive(Debug, Clone)]
struct RetentionPolicy {
    static_addrs: HashSet<String>,
    expiry: Duration,
}

impl RetentionPolicy {
    fn new<I: IntoIterator<Item = String>>(static_addrs: I, expiry: Duration) -> Self {
        Self {
            static_addrs: static_addrs.into_iter().collect(),
            expiry,
        }
    }

    /// Drop expired tombstones, group by group.
    ///
    /// A group whose records have all expired keeps its most recent
    /// tombstone if the address is statically configured.
    fn apply(&self, nodes: &mut NodeMap, now: Instant) {
        let mut groups: HashMap<&str, Vec<(&NodeName, &NodeState)>> = HashMap::new();
        for (name, state) in nodes.iter() {
            groups.entry(state.addr.as_str()).or_default().push((name, state));
        }

        let mut kept: HashSet<NodeName> = HashSet::with_capacity(nodes.len());
        for (addr, group) in groups {
            let before = kept.len();
            for (name, state) in &group {
                if !state.is_expired(now, self.expiry) {
                    kept.insert((*name).clone());
                }
            }
            if kept.len() > before || !self.static_addrs.contains(addr) {
                continue;
            }
            if let Some((name, _)) = group
                .iter()
                .max_by_key(|(name, state)| (state.left_at(), *name))
            {
                kept.insert((*name).clone());
            }
        }

        nodes.retain(|name, _| kept.contains(name));
    }

    fn join(&self, nodes: &mut NodeMap, name: &str, addr: &str, now: Instant) {
        nodes.insert(name.to_string(), NodeState::alive(addr));
        self.apply(nodes, now);
    }

    /// Returns false when the node was already recorded as gracefully left.
    fn graceful_leave(&self, nodes: &mut NodeMap, name: &str, addr: &str, now: Instant) -> bool {
        if matches!(
            nodes.get(name).map(|n| n.status),
            Some(NodeStatus::GracefulLeft { .. })
        ) {
            return false;
        }
        nodes.insert(name.to_string(), NodeState::graceful_left(addr, now));
        self.apply(nodes, now);
        true
    }

    fn leave(&self, nodes: &mut NodeMap, name: &str, now: Instant) {
        if nodes.get(name).is_some_and(NodeState::is_alive) {
            nodes.remove(name);
        }
        self.apply(nodes, now);
    }
}

#[derive(Debug, Default)]
struct JoinState {
    joining: bool,
    version: u64,
    nodes: NodeMap,
}

/// Tracks membership and decides which static addresses still need a join.
pub struct NodeJoinManager {
    self_node: NodeName,
    self_addr: String,
    static_addrs: Vec<String>,
    retention: RetentionPolicy,
    listener: Arc<dyn NodeListener>,
    broadcaster: Arc<dyn NodeBroadcaster>,
    clock: Arc<dyn Clock>,
    state: Mutex<JoinState>,
}

impl NodeJoinManager {
    /// Create a join manager for the node described by `config`.
    pub fn new(
        config: &ShimConfig,
        listener: Arc<dyn NodeListener>,
        broadcaster: Arc<dyn NodeBroadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let static_addrs = config.join_addrs();
        Self {
            self_node: config.node_name.clone(),
            self_addr: config.node_addr.clone(),
            retention: RetentionPolicy::new(static_addrs.iter().cloned(), config.left_node_expiry),
            static_addrs,
            listener,
            broadcaster,
            clock,
            state: Mutex::new(JoinState::default()),
        }
    }

    /// Get this node's name.
    pub fn self_node(&self) -> &str {
        &self.self_node
    }

    /// Static addresses other than our own.
    pub fn static_addrs(&self) -> &[String] {
        &self.static_addrs
    }

    /// Current merge version.
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    /// Whether a join round is in flight.
    pub fn is_joining(&self) -> bool {
        self.state.lock().joining
    }

    /// Record for a node, if retained.
    pub fn node(&self, name: &str) -> Option<NodeState> {
        self.state.lock().nodes.get(name).cloned()
    }

    /// Number of retained records, tombstones included.
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Current members: self plus every alive node, sorted by name.
    pub fn members(&self) -> Vec<NodeInfo> {
        let state = self.state.lock();
        self.members_of(&state)
    }

    fn members_of(&self, state: &JoinState) -> Vec<NodeInfo> {
        let mut members = Vec::with_capacity(state.nodes.len() + 1);
        members.push(NodeInfo::new(self.self_node.clone(), self.self_addr.clone()));
        members.extend(
            state
                .nodes
                .iter()
                .filter(|(_, n)| n.is_alive())
                .map(|(name, n)| NodeInfo::new(name.clone(), n.addr.clone())),
        );
        members.sort();
        members
    }

    /// Start a join round.
    ///
    /// Returns `None` if a round is already in flight. Otherwise marks a
    /// round in flight and returns the sorted static addresses not covered
    /// by a known node; the caller must finish the round with
    /// [`join_completed`](Self::join_completed), even if the list is empty.
    pub fn need_join(&self) -> (Option<Vec<String>>, u64) {
        let mut state = self.state.lock();
        if state.joining {
            return (None, state.version);
        }
        state.joining = true;

        let now = self.clock.now();
        let expiry = self.retention.expiry;
        let known: HashSet<&str> = state
            .nodes
            .values()
            .filter(|n| !n.is_expired(now, expiry))
            .map(|n| n.addr.as_str())
            .collect();

        let mut addrs: Vec<String> = self
            .static_addrs
            .iter()
            .filter(|a| !known.contains(a.as_str()))
            .cloned()
            .collect();
        addrs.sort();

        debug!(version = state.version, missing = addrs.len(), "Join round started");
        (Some(addrs), state.version)
    }

    /// Finish the join round started by [`need_join`](Self::need_join).
    pub fn join_completed(&self) {
        let mut state = self.state.lock();
        state.joining = false;
        debug!(version = state.version, "Join round completed");
        self.listener.on_join_completed();
    }

    /// A node became reachable at `addr`.
    pub fn notify_join(&self, name: &str, addr: &str) {
        if name == self.self_node {
            trace!(node = %name, "Ignoring join of self");
            return;
        }

        let mut state = self.state.lock();
        let now = self.clock.now();
        self.retention.join(&mut state.nodes, name, addr, now);
        state.version += 1;
        info!(node = %name, %addr, version = state.version, "Node joined");

        let members = self.members_of(&state);
        self.listener.on_change(members);
    }

    /// A node disappeared without announcing it.
    ///
    /// Alive records are dropped outright; tombstones are left for expiry.
    /// Listeners are not notified.
    pub fn notify_leave(&self, name: &str) {
        let mut state = self.state.lock();
        let now = self.clock.now();
        self.retention.leave(&mut state.nodes, name, now);
        state.version += 1;
        info!(node = %name, version = state.version, "Node left");
    }

    /// A peer announced a graceful leave.
    ///
    /// Duplicates are dropped without re-broadcast; the first copy is
    /// recorded and propagated once. Returns whether the message was new.
    pub fn notify_msg(&self, msg: NodeLeftMsg) -> bool {
        if msg.name == self.self_node {
            trace!(node = %msg.name, "Ignoring leave announcement of self");
            return false;
        }

        let mut state = self.state.lock();
        let now = self.clock.now();
        if !self
            .retention
            .graceful_leave(&mut state.nodes, &msg.name, &msg.addr, now)
        {
            trace!(node = %msg.name, "Dropped duplicate leave announcement");
            return false;
        }
        state.version += 1;
        info!(node = %msg.name, addr = %msg.addr, version = state.version, "Node left gracefully");

        let members = self.members_of(&state);
        self.listener.on_change(members);
        self.broadcaster.broadcast(msg);
        true
    }

    /// The announcement this node gossips when it leaves gracefully.
    pub fn leave_msg(&self) -> NodeLeftMsg {
        NodeLeftMsg::new(self.self_node.clone(), self.self_addr.clone())
    }
}

impl std::fmt::Debug for NodeJoinManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NodeJoinManager")
            .field("self_node", &self.self_node)
            .field("joining", &state.joining)
            .field("version", &state.version)
            .field("node_count", &state.nodes.len())
            .finish()
    }
}
