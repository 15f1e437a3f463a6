//! Core service wiring membership to partition ownership.
//!
//! ```text
//!   gossip transport                                   host application
//!        │                                                   ▲
//!        │ notify_join / notify_leave / handle_bytes          │ PartitionRunner
//!        ▼                                                   │ start(id) / stop(id)
//! ┌──────────────────┐  on_change   ┌────────────┐  update_owner  ┌─────────────┐
//! │ NodeJoinManager  │─────────────▶│ Rebalancer │───────────────▶│ Partition[] │
//! └──────────────────┘              └────────────┘                └─────────────┘
//!        │ NodeLeftMsg                                          │ PartitionMsg
//!        └─────────────────────▶ MessageBroadcaster ◀─────────────┘
//! ```
//!
//! The allocator's sticky input is rebuilt from the merged partition
//! messages on every rebalance, and a rebalance also runs whenever one of
//! those messages changes. Nodes that have merged the same messages and see
//! the same members therefore agree on every owner, whatever order they
//! joined in.
//!
//! Lock order is join manager, then rebalancer, then partition. The
//! [`PartitionRunner`] and [`MessageBroadcaster`] are called with locks held
//! and must not call back into the service synchronously; completions are
//! reported later through [`CoreService::partition_started`] and
//! [`CoreService::partition_stopped`].

use crate::clock::{Clock, SystemClock};
use crate::cluster::events::{NodeBroadcaster, NodeListener};
use crate::cluster::join_manager::NodeJoinManager;
use crate::cluster::joiner::{JoinLoop, JoinTransport};
use crate::config::ShimConfig;
use crate::error::{Error, Result};
use crate::metrics::ShimMetrics;
use crate::partitioning::{
    owners, reallocate, Partition, PartitionAssignments, PartitionDelegate, PartitionState,
    PartitionStatus,
};
use crate::types::{
    NodeInfo, NodeLeftMsg, NodeName, PartitionId, PartitionMsg, PushPullState, ShimMessage,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Runs partitions on behalf of the shim.
pub trait PartitionRunner: Send + Sync + 'static {
    /// Begin running `partition`. Report completion with
    /// [`CoreService::partition_started`].
    fn start(&self, partition: PartitionId);

    /// Stop running `partition`. Report completion with
    /// [`CoreService::partition_stopped`].
    fn stop(&self, partition: PartitionId);
}

/// Gossip transport fan-out for shim messages.
pub trait MessageBroadcaster: Send + Sync + 'static {
    fn broadcast(&self, msg: ShimMessage);
}

/// Partition delegate that forwards to the service collaborators.
struct RunnerDelegate {
    partition: PartitionId,
    runner: Arc<dyn PartitionRunner>,
    broadcaster: Arc<dyn MessageBroadcaster>,
    metrics: Arc<ShimMetrics>,
}

impl PartitionDelegate for RunnerDelegate {
    fn start(&self) {
        self.runner.start(self.partition);
    }

    fn stop(&self) {
        self.runner.stop(self.partition);
    }

    fn broadcast(&self, msg: PartitionMsg) {
        self.metrics.broadcasts_sent.inc();
        self.broadcaster.broadcast(ShimMessage::Partition {
            partition: self.partition,
            msg,
        });
    }
}

/// Forwards graceful-leave re-broadcasts onto the shared transport.
struct LeaveRelay {
    broadcaster: Arc<dyn MessageBroadcaster>,
    metrics: Arc<ShimMetrics>,
}

impl NodeBroadcaster for LeaveRelay {
    fn broadcast(&self, msg: NodeLeftMsg) {
        self.metrics.broadcasts_sent.inc();
        self.broadcaster.broadcast(ShimMessage::NodeLeft(msg));
    }
}

type Partitions = Arc<[Partition<RunnerDelegate>]>;

#[derive(Debug)]
struct RebalanceState {
    join_finished: bool,
    nodes: Vec<NodeName>,
    assignments: PartitionAssignments,
}

/// Recomputes assignments on membership or partition gossip change and
/// pushes owners down.
struct Rebalancer {
    partition_count: u32,
    partitions: Partitions,
    metrics: Arc<ShimMetrics>,
    state: Mutex<RebalanceState>,
}

impl Rebalancer {
    fn new(
        self_node: &str,
        partition_count: u32,
        partitions: Partitions,
        metrics: Arc<ShimMetrics>,
    ) -> Self {
        metrics.cluster_members.set(1);
        Self {
            partition_count,
            partitions,
            metrics,
            state: Mutex::new(RebalanceState {
                join_finished: false,
                nodes: vec![self_node.to_string()],
                assignments: PartitionAssignments::new(),
            }),
        }
    }

    fn assignments(&self) -> PartitionAssignments {
        self.state.lock().assignments.clone()
    }

    fn remove_node(&self, name: &str) {
        let mut state = self.state.lock();
        let before = state.nodes.len();
        state.nodes.retain(|n| n != name);
        if state.nodes.len() != before {
            self.metrics.record_membership(state.nodes.len());
        }
        self.apply(&mut state);
    }

    /// Re-run the assignment after partition gossip changed.
    fn refresh(&self) {
        let mut state = self.state.lock();
        self.apply(&mut state);
    }

    /// Live holders from the merged partition messages, in partition order.
    ///
    /// This is the only history fed to the allocator. Every node converges on
    /// the same messages, so every node computes the same assignment.
    fn observed_holders(&self) -> PartitionAssignments {
        let mut holders = PartitionAssignments::new();
        for (id, partition) in self.partitions.iter().enumerate() {
            let state = partition.state();
            if !state.current.is_empty() && !state.left {
                holders
                    .entry(state.current)
                    .or_default()
                    .push(id as PartitionId);
            }
        }
        holders
    }

    fn apply(&self, state: &mut RebalanceState) {
        if !state.join_finished {
            trace!(nodes = state.nodes.len(), "Deferring rebalance until join completes");
            return;
        }

        let holders = self.observed_holders();
        let next = match reallocate(self.partition_count, &state.nodes, &holders) {
            Ok(next) => next,
            Err(e) => {
                warn!(error = %e, "Rebalance skipped");
                return;
            }
        };

        for (partition, owner) in self
            .partitions
            .iter()
            .zip(owners(self.partition_count, &next))
        {
            if let Some(owner) = owner {
                partition.update_owner(owner);
            }
        }

        if next != state.assignments {
            debug!(nodes = state.nodes.len(), "Partitions reassigned");
            state.assignments = next;
        }
    }
}

impl NodeListener for Rebalancer {
    fn on_change(&self, nodes: Vec<NodeInfo>) {
        let mut state = self.state.lock();
        state.nodes = nodes.into_iter().map(|n| n.name).collect();
        self.metrics.record_membership(state.nodes.len());
        self.apply(&mut state);
    }

    fn on_join_completed(&self) {
        self.metrics.join_rounds.inc();
        let mut state = self.state.lock();
        if !state.join_finished {
            state.join_finished = true;
            info!(nodes = state.nodes.len(), "First join round completed");
        }
        self.apply(&mut state);
    }
}

/// Partition ownership service for one node.
pub struct CoreService {
    config: ShimConfig,
    partitions: Partitions,
    rebalancer: Arc<Rebalancer>,
    join_manager: Arc<NodeJoinManager>,
    broadcaster: Arc<dyn MessageBroadcaster>,
    metrics: Arc<ShimMetrics>,
}

impl CoreService {
    /// Create a service using the system clock.
    pub fn new(
        config: ShimConfig,
        runner: Arc<dyn PartitionRunner>,
        broadcaster: Arc<dyn MessageBroadcaster>,
    ) -> Result<Self> {
        Self::with_clock(config, runner, broadcaster, Arc::new(SystemClock))
    }

    /// Create a service with an explicit clock.
    pub fn with_clock(
        config: ShimConfig,
        runner: Arc<dyn PartitionRunner>,
        broadcaster: Arc<dyn MessageBroadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(ShimMetrics::new());
        let partitions: Partitions = (0..config.partition_count)
            .map(|partition| {
                Partition::new(
                    config.node_name.clone(),
                    RunnerDelegate {
                        partition,
                        runner: runner.clone(),
                        broadcaster: broadcaster.clone(),
                        metrics: metrics.clone(),
                    },
                )
            })
            .collect();

        let rebalancer = Arc::new(Rebalancer::new(
            &config.node_name,
            config.partition_count,
            partitions.clone(),
            metrics.clone(),
        ));
        let relay = Arc::new(LeaveRelay {
            broadcaster: broadcaster.clone(),
            metrics: metrics.clone(),
        });
        let join_manager = Arc::new(NodeJoinManager::new(&config, rebalancer.clone(), relay, clock));

        info!(
            node = %config.node_name,
            addr = %config.node_addr,
            partitions = config.partition_count,
            static_addrs = join_manager.static_addrs().len(),
            "Partition shim created"
        );

        Ok(Self {
            config,
            partitions,
            rebalancer,
            join_manager,
            broadcaster,
            metrics,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ShimConfig {
        &self.config
    }

    /// Get the join manager.
    pub fn join_manager(&self) -> &Arc<NodeJoinManager> {
        &self.join_manager
    }

    /// Build a join loop over `transport` at the configured retry interval.
    pub fn join_loop(&self, transport: Arc<dyn JoinTransport>) -> JoinLoop {
        JoinLoop::new(
            self.join_manager.clone(),
            transport,
            self.config.join_retry_interval,
        )
    }

    /// Get the metrics.
    pub fn metrics(&self) -> &ShimMetrics {
        &self.metrics
    }

    /// Current members, self included.
    pub fn members(&self) -> Vec<NodeInfo> {
        self.join_manager.members()
    }

    /// Latest assignment. Empty until the first join round completes.
    pub fn assignments(&self) -> PartitionAssignments {
        self.rebalancer.assignments()
    }

    fn partition(&self, id: PartitionId) -> Result<&Partition<RunnerDelegate>> {
        self.partitions
            .get(id as usize)
            .ok_or(Error::UnknownPartition(id))
    }

    /// Snapshot of one partition.
    pub fn partition_state(&self, id: PartitionId) -> Result<PartitionState> {
        Ok(self.partition(id)?.state())
    }

    /// Partitions currently running on this node.
    pub fn running_partitions(&self) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state().status == PartitionStatus::Running)
            .map(|(id, _)| id as PartitionId)
            .collect()
    }

    /// A node became reachable.
    pub fn notify_join(&self, name: &str, addr: &str) {
        self.join_manager.notify_join(name, addr);
    }

    /// A node disappeared without announcing it.
    ///
    /// Partitions it held are marked as left, then ownership is recomputed
    /// from the remaining members.
    pub fn notify_leave(&self, name: &str) {
        if name == self.config.node_name {
            trace!(node = %name, "Ignoring leave of self");
            return;
        }

        self.join_manager.notify_leave(name);
        self.metrics.ungraceful_leaves.inc();
        for partition in self.partitions.iter() {
            partition.node_leave(name);
        }
        self.rebalancer.remove_node(name);
    }

    /// Dispatch a message received from the gossip transport.
    pub fn handle_message(&self, msg: ShimMessage) -> Result<()> {
        match msg {
            ShimMessage::Partition { partition, msg } => {
                let changed = self.partition(partition)?.recv_broadcast(&msg);
                self.metrics.record_received(changed);
                if changed {
                    self.rebalancer.refresh();
                }
            }
            ShimMessage::NodeLeft(msg) => {
                if self.join_manager.notify_msg(msg) {
                    self.metrics.graceful_leaves.inc();
                }
            }
        }
        Ok(())
    }

    /// Decode and dispatch a raw gossip payload.
    pub fn handle_bytes(&self, data: &[u8]) -> Result<()> {
        self.handle_message(ShimMessage::from_bytes(data)?)
    }

    /// The runner finished starting `id`.
    pub fn partition_started(&self, id: PartitionId) -> Result<()> {
        if self.partition(id)?.complete_starting() {
            self.metrics.record_started();
            self.rebalancer.refresh();
        }
        Ok(())
    }

    /// The runner finished stopping `id`.
    pub fn partition_stopped(&self, id: PartitionId) -> Result<()> {
        if self.partition(id)?.complete_stopping() {
            self.metrics.record_stopped();
            self.rebalancer.refresh();
        }
        Ok(())
    }

    /// Every partition's current message, for a push/pull sync.
    pub fn local_state(&self) -> PushPullState {
        PushPullState {
            partitions: self.partitions.iter().map(|p| p.message()).collect(),
        }
    }

    /// Merge a peer's push/pull state.
    pub fn merge_remote_state(&self, state: &PushPullState) -> Result<()> {
        if state.partitions.len() != self.partitions.len() {
            return Err(Error::Config(format!(
                "remote state has {} partitions, expected {}",
                state.partitions.len(),
                self.partitions.len()
            )));
        }

        let mut any_changed = false;
        for (partition, msg) in self.partitions.iter().zip(&state.partitions) {
            let changed = partition.recv_broadcast(msg);
            self.metrics.record_received(changed);
            any_changed |= changed;
        }
        if any_changed {
            self.rebalancer.refresh();
        }
        Ok(())
    }

    /// Decode and merge a peer's push/pull payload.
    pub fn merge_remote_bytes(&self, data: &[u8]) -> Result<()> {
        self.merge_remote_state(&PushPullState::from_bytes(data)?)
    }

    /// Announce that this node is leaving gracefully.
    pub fn announce_leave(&self) {
        let msg = self.join_manager.leave_msg();
        info!(node = %msg.name, "Announcing graceful leave");
        self.metrics.broadcasts_sent.inc();
        self.broadcaster.broadcast(ShimMessage::NodeLeft(msg));
    }
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("node", &self.config.node_name)
            .field("partitions", &self.partitions.len())
            .field("join_manager", &self.join_manager)
            .finish()
    }
}
