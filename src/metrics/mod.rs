//! Metrics for the partition shim.
//!
//! Counters and gauges are plain atomics, so recording from inside the
//! partition or membership locks is safe.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ShimMetrics                          │
//! │  ┌──────────────────────────┐  ┌─────────────────────────┐  │
//! │  │  Counters                │  │  Gauges                 │  │
//! │  │ - partitions started     │  │ - running partitions    │  │
//! │  │ - broadcasts sent/stale  │  │ - cluster members       │  │
//! │  │ - leaves, join rounds    │  │                         │  │
//! │  └──────────────────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod counters;

pub use counters::{Counter, Gauge};

/// Metrics recorded by a [`CoreService`](crate::service::CoreService).
#[derive(Debug)]
pub struct ShimMetrics {
    /// Partitions that finished starting on this node.
    pub partitions_started: Counter,
    /// Partitions that finished stopping on this node.
    pub partitions_stopped: Counter,
    /// Messages handed to the broadcaster.
    pub broadcasts_sent: Counter,
    /// Received partition messages that changed nothing.
    pub stale_broadcasts_dropped: Counter,
    /// Membership changes observed by the rebalancer.
    pub membership_changes: Counter,
    /// Graceful-leave announcements received.
    pub graceful_leaves: Counter,
    /// Nodes that disappeared without announcing it.
    pub ungraceful_leaves: Counter,
    /// Join rounds completed.
    pub join_rounds: Counter,

    /// Partitions currently running here.
    pub running_partitions: Gauge,
    /// Current member count, self included.
    pub cluster_members: Gauge,
}

impl ShimMetrics {
    pub fn new() -> Self {
        Self {
            partitions_started: Counter::new(
                "shim_partitions_started_total",
                "Partitions started on this node",
            ),
            partitions_stopped: Counter::new(
                "shim_partitions_stopped_total",
                "Partitions stopped on this node",
            ),
            broadcasts_sent: Counter::new("shim_broadcasts_sent_total", "Messages broadcast"),
            stale_broadcasts_dropped: Counter::new(
                "shim_stale_broadcasts_dropped_total",
                "Partition messages that changed nothing",
            ),
            membership_changes: Counter::new(
                "shim_membership_changes_total",
                "Membership changes observed",
            ),
            graceful_leaves: Counter::new("shim_graceful_leaves_total", "Graceful leaves received"),
            ungraceful_leaves: Counter::new(
                "shim_ungraceful_leaves_total",
                "Nodes that left without announcing it",
            ),
            join_rounds: Counter::new("shim_join_rounds_total", "Join rounds completed"),
            running_partitions: Gauge::new(
                "shim_running_partitions",
                "Partitions currently running on this node",
            ),
            cluster_members: Gauge::new("shim_cluster_members", "Cluster members, self included"),
        }
    }

    /// Record a partition that finished starting.
    pub fn record_started(&self) {
        self.partitions_started.inc();
        self.running_partitions.inc();
    }

    /// Record a partition that finished stopping.
    pub fn record_stopped(&self) {
        self.partitions_stopped.inc();
        self.running_partitions.dec();
    }

    /// Record a received partition message.
    pub fn record_received(&self, changed: bool) {
        if !changed {
            self.stale_broadcasts_dropped.inc();
        }
    }

    /// Record a membership change to `members` nodes.
    pub fn record_membership(&self, members: usize) {
        self.membership_changes.inc();
        self.cluster_members.set(members as i64);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            partitions_started: self.partitions_started.get(),
            partitions_stopped: self.partitions_stopped.get(),
            broadcasts_sent: self.broadcasts_sent.get(),
            stale_broadcasts_dropped: self.stale_broadcasts_dropped.get(),
            membership_changes: self.membership_changes.get(),
            graceful_leaves: self.graceful_leaves.get(),
            ungraceful_leaves: self.ungraceful_leaves.get(),
            join_rounds: self.join_rounds.get(),
            running_partitions: self.running_partitions.get(),
            cluster_members: self.cluster_members.get(),
        }
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        macro_rules! add_metric {
            ($kind:literal, $metric:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $metric.name(),
                    $metric.help(),
                    $metric.name(),
                    $kind,
                    $metric.name(),
                    $metric.get()
                ));
            };
        }

        add_metric!("counter", self.partitions_started);
        add_metric!("counter", self.partitions_stopped);
        add_metric!("counter", self.broadcasts_sent);
        add_metric!("counter", self.stale_broadcasts_dropped);
        add_metric!("counter", self.membership_changes);
        add_metric!("counter", self.graceful_leaves);
        add_metric!("counter", self.ungraceful_leaves);
        add_metric!("counter", self.join_rounds);
        add_metric!("gauge", self.running_partitions);
        add_metric!("gauge", self.cluster_members);

        output
    }
}

impl Default for ShimMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of [`ShimMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub partitions_started: u64,
    pub partitions_stopped: u64,
    pub broadcasts_sent: u64,
    pub stale_broadcasts_dropped: u64,
    pub membership_changes: u64,
    pub graceful_leaves: u64,
    pub ungraceful_leaves: u64,
    pub join_rounds: u64,
    pub running_partitions: i64,
    pub cluster_members: i64,
}
