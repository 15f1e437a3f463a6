//! Testing utilities for the partition shim.
//!
//! Recording implementations of every collaborator trait, plus a mock join
//! transport. Everything records synchronously and never calls back into
//! the shim, so the doubles are safe to use under the shim's locks.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        Test doubles                           │
//! │                                                               │
//! │  PartitionDelegate  ──▶ RecordingDelegate                     │
//! │  NodeListener       ──▶ RecordingListener                     │
//! │  NodeBroadcaster    ──▶ RecordingBroadcaster                  │
//! │  PartitionRunner    ──▶ RecordingRunner                       │
//! │  MessageBroadcaster ──▶ RecordingMessageBroadcaster           │
//! │  JoinTransport      ──▶ MockJoinTransport                     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use partition_shim::testing::{RecordingMessageBroadcaster, RecordingRunner, RunnerCall};
//! use partition_shim::{CoreService, ShimConfig};
//! use std::sync::Arc;
//!
//! let runner = Arc::new(RecordingRunner::new());
//! let service = CoreService::new(
//!     ShimConfig::new("node-a", "127.0.0.1:7946", 2),
//!     runner.clone(),
//!     Arc::new(RecordingMessageBroadcaster::new()),
//! )
//! .unwrap();
//!
//! let (_, _) = service.join_manager().need_join();
//! service.join_manager().join_completed();
//! assert_eq!(runner.calls(), vec![RunnerCall::Start(0), RunnerCall::Start(1)]);
//! ```


use crate::cluster::events::{NodeBroadcaster, NodeListener};
use crate::cluster::join_manager::NodeJoinManager;
use crate::cluster::joiner::JoinTransport;
use crate::error::{Error, Result};
use crate::partitioning::PartitionDelegate;
use crate::service::{MessageBroadcaster, PartitionRunner};
use crate::types::{NodeInfo, NodeLeftMsg, NodeName, PartitionId, PartitionMsg, ShimMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A call made on a [`RecordingDelegate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateCall {
    Start,
    Stop,
    Broadcast(PartitionMsg),
}

/// Partition delegate that records every call.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    calls: Mutex<Vec<DelegateCall>>,
}

impl RecordingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call, in order.
    pub fn calls(&self) -> Vec<DelegateCall> {
        self.calls.lock().clone()
    }

    pub fn start_count(&self) -> usize {
        self.count(|c| matches!(c, DelegateCall::Start))
    }

    pub fn stop_count(&self) -> usize {
        self.count(|c| matches!(c, DelegateCall::Stop))
    }

    /// Broadcast messages, in order.
    pub fn broadcasts(&self) -> Vec<PartitionMsg> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                DelegateCall::Broadcast(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&DelegateCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(*c)).count()
    }
}

impl PartitionDelegate for RecordingDelegate {
    fn start(&self) {
        self.calls.lock().push(DelegateCall::Start);
    }

    fn stop(&self) {
        self.calls.lock().push(DelegateCall::Stop);
    }

    fn broadcast(&self, msg: PartitionMsg) {
        self.calls.lock().push(DelegateCall::Broadcast(msg));
    }
}

/// Node listener that records membership notifications.
#[derive(Debug, Default)]
pub struct RecordingListener {
    changes: Mutex<Vec<Vec<NodeInfo>>>,
    join_completed: AtomicUsize,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn change_count(&self) -> usize {
        self.changes.lock().len()
    }

    /// The most recent member list.
    pub fn last_change(&self) -> Option<Vec<NodeInfo>> {
        self.changes.lock().last().cloned()
    }

    pub fn join_completed_count(&self) -> usize {
        self.join_completed.load(Ordering::Relaxed)
    }
}

impl NodeListener for RecordingListener {
    fn on_change(&self, nodes: Vec<NodeInfo>) {
        self.changes.lock().push(nodes);
    }

    fn on_join_completed(&self) {
        self.join_completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Node broadcaster that records graceful-leave messages.
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    messages: Mutex<Vec<NodeLeftMsg>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<NodeLeftMsg> {
        self.messages.lock().clone()
    }
}

impl NodeBroadcaster for RecordingBroadcaster {
    fn broadcast(&self, msg: NodeLeftMsg) {
        self.messages.lock().push(msg);
    }
}

/// A call made on a [`RecordingRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerCall {
    Start(PartitionId),
    Stop(PartitionId),
}

/// Partition runner that records start and stop requests.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<RunnerCall>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request, in order.
    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().clone()
    }

    /// Drain recorded requests.
    pub fn take_calls(&self) -> Vec<RunnerCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Partitions asked to start, in order.
    pub fn started(&self) -> Vec<PartitionId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RunnerCall::Start(id) => Some(*id),
                RunnerCall::Stop(_) => None,
            })
            .collect()
    }

    /// Partitions asked to stop, in order.
    pub fn stopped(&self) -> Vec<PartitionId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RunnerCall::Stop(id) => Some(*id),
                RunnerCall::Start(_) => None,
            })
            .collect()
    }
}

impl PartitionRunner for RecordingRunner {
    fn start(&self, partition: PartitionId) {
        self.calls.lock().push(RunnerCall::Start(partition));
    }

    fn stop(&self, partition: PartitionId) {
        self.calls.lock().push(RunnerCall::Stop(partition));
    }
}

/// Message broadcaster that queues messages for manual delivery.
#[derive(Debug, Default)]
pub struct RecordingMessageBroadcaster {
    messages: Mutex<Vec<ShimMessage>>,
}

impl RecordingMessageBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued messages, in order.
    pub fn messages(&self) -> Vec<ShimMessage> {
        self.messages.lock().clone()
    }

    /// Drain queued messages.
    pub fn take(&self) -> Vec<ShimMessage> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl MessageBroadcaster for RecordingMessageBroadcaster {
    fn broadcast(&self, msg: ShimMessage) {
        self.messages.lock().push(msg);
    }
}

/// Join transport over a fixed table of reachable peers.
///
/// Reached peers are reported to the join manager set with
/// [`reporting_to`](Self::reporting_to), the way a membership layer reports
/// nodes it connected to.
#[derive(Default)]
pub struct MockJoinTransport {
    peers: HashMap<String, NodeName>,
    failing: bool,
    manager: Option<Arc<NodeJoinManager>>,
    attempts: Mutex<Vec<Vec<String>>>,
}

impl MockJoinTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` reachable at `addr`.
    pub fn with_peer(mut self, name: impl Into<NodeName>, addr: impl Into<String>) -> Self {
        self.peers.insert(addr.into(), name.into());
        self
    }

    /// Fail every join attempt.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Report reached peers to `manager`.
    pub fn reporting_to(mut self, manager: Arc<NodeJoinManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Address lists of every attempt, in order.
    pub fn attempts(&self) -> Vec<Vec<String>> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl JoinTransport for MockJoinTransport {
    async fn join(&self, addrs: &[String]) -> Result<usize> {
        self.attempts.lock().push(addrs.to_vec());
        if self.failing {
            return Err(Error::JoinFailed("transport unavailable".into()));
        }

        let mut reached = 0;
        for addr in addrs {
            let Some(name) = self.peers.get(addr) else {
                continue;
            };
            if let Some(manager) = &self.manager {
                manager.notify_join(name, addr);
            }
            reached += 1;
        }

        if reached == 0 {
            return Err(Error::JoinFailed(format!("no address reachable: {addrs:?}")));
        }
        Ok(reached)
    }
}
