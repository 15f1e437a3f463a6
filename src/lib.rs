//! Coordinator-free partition ownership over gossip membership.
//!
//! Every node runs the same deterministic allocator over the same member
//! list, so all nodes agree on who *should* run each partition without a
//! leader. Gossiped ownership messages then make sure a partition is only
//! started once its previous holder has stopped or left.
//!
//! # Features
//!
//! - Sticky, balanced reallocation on membership change
//! - Per-partition state machine with last-writer-wins ownership gossip
//! - Join manager with graceful-leave tombstones and static address retries
//! - Sliding-window sequence tracker for at-least-once delivery bookkeeping
//!
//! # Example
//!
//! ```rust
//! use partition_shim::testing::{RecordingMessageBroadcaster, RecordingRunner};
//! use partition_shim::{CoreService, ShimConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> partition_shim::Result<()> {
//! let config = ShimConfig::new("node-a", "10.0.0.1:7946", 4)
//!     .with_static_addrs(["10.0.0.1:7946", "10.0.0.2:7946"]);
//!
//! let runner = Arc::new(RecordingRunner::new());
//! let service = CoreService::new(
//!     config,
//!     runner.clone(),
//!     Arc::new(RecordingMessageBroadcaster::new()),
//! )?;
//!
//! // The gossip layer reports members and messages...
//! service.notify_join("node-b", "10.0.0.2:7946");
//!
//! // ...and the join round decides when partitions may start.
//! let (addrs, _) = service.join_manager().need_join();
//! assert_eq!(addrs, Some(vec![]));
//! service.join_manager().join_completed();
//!
//! assert_eq!(runner.started(), vec![0, 1]);
//! service.partition_started(0)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Gossip transport / application       │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │               CoreService                   │
//! │  • notify_join / notify_leave               │
//! │  • handle_bytes / merge_remote_state        │
//! │  • partition_started / partition_stopped    │
//! └─────────────────────────────────────────────┘
//!                     │
//!     ┌───────────────┼───────────────┐
//!     ▼               ▼               ▼
//! ┌─────────┐   ┌───────────┐   ┌───────────┐
//! │  Join   │   │Reallocator│   │ Partition │
//! │ Manager │   │           │   │  states   │
//! └─────────┘   └───────────┘   └───────────┘
//! ```

pub mod clock;
pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;
pub mod partitioning;
pub mod sequence;
pub mod service;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ShimConfig;
pub use error::{Error, Result};
pub use service::{CoreService, MessageBroadcaster, PartitionRunner};
pub use types::{
    NodeInfo, NodeLeftMsg, NodeName, PartitionId, PartitionMsg, PushPullState, ShimMessage,
};

// Re-export cluster types
pub use cluster::{
    JoinLoop, JoinOutcome, JoinTransport, NodeBroadcaster, NodeJoinManager, NodeListener,
};

// Re-export partitioning types
pub use partitioning::{
    reallocate, Partition, PartitionAssignments, PartitionDelegate, PartitionState,
    PartitionStatus,
};

pub use metrics::{MetricsSnapshot, ShimMetrics};
pub use sequence::SequenceTracker;
