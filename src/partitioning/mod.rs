//! Partition ownership: who should run each partition, and who actually does.
//!
//! Two pieces cooperate here:
//! - [`reallocate`] decides the *owner* of every partition from the member
//!   list, deterministically on every node.
//! - [`Partition`] tracks the *current* holder learned from gossip and only
//!   starts the partition locally once the previous holder is gone.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         membership                            │
//! │                  sorted node names (A, B, C)                  │
//! └───────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │  reallocate(count, nodes, previous) -> { A:[0,1], B:[2,3] }   │
//! └───────────────────────────────────────────────────────────────┘
//!                               │ update_owner()
//!               ┌───────────────┼───────────────┐
//!               ▼               ▼               ▼
//!         ┌───────────┐   ┌───────────┐   ┌───────────┐
//!         │Partition 0│   │Partition 1│   │Partition 2│ ◀── recv_broadcast()
//!         └───────────┘   └───────────┘   └───────────┘
//!               │ start() / stop() / broadcast()
//!               ▼
//!         PartitionDelegate
//! ```
//!
//! # Example
//!
//! ```rust
//! use partition_shim::partitioning::{reallocate, PartitionAssignments};
//!
//! let nodes = vec!["A".to_string(), "B".to_string()];
//! let assigns = reallocate(5, &nodes, &PartitionAssignments::new()).unwrap();
//! assert_eq!(assigns["A"], vec![0, 1, 2]);
//! assert_eq!(assigns["B"], vec![3, 4]);
//! ```

mod allocator;
mod partition;

pub use allocator::{owners, reallocate, PartitionAssignments};
pub use partition::{Partition, PartitionDelegate, PartitionState, PartitionStatus};
