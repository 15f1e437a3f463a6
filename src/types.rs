//! Core types shared by the partition and membership layers.

use serde::{Deserialize, Serialize};

/// Partition identifier, dense in `0..partition_count`.
pub type PartitionId = u32;

/// Node identity as announced by the gossip transport.
pub type NodeName = String;

/// A member of the cluster as reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name (sort key).
    pub name: NodeName,
    /// Address the node is reachable at.
    pub addr: String,
}

impl NodeInfo {
    /// Create a new NodeInfo.
    pub fn new(name: impl Into<NodeName>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

/// Ownership fact gossiped for a single partition.
///
/// "As of `incarnation`, the holder is `current`, and it has left if `left`."
/// Messages are idempotent and merge in any order, see
/// [`PartitionState::merge`](crate::partitioning::PartitionState::merge).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionMsg {
    /// Logical clock of the claim.
    pub incarnation: u64,
    /// Node that last ran the partition.
    pub current: NodeName,
    /// Whether `current` has since stopped the partition.
    pub left: bool,
}

impl PartitionMsg {
    /// Create a new partition message.
    pub fn new(incarnation: u64, current: impl Into<NodeName>, left: bool) -> Self {
        Self {
            incarnation,
            current: current.into(),
            left,
        }
    }
}

/// Graceful-leave announcement for a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeLeftMsg {
    /// Name of the departing node.
    pub name: NodeName,
    /// Address the departing node was reachable at.
    pub addr: String,
}

impl NodeLeftMsg {
    /// Create a new graceful-leave message.
    pub fn new(name: impl Into<NodeName>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

/// Envelope for everything the shim asks the transport to broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShimMessage {
    /// Ownership update for one partition.
    Partition {
        partition: PartitionId,
        msg: PartitionMsg,
    },

    /// A node announced a graceful leave.
    NodeLeft(NodeLeftMsg),
}

impl ShimMessage {
    /// Serialize message to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Full partition state exchanged during a push/pull sync.
///
/// `partitions[i]` is the latest known message for partition `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPullState {
    pub partitions: Vec<PartitionMsg>,
}

impl PushPullState {
    /// Serialize state to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize state from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shim_message_serialization() {
        let msg = ShimMessage::Partition {
            partition: 3,
            msg: PartitionMsg::new(2, "node-a", true),
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(ShimMessage::from_bytes(&bytes).unwrap(), msg);

        let left = ShimMessage::NodeLeft(NodeLeftMsg::new("node-b", "10.0.0.2:7946"));
        let bytes = left.to_bytes().unwrap();
        assert_eq!(ShimMessage::from_bytes(&bytes).unwrap(), left);
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(ShimMessage::from_bytes(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }

    #[test]
    fn test_node_info_ordering() {
        let mut nodes = vec![
            NodeInfo::new("node-c", "addr1"),
            NodeInfo::new("node-a", "addr3"),
            NodeInfo::new("node-b", "addr2"),
        ];
        nodes.sort();
        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["node-a", "node-b", "node-c"]);
    }
}
