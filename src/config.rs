//! Configuration types for the partition shim.

use crate::error::{Error, Result};
use crate::types::NodeName;
use std::time::Duration;

/// Default number of partitions.
pub const DEFAULT_PARTITION_COUNT: u32 = 16;

/// Default retention for graceful-leave tombstones.
pub const DEFAULT_LEFT_NODE_EXPIRY: Duration = Duration::from_secs(30);

/// Default interval between join attempts.
pub const DEFAULT_JOIN_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Main configuration for a partition shim service.
#[derive(Debug, Clone)]
pub struct ShimConfig {
    /// Total number of partitions in the cluster. Must match on every node.
    pub partition_count: u32,

    /// Name of this node, as known to the gossip transport.
    pub node_name: NodeName,

    /// Address this node is reachable at.
    pub node_addr: String,

    /// Statically configured addresses to join.
    /// The local address may be included; it is filtered out.
    pub static_addrs: Vec<String>,

    /// How long a gracefully left node is remembered.
    pub left_node_expiry: Duration,

    /// Interval between join rounds.
    pub join_retry_interval: Duration,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            partition_count: DEFAULT_PARTITION_COUNT,
            node_name: "node-1".to_string(),
            node_addr: "127.0.0.1:7946".to_string(),
            static_addrs: Vec::new(),
            left_node_expiry: DEFAULT_LEFT_NODE_EXPIRY,
            join_retry_interval: DEFAULT_JOIN_RETRY_INTERVAL,
        }
    }
}

impl ShimConfig {
    /// Create a new configuration for the given node.
    pub fn new(
        node_name: impl Into<NodeName>,
        node_addr: impl Into<String>,
        partition_count: u32,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            node_addr: node_addr.into(),
            partition_count,
            ..Default::default()
        }
    }

    /// Set static addresses to join.
    pub fn with_static_addrs<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_addrs = addrs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the graceful-leave tombstone expiry.
    pub fn with_left_node_expiry(mut self, expiry: Duration) -> Self {
        self.left_node_expiry = expiry;
        self
    }

    /// Set the join retry interval.
    pub fn with_join_retry_interval(mut self, interval: Duration) -> Self {
        self.join_retry_interval = interval;
        self
    }

    /// Check the configuration for values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.partition_count == 0 {
            return Err(Error::Config("partition_count must be > 0".into()));
        }
        if self.node_name.is_empty() {
            return Err(Error::Config("node_name must not be empty".into()));
        }
        if self.left_node_expiry.is_zero() {
            return Err(Error::Config("left_node_expiry must be > 0".into()));
        }
        if self.join_retry_interval.is_zero() {
            return Err(Error::Config("join_retry_interval must be > 0".into()));
        }
        Ok(())
    }

    /// Static addresses with the local address and duplicates removed,
    /// in configured order.
    pub fn join_addrs(&self) -> Vec<String> {
        let mut result: Vec<String> = Vec::with_capacity(self.static_addrs.len());
        for addr in &self.static_addrs {
            if *addr == self.node_addr || result.contains(addr) {
                continue;
            }
            result.push(addr.clone());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShimConfig::default();
        assert_eq!(config.partition_count, 16);
        assert_eq!(config.left_node_expiry, Duration::from_secs(30));
        assert!(config.static_addrs.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ShimConfig::new("node-a", "address01", 8)
            .with_static_addrs(["address02", "address03"])
            .with_left_node_expiry(Duration::from_secs(10))
            .with_join_retry_interval(Duration::from_millis(500));

        assert_eq!(config.node_name, "node-a");
        assert_eq!(config.partition_count, 8);
        assert_eq!(config.static_addrs, vec!["address02", "address03"]);
        assert_eq!(config.left_node_expiry, Duration::from_secs(10));
        assert_eq!(config.join_retry_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ShimConfig::new("a", "addr", 0).validate().is_err());
        assert!(ShimConfig::new("", "addr", 4).validate().is_err());
        assert!(ShimConfig::new("a", "addr", 4)
            .with_left_node_expiry(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ShimConfig::new("a", "addr", 4)
            .with_join_retry_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_join_addrs_drops_self() {
        let config = ShimConfig::new("a", "address02", 4)
            .with_static_addrs(["address01", "address02", "address03", "address01"]);
        assert_eq!(config.join_addrs(), vec!["address01", "address03"]);

        let config = ShimConfig::new("a", "address04", 4)
            .with_static_addrs(["address01", "address02", "address03"]);
        assert_eq!(
            config.join_addrs(),
            vec!["address01", "address02", "address03"]
        );
    }
}
