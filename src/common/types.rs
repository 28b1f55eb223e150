//! Cluster configuration model
//!
//! A `ClusterConfig` is an immutable, versioned snapshot of:
//! - the member cache nodes
//! - the shard map (shard → owning node)
//! - named cache policy parameters

use crate::common::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node identifier
pub type NodeId = String;

/// Shard identifier (a partition of the cache keyspace)
pub type ShardId = u32;

/// Node liveness state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Suspect,
    Dead,
}

impl NodeStatus {
    /// Can shards be assigned to this node?
    pub fn is_active(&self) -> bool {
        matches!(self, NodeStatus::Active)
    }

    /// Is the node still considered a registered, live member?
    pub fn is_live(&self) -> bool {
        matches!(self, NodeStatus::Active | NodeStatus::Suspect)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Suspect => write!(f, "suspect"),
            NodeStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Cache node descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    /// Network endpoint (host:port)
    pub address: String,
    /// NVM capacity in bytes
    #[serde(default)]
    pub capacity: u64,
    /// Status when the entry was written. Inside a committed `ClusterConfig`
    /// this is always ACTIVE: a node is added only while ACTIVE and removed
    /// once DEAD, and SUSPECT is tracked by `MembershipTracker` alone.
    #[serde(default = "default_status")]
    pub status: NodeStatus,
}

fn default_status() -> NodeStatus {
    NodeStatus::Active
}

impl NodeDescriptor {
    pub fn new(node_id: impl Into<NodeId>, address: impl Into<String>, capacity: u64) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
            capacity,
            status: NodeStatus::Active,
        }
    }
}

/// Versioned cluster configuration snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub version: u64,
    pub nodes: BTreeMap<NodeId, NodeDescriptor>,
    pub shard_map: BTreeMap<ShardId, NodeId>,
    pub policy: BTreeMap<String, String>,
    pub committed_at: DateTime<Utc>,
}

impl ClusterConfig {
    /// Version 0: no nodes, no shards, seeded policy
    pub fn initial(policy: BTreeMap<String, String>) -> Self {
        Self {
            version: 0,
            nodes: BTreeMap::new(),
            shard_map: BTreeMap::new(),
            policy,
            committed_at: Utc::now(),
        }
    }

    /// Copy of this snapshot as the starting point for the next version
    pub fn next_candidate(&self) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next
    }

    /// Every shard must point at a member node with status ACTIVE
    pub fn validate_shard_map(&self) -> Result<(), ConfigError> {
        for (shard, node_id) in &self.shard_map {
            match self.nodes.get(node_id) {
                None => {
                    return Err(ConfigError::InvalidShardAssignment {
                        shard: *shard,
                        node: node_id.clone(),
                        reason: "node is not a member".into(),
                    })
                }
                Some(node) if !node.status.is_active() => {
                    return Err(ConfigError::InvalidShardAssignment {
                        shard: *shard,
                        node: node_id.clone(),
                        reason: format!("node is {}", node.status),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Shards owned by a node, ascending
    pub fn shards_of(&self, node_id: &str) -> Vec<ShardId> {
        self.shard_map
            .iter()
            .filter(|(_, owner)| owner.as_str() == node_id)
            .map(|(shard, _)| *shard)
            .collect()
    }

    /// Ids of ACTIVE member nodes, ordered by id
    pub fn active_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.status.is_active())
            .map(|n| n.node_id.clone())
            .collect()
    }
}

/// A single change inside an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConfigChange {
    AddNode(NodeDescriptor),
    RemoveNode { node_id: NodeId },
    AssignShard { shard: ShardId, node_id: NodeId },
    UnassignShard { shard: ShardId },
    SetPolicy { key: String, value: String },
    RemovePolicy { key: String },
}

/// Ordered list of changes applied atomically to the current snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDelta {
    pub changes: Vec<ConfigChange>,
}

impl ConfigDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn add_node(mut self, descriptor: NodeDescriptor) -> Self {
        self.changes.push(ConfigChange::AddNode(descriptor));
        self
    }

    pub fn remove_node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.changes.push(ConfigChange::RemoveNode {
            node_id: node_id.into(),
        });
        self
    }

    pub fn assign_shard(mut self, shard: ShardId, node_id: impl Into<NodeId>) -> Self {
        self.changes.push(ConfigChange::AssignShard {
            shard,
            node_id: node_id.into(),
        });
        self
    }

    pub fn unassign_shard(mut self, shard: ShardId) -> Self {
        self.changes.push(ConfigChange::UnassignShard { shard });
        self
    }

    pub fn set_policy(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.changes.push(ConfigChange::SetPolicy {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn remove_policy(mut self, key: impl Into<String>) -> Self {
        self.changes.push(ConfigChange::RemovePolicy { key: key.into() });
        self
    }
}

/// Time-bounded liveness claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub expires_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(nodes: &[(&str, NodeStatus)], shards: &[(ShardId, &str)]) -> ClusterConfig {
        let mut config = ClusterConfig::initial(BTreeMap::new());
        for (id, status) in nodes {
            let mut node = NodeDescriptor::new(*id, format!("{}:11211", id), 1 << 30);
            node.status = *status;
            config.nodes.insert(id.to_string(), node);
        }
        for (shard, id) in shards {
            config.shard_map.insert(*shard, id.to_string());
        }
        config
    }

    #[test]
    fn test_initial_config() {
        let config = ClusterConfig::initial(BTreeMap::new());
        assert_eq!(config.version, 0);
        assert!(config.nodes.is_empty());
        assert!(config.shard_map.is_empty());
        assert!(config.validate_shard_map().is_ok());
    }

    #[test]
    fn test_validate_shard_map() {
        let config = config_with(
            &[("a", NodeStatus::Active), ("b", NodeStatus::Suspect)],
            &[(0, "a")],
        );
        assert!(config.validate_shard_map().is_ok());

        let config = config_with(&[("a", NodeStatus::Active)], &[(0, "a"), (1, "ghost")]);
        assert!(matches!(
            config.validate_shard_map(),
            Err(ConfigError::InvalidShardAssignment { shard: 1, .. })
        ));

        let config = config_with(&[("b", NodeStatus::Suspect)], &[(3, "b")]);
        assert!(matches!(
            config.validate_shard_map(),
            Err(ConfigError::InvalidShardAssignment { shard: 3, .. })
        ));
    }

    #[test]
    fn test_shards_of_and_active_nodes() {
        let config = config_with(
            &[
                ("c", NodeStatus::Active),
                ("a", NodeStatus::Active),
                ("b", NodeStatus::Dead),
            ],
            &[(2, "a"), (0, "a"), (1, "c")],
        );
        assert_eq!(config.shards_of("a"), vec![0, 2]);
        assert_eq!(config.active_nodes(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_delta_json_shape() {
        let delta = ConfigDelta::new()
            .assign_shard(4, "a")
            .set_policy("evict_opt", "lru");
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["changes"][0]["op"], "assign_shard");
        assert_eq!(json["changes"][0]["shard"], 4);
        assert_eq!(json["changes"][1]["key"], "evict_opt");
    }
}
