//! Configuration reads, validated updates and membership reconciliation
//!
//! Updates use optimistic concurrency: a delta is applied to the snapshot
//! that was current when the update started and committed as `version + 1`.
//! On a version conflict the delta is re-applied once to the newer snapshot;
//! if that also fails the caller gets `Contended`.

use crate::common::{
    ClusterConfig, ConfigChange, ConfigDelta, ConfigError, CoordinatorMetrics, NodeId, Result,
    ShardId,
};
use crate::coordinator::config_store::ConfigStore;
use crate::coordinator::membership::MembershipTracker;
use crate::coordinator::placement::{fill_unassigned, reassign_round_robin};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of validating a configuration number held by a cache node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionCheck {
    pub current: u64,
    pub stale: bool,
    /// Whether the checked version is still in the store's history
    pub retained: bool,
}

pub struct ConfigDistributor {
    store: Arc<ConfigStore>,
    membership: Arc<MembershipTracker>,
    metrics: Arc<CoordinatorMetrics>,
}

impl ConfigDistributor {
    pub fn new(
        store: Arc<ConfigStore>,
        membership: Arc<MembershipTracker>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        Self {
            store,
            membership,
            metrics,
        }
    }

    /// Latest committed snapshot. Always succeeds, no side effects.
    pub fn read_config(&self) -> Arc<ClusterConfig> {
        self.store.current_config()
    }

    /// Apply `delta` to `base`, producing the candidate for `base.version + 1`
    pub fn build_candidate(
        &self,
        base: &ClusterConfig,
        delta: &ConfigDelta,
    ) -> std::result::Result<ClusterConfig, ConfigError> {
        let mut next = base.next_candidate();

        for change in &delta.changes {
            match change {
                ConfigChange::AddNode(requested) => {
                    let node_id = &requested.node_id;
                    let mut descriptor = self
                        .membership
                        .descriptor(node_id)
                        .ok_or_else(|| ConfigError::UnknownNode(node_id.clone()))?;
                    if !self.membership.is_active(node_id) {
                        return Err(ConfigError::InactiveNode(node_id.clone()));
                    }
                    if !requested.address.is_empty() {
                        descriptor.address = requested.address.clone();
                    }
                    if requested.capacity > 0 {
                        descriptor.capacity = requested.capacity;
                    }
                    next.nodes.insert(node_id.clone(), descriptor);
                }
                ConfigChange::RemoveNode { node_id } => {
                    if next.nodes.remove(node_id).is_none() {
                        return Err(ConfigError::UnknownNode(node_id.clone()));
                    }
                }
                ConfigChange::AssignShard { shard, node_id } => {
                    if !next.nodes.contains_key(node_id) {
                        return Err(ConfigError::InvalidShardAssignment {
                            shard: *shard,
                            node: node_id.clone(),
                            reason: "node is not a member".into(),
                        });
                    }
                    if !self.membership.is_active(node_id) {
                        return Err(ConfigError::InvalidShardAssignment {
                            shard: *shard,
                            node: node_id.clone(),
                            reason: "node is not active".into(),
                        });
                    }
                    next.shard_map.insert(*shard, node_id.clone());
                }
                ConfigChange::UnassignShard { shard } => {
                    next.shard_map.remove(shard);
                }
                ConfigChange::SetPolicy { key, value } => {
                    next.policy.insert(key.clone(), value.clone());
                }
                ConfigChange::RemovePolicy { key } => {
                    next.policy.remove(key);
                }
            }
        }

        next.validate_shard_map()?;
        Ok(next)
    }

    /// Validate and commit `delta`, retrying once on a version conflict
    pub fn propose_update(
        &self,
        delta: &ConfigDelta,
    ) -> std::result::Result<Arc<ClusterConfig>, ConfigError> {
        self.propose_from(self.store.current_config(), delta)
    }

    fn propose_from(
        &self,
        base: Arc<ClusterConfig>,
        delta: &ConfigDelta,
    ) -> std::result::Result<Arc<ClusterConfig>, ConfigError> {
        if delta.is_empty() {
            return Err(ConfigError::EmptyDelta);
        }

        let candidate = self.build_candidate(&base, delta)?;
        let conflict = match self.store.commit(candidate) {
            Ok(committed) => return Ok(self.committed(committed)),
            Err(e @ ConfigError::VersionConflict { .. }) => e,
            Err(e) => return Err(e),
        };

        self.metrics.commit_conflicts_total.inc();
        debug!(base = base.version, error = %conflict, "Retrying update on newer config");

        let latest = self.store.current_config();
        let retried = self
            .build_candidate(&latest, delta)
            .and_then(|candidate| self.store.commit(candidate));

        match retried {
            Ok(committed) => Ok(self.committed(committed)),
            Err(e) => {
                if matches!(e, ConfigError::VersionConflict { .. }) {
                    self.metrics.commit_conflicts_total.inc();
                }
                self.metrics.contended_total.inc();
                warn!(version = latest.version, error = %e, "Update contended");
                Err(ConfigError::Contended(latest.version))
            }
        }
    }

    fn committed(&self, config: Arc<ClusterConfig>) -> Arc<ClusterConfig> {
        self.metrics.commits_total.inc();
        self.metrics.config_version.set(config.version);
        self.metrics.config_nodes.set(config.nodes.len() as u64);
        self.metrics.assigned_shards.set(config.shard_map.len() as u64);
        config
    }

    /// Sweep leases and fold DEAD nodes out of the configuration.
    ///
    /// Returns the committed snapshot, or `None` if nothing had to change.
    pub fn reconcile(&self, now_ms: u64) -> Result<Option<Arc<ClusterConfig>>> {
        let changed = self.membership.sweep_expired(now_ms)?;
        self.metrics.sweep_transitions_total.add(changed.len() as u64);

        let current = self.store.current_config();
        let dead = self.membership.dead_nodes();
        let delta = self.removal_delta(&current, &dead);

        if delta.is_empty() {
            // Dead nodes that never made it into a config need no commit.
            self.membership.forget_dead_unlisted(&current);
            self.metrics.registered_nodes.set(self.membership.len() as u64);
            return Ok(None);
        }

        let committed = self.propose_update(&delta)?;
        self.metrics.reconcile_commits_total.inc();
        self.metrics.registered_nodes.set(self.membership.len() as u64);
        info!(
            version = committed.version,
            removed = ?dead.iter().filter(|id| current.nodes.contains_key(*id)).collect::<Vec<_>>(),
            "Reconciled dead nodes"
        );
        Ok(Some(committed))
    }

    /// Delta removing every DEAD member and handing its shards to the
    /// remaining ACTIVE members, round-robin by node id
    fn removal_delta(&self, current: &ClusterConfig, dead: &BTreeSet<NodeId>) -> ConfigDelta {
        let removed: BTreeSet<&NodeId> = current
            .nodes
            .keys()
            .filter(|id| dead.contains(*id))
            .collect();
        if removed.is_empty() {
            return ConfigDelta::new();
        }

        let orphans: Vec<ShardId> = current
            .shard_map
            .iter()
            .filter(|(_, owner)| removed.contains(owner))
            .map(|(shard, _)| *shard)
            .collect();
        let candidates: Vec<NodeId> = current
            .active_nodes()
            .into_iter()
            .filter(|id| !removed.contains(id) && self.membership.is_active(id))
            .collect();

        let mut delta = ConfigDelta::new();
        let plan = reassign_round_robin(&orphans, &candidates);
        if plan.is_empty() && !orphans.is_empty() {
            warn!(shards = ?orphans, "No active node left, leaving shards unassigned");
            for shard in orphans {
                delta = delta.unassign_shard(shard);
            }
        } else {
            for (shard, node_id) in plan {
                delta = delta.assign_shard(shard, node_id);
            }
        }
        for node_id in removed {
            delta = delta.remove_node(node_id.clone());
        }
        delta
    }

    /// Give every unowned shard in `0..num_shards` to an ACTIVE member
    pub fn rebalance(
        &self,
        num_shards: u32,
    ) -> std::result::Result<Option<Arc<ClusterConfig>>, ConfigError> {
        let current = self.store.current_config();
        let candidates: Vec<NodeId> = current
            .active_nodes()
            .into_iter()
            .filter(|id| self.membership.is_active(id))
            .collect();

        let plan = fill_unassigned(&current, num_shards, &candidates);
        if plan.is_empty() {
            return Ok(None);
        }

        let delta = plan
            .into_iter()
            .fold(ConfigDelta::new(), |delta, (shard, node_id)| {
                delta.assign_shard(shard, node_id)
            });
        self.propose_update(&delta).map(Some)
    }

    /// Wait until a version newer than `known` is committed, or `timeout`
    /// elapses; either way the latest snapshot is returned.
    pub async fn wait_for_version(&self, known: u64, timeout: Duration) -> Arc<ClusterConfig> {
        let mut rx = self.store.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|c| c.version > known)).await;
        match waited {
            Ok(Ok(config)) => config.clone(),
            _ => self.read_config(),
        }
    }

    /// Compare a node's configuration number with the current one
    pub fn check_version(&self, version: u64) -> Result<VersionCheck> {
        let current = self.store.current_version();
        if version > current {
            return Err(crate::Error::InvalidRequest(format!(
                "version {} has not been committed (current {})",
                version, current
            )));
        }
        Ok(VersionCheck {
            current,
            stale: version < current,
            retained: self.store.config_at(version).is_some(),
        })
    }
}
