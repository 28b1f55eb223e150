//! Node membership via leases
//!
//! Each registered node holds a lease renewed by heartbeats. Sweeps move
//! nodes `ACTIVE -> SUSPECT` when the lease expires and `SUSPECT -> DEAD`
//! once the grace period after expiry has passed as well. A heartbeat brings
//! a SUSPECT node back to ACTIVE. DEAD entries are dropped once a committed
//! configuration no longer lists them.
//!
//! Detection is decoupled from configuration changes: the tracker only
//! reports transitions, the distributor decides what to commit.

use crate::common::{ClusterConfig, Lease, MembershipError, NodeDescriptor, NodeId, NodeStatus};
use crate::coordinator::config_store::ConfigObserver;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lease timing
#[derive(Debug, Clone, Copy)]
pub struct MembershipConfig {
    pub lease_timeout: Duration,
    pub suspect_grace: Duration,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(10),
            suspect_grace: Duration::from_secs(20),
        }
    }
}

/// One row of the lease table
#[derive(Debug, Clone, Serialize)]
pub struct MemberEntry {
    pub descriptor: NodeDescriptor,
    pub lease: Lease,
    pub status: NodeStatus,
    pub status_since_ms: u64,
    pub registered_at_ms: u64,
}

pub struct MembershipTracker {
    config: MembershipConfig,
    members: DashMap<NodeId, MemberEntry>,
    last_sweep_ms: AtomicU64,
}

impl MembershipTracker {
    pub fn new(config: MembershipConfig) -> Self {
        Self {
            config,
            members: DashMap::new(),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    fn lease_ms(&self) -> u64 {
        self.config.lease_timeout.as_millis() as u64
    }

    fn grace_ms(&self) -> u64 {
        self.config.suspect_grace.as_millis() as u64
    }

    /// Register a node as ACTIVE with a fresh lease.
    ///
    /// A DEAD entry with the same id is replaced; a live one is a duplicate.
    pub fn register_node(
        &self,
        mut descriptor: NodeDescriptor,
        now_ms: u64,
    ) -> Result<Lease, MembershipError> {
        if descriptor.node_id.trim().is_empty() {
            return Err(MembershipError::InvalidDescriptor("node_id is empty".into()));
        }
        if descriptor.address.trim().is_empty() {
            return Err(MembershipError::InvalidDescriptor(format!(
                "node {} has no address",
                descriptor.node_id
            )));
        }

        descriptor.status = NodeStatus::Active;
        let lease = Lease {
            expires_at_ms: now_ms.saturating_add(self.lease_ms()),
        };
        let node_id = descriptor.node_id.clone();
        let entry = MemberEntry {
            descriptor,
            lease,
            status: NodeStatus::Active,
            status_since_ms: now_ms,
            registered_at_ms: now_ms,
        };

        match self.members.entry(node_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().status.is_live() {
                    return Err(MembershipError::DuplicateNode(node_id));
                }
                occupied.insert(entry);
                info!(node_id = %node_id, "Dead node re-registered");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                info!(node_id = %node_id, "Node registered");
            }
        }

        Ok(lease)
    }

    /// Renew a lease. Expiry never moves backwards.
    pub fn heartbeat(&self, node_id: &str, now_ms: u64) -> Result<Lease, MembershipError> {
        self.heartbeat_at(node_id, now_ms, now_ms)
    }

    /// Renew a lease from a heartbeat sent at `sent_ms`.
    ///
    /// A SUSPECT node only goes back to ACTIVE if the renewed lease is
    /// still valid at `now_ms`.
    pub fn heartbeat_at(
        &self,
        node_id: &str,
        sent_ms: u64,
        now_ms: u64,
    ) -> Result<Lease, MembershipError> {
        let mut entry = match self.members.get_mut(node_id) {
            Some(entry) if entry.status.is_live() => entry,
            _ => return Err(MembershipError::UnknownNode(node_id.to_string())),
        };

        let renewed = sent_ms.saturating_add(self.lease_ms());
        entry.lease.expires_at_ms = entry.lease.expires_at_ms.max(renewed);

        if entry.status == NodeStatus::Suspect && entry.lease.expires_at_ms > now_ms {
            entry.status = NodeStatus::Active;
            entry.status_since_ms = now_ms;
            info!(node_id = %node_id, "Suspect node recovered");
        }
        debug!(node_id = %node_id, expires_at_ms = entry.lease.expires_at_ms, "Heartbeat");

        Ok(entry.lease)
    }

    /// Apply lease expiry at `now_ms`; returns ids whose status changed.
    pub fn sweep_expired(&self, now_ms: u64) -> Result<BTreeSet<NodeId>, MembershipError> {
        let last_ms = self.last_sweep_ms.fetch_max(now_ms, Ordering::SeqCst);
        if now_ms < last_ms {
            return Err(MembershipError::ClockAnomaly { last_ms, now_ms });
        }

        let grace_ms = self.grace_ms();
        let mut changed = BTreeSet::new();

        for mut entry in self.members.iter_mut() {
            let expiry = entry.lease.expires_at_ms;
            let next = match entry.status {
                NodeStatus::Active | NodeStatus::Suspect
                    if now_ms > expiry.saturating_add(grace_ms) =>
                {
                    NodeStatus::Dead
                }
                NodeStatus::Active if now_ms > expiry => NodeStatus::Suspect,
                _ => continue,
            };

            warn!(
                node_id = %entry.key(),
                from = %entry.status,
                to = %next,
                expired_at_ms = expiry,
                "Lease expired"
            );
            entry.status = next;
            entry.status_since_ms = now_ms;
            changed.insert(entry.key().clone());
        }

        Ok(changed)
    }

    /// Graceful leave: the node is DEAD immediately
    pub fn deregister(&self, node_id: &str, now_ms: u64) -> Result<(), MembershipError> {
        let mut entry = self
            .members
            .get_mut(node_id)
            .ok_or_else(|| MembershipError::UnknownNode(node_id.to_string()))?;
        if entry.status != NodeStatus::Dead {
            entry.status = NodeStatus::Dead;
            entry.status_since_ms = now_ms;
            info!(node_id = %node_id, "Node deregistered");
        }
        Ok(())
    }

    /// Drop DEAD entries that `config` no longer lists
    pub fn forget_dead_unlisted(&self, config: &ClusterConfig) {
        self.members.retain(|node_id, entry| {
            let forget = entry.status == NodeStatus::Dead && !config.nodes.contains_key(node_id);
            if forget {
                info!(node_id = %node_id, version = config.version, "Removed dead node");
            }
            !forget
        });
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.members.get(node_id).map(|e| e.status)
    }

    pub fn is_active(&self, node_id: &str) -> bool {
        self.status(node_id).map(|s| s.is_active()).unwrap_or(false)
    }

    /// Descriptor the node registered with
    pub fn descriptor(&self, node_id: &str) -> Option<NodeDescriptor> {
        self.members.get(node_id).map(|e| e.descriptor.clone())
    }

    pub fn dead_nodes(&self) -> BTreeSet<NodeId> {
        self.members
            .iter()
            .filter(|e| e.status == NodeStatus::Dead)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Snapshot of the lease table, ordered by node id
    pub fn members(&self) -> Vec<MemberEntry> {
        let mut members: Vec<MemberEntry> = self.members.iter().map(|e| e.value().clone()).collect();
        members.sort_by(|a, b| a.descriptor.node_id.cmp(&b.descriptor.node_id));
        members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl ConfigObserver for MembershipTracker {
    fn on_commit(&self, config: &ClusterConfig) {
        self.forget_dead_unlisted(config);
    }
}
