//! Deterministic shard placement
//!
//! Orphaned shards are handed out round-robin over candidate nodes ordered
//! by node id, so the same inputs always produce the same shard map.

use crate::common::{ClusterConfig, NodeId, ShardId};

/// Assign `orphans` (ascending) to `candidates` (ascending by id) round-robin.
/// Returns an empty plan when there are no candidates.
pub fn reassign_round_robin(orphans: &[ShardId], candidates: &[NodeId]) -> Vec<(ShardId, NodeId)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut orphans = orphans.to_vec();
    orphans.sort_unstable();
    orphans.dedup();

    let mut candidates = candidates.to_vec();
    candidates.sort();
    candidates.dedup();

    orphans
        .into_iter()
        .enumerate()
        .map(|(i, shard)| (shard, candidates[i % candidates.len()].clone()))
        .collect()
}

/// Plan for every shard in `0..num_shards` that `config` leaves unowned
pub fn fill_unassigned(
    config: &ClusterConfig,
    num_shards: u32,
    candidates: &[NodeId],
) -> Vec<(ShardId, NodeId)> {
    let unassigned: Vec<ShardId> = (0..num_shards)
        .filter(|shard| !config.shard_map.contains_key(shard))
        .collect();
    reassign_round_robin(&unassigned, candidates)
}
