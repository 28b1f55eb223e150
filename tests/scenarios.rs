//! End-to-end coordinator scenarios driven through the service layer

use nvcache_coord::common::{
    ConfigDelta, ConfigError, CoordinatorConfig, ManualClock, NodeDescriptor, NodeStatus,
};
use nvcache_coord::coordinator::{CoordinatorService, Reply, Request};
use nvcache_coord::{Coordinator, Error};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const LEASE_MS: u64 = 1_000;
const GRACE_MS: u64 = 2_000;

fn coordinator() -> (Coordinator, Arc<ManualClock>) {
    let settings = CoordinatorConfig {
        lease_timeout_ms: LEASE_MS,
        suspect_grace_ms: GRACE_MS,
        num_shards: 6,
        ..Default::default()
    };
    let clock = Arc::new(ManualClock::new(10_000));
    let coordinator = Coordinator::with_clock(settings, "coord-test".into(), clock.clone());
    (coordinator, clock)
}

fn register(service: &CoordinatorService, id: &str) {
    service
        .handle(Request::RegisterNode {
            descriptor: NodeDescriptor::new(id, format!("{}.cache:11211", id), 1 << 34),
        })
        .result
        .unwrap();
}

fn heartbeat(service: &CoordinatorService, id: &str) {
    service
        .handle(Request::Heartbeat {
            node_id: id.to_string(),
            timestamp_ms: 0,
        })
        .result
        .unwrap();
}

fn update(service: &CoordinatorService, delta: ConfigDelta) -> nvcache_coord::Result<Reply> {
    service.handle(Request::UpdateConfig { delta }).result
}

fn current(service: &CoordinatorService) -> Arc<nvcache_coord::common::ClusterConfig> {
    service.distributor().read_config()
}

#[test]
fn test_dead_node_shards_move_to_survivor() {
    let (coordinator, clock) = coordinator();
    let service = coordinator.service();

    let mut delta = ConfigDelta::new();
    for (shard, id) in ["A", "B", "C"].into_iter().enumerate() {
        register(service, id);
        delta = delta
            .add_node(NodeDescriptor::new(id, "", 0))
            .assign_shard(shard as u32, id);
    }
    update(service, delta).unwrap();
    assert_eq!(current(service).version, 1);

    // A stops heartbeating; B and C keep their leases fresh.
    for _ in 0..4 {
        clock.advance(Duration::from_millis(LEASE_MS));
        heartbeat(service, "B");
        heartbeat(service, "C");
        service.reconcile_now().unwrap();
    }

    let config = current(service);
    assert_eq!(config.version, 2);
    assert!(!config.nodes.contains_key("A"));
    assert_eq!(config.shard_map.get(&0).map(String::as_str), Some("B"));
    assert_eq!(config.shard_map.get(&1).map(String::as_str), Some("B"));
    assert_eq!(config.shard_map.get(&2).map(String::as_str), Some("C"));
    assert_eq!(service.membership().status("A"), None);
}

#[test]
fn test_suspect_node_recovers_without_config_change() {
    let (coordinator, clock) = coordinator();
    let service = coordinator.service();
    register(service, "A");
    update(
        service,
        ConfigDelta::new()
            .add_node(NodeDescriptor::new("A", "", 0))
            .assign_shard(0, "A"),
    )
    .unwrap();

    clock.advance(Duration::from_millis(LEASE_MS + 1));
    assert!(service.reconcile_now().unwrap().is_none());
    assert_eq!(service.membership().status("A"), Some(NodeStatus::Suspect));

    heartbeat(service, "A");
    assert_eq!(service.membership().status("A"), Some(NodeStatus::Active));

    clock.advance(Duration::from_millis(GRACE_MS));
    assert!(service.reconcile_now().unwrap().is_none());
    assert_eq!(current(service).version, 1);
}

#[test]
fn test_heartbeat_is_idempotent() {
    let (coordinator, clock) = coordinator();
    let service = coordinator.service();
    register(service, "A");
    clock.advance(Duration::from_millis(300));

    let lease = |service: &CoordinatorService| match service
        .handle(Request::Heartbeat {
            node_id: "A".into(),
            timestamp_ms: 0,
        })
        .result
    {
        Ok(Reply::Lease(grant)) => grant.expires_at_ms,
        other => panic!("unexpected reply: {:?}", other),
    };
    let first = lease(service);
    let second = lease(service);
    assert_eq!(first, second);
    assert_eq!(service.membership().status("A"), Some(NodeStatus::Active));
}

#[test]
fn test_clock_anomaly_skips_cycle() {
    let (coordinator, clock) = coordinator();
    let service = coordinator.service();
    service.reconcile_now().unwrap();

    clock.set(5_000);
    let err = service.reconcile_now().unwrap_err();
    assert!(matches!(err, Error::Membership(_)));

    clock.set(20_000);
    assert!(service.reconcile_now().is_ok());
}

#[test]
fn test_concurrent_updates_commit_without_gaps() {
    let (coordinator, _) = coordinator();
    let service = coordinator.service().clone();
    let ids: Vec<String> = (0..8).map(|i| format!("n{}", i)).collect();
    for id in &ids {
        register(&service, id);
    }

    let results: Vec<(String, nvcache_coord::Result<Reply>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(shard, id)| {
                let service = service.clone();
                scope.spawn(move || {
                    let delta = ConfigDelta::new()
                        .add_node(NodeDescriptor::new(id.clone(), "", 0))
                        .assign_shard(shard as u32, id.clone());
                    (id.clone(), update(&service, delta))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut versions = BTreeSet::new();
    let mut joined = BTreeSet::new();
    for (id, result) in results {
        match result {
            Ok(Reply::Config(config)) => {
                assert!(config.validate_shard_map().is_ok());
                assert!(versions.insert(config.version), "version committed twice");
                joined.insert(id);
            }
            Err(Error::Config(ConfigError::Contended(_))) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    let config = current(&service);
    assert_eq!(config.version, joined.len() as u64);
    assert_eq!(versions, (1..=config.version).collect::<BTreeSet<_>>());
    assert_eq!(config.nodes.keys().cloned().collect::<BTreeSet<_>>(), joined);
}

#[test]
fn test_readers_see_whole_snapshots_during_updates() {
    let (coordinator, _) = coordinator();
    let service = coordinator.service().clone();
    for i in 0..20 {
        register(&service, &format!("n{:02}", i));
    }

    std::thread::scope(|scope| {
        let writer = service.clone();
        scope.spawn(move || {
            for i in 0..20u32 {
                let id = format!("n{:02}", i);
                update(
                    &writer,
                    ConfigDelta::new()
                        .add_node(NodeDescriptor::new(id.clone(), "", 0))
                        .assign_shard(i, id),
                )
                .unwrap();
            }
        });

        for _ in 0..3 {
            let reader = service.clone();
            scope.spawn(move || {
                let mut last = 0;
                for _ in 0..1_000 {
                    let config = current(&reader);
                    assert!(config.version >= last);
                    assert_eq!(config.nodes.len() as u64, config.version);
                    assert_eq!(config.shard_map.len() as u64, config.version);
                    assert!(config.validate_shard_map().is_ok());
                    last = config.version;
                }
            });
        }
    });

    assert_eq!(current(&service).version, 20);
}

#[test]
fn test_graceful_leave_then_rejoin() {
    let (coordinator, clock) = coordinator();
    let service = coordinator.service();
    register(service, "A");
    register(service, "B");
    update(
        service,
        ConfigDelta::new()
            .add_node(NodeDescriptor::new("A", "", 0))
            .add_node(NodeDescriptor::new("B", "", 0))
            .assign_shard(0, "A")
            .assign_shard(1, "B"),
    )
    .unwrap();

    service
        .handle(Request::DeregisterNode {
            node_id: "A".into(),
        })
        .result
        .unwrap();
    clock.advance(Duration::from_millis(10));
    let config = service.reconcile_now().unwrap().expect("commit expected");
    assert_eq!(config.shards_of("B"), vec![0, 1]);

    // A comes back under the same id and is placed by rebalance.
    register(service, "A");
    update(service, ConfigDelta::new().add_node(NodeDescriptor::new("A", "", 0))).unwrap();
    let config = match service.handle(Request::Rebalance).result {
        Ok(Reply::Config(config)) => config,
        other => panic!("unexpected reply: {:?}", other),
    };
    assert_eq!(config.shard_map.len(), 6);
    assert_eq!(config.shards_of("A"), vec![2, 4]);
    assert_eq!(config.shards_of("B"), vec![0, 1, 3, 5]);
}
