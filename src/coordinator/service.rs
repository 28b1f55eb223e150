//! Request-level coordinator API
//!
//! Both transports (gRPC and the HTTP admin API) translate their messages
//! into a [`Request`] and get back a [`Response`] tagged with the kind of
//! request that produced it.

use crate::common::{
    Clock, ClusterConfig, ConfigDelta, CoordinatorConfig, CoordinatorMetrics, Lease,
    NodeDescriptor, NodeId, Result,
};
use crate::coordinator::config_store::ConfigStore;
use crate::coordinator::distributor::{ConfigDistributor, VersionCheck};
use crate::coordinator::membership::MembershipTracker;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum Request {
    ReadConfig,
    UpdateConfig { delta: ConfigDelta },
    RegisterNode { descriptor: NodeDescriptor },
    /// `timestamp_ms == 0` means "now" on the coordinator clock
    Heartbeat { node_id: NodeId, timestamp_ms: u64 },
    DeregisterNode { node_id: NodeId },
    Rebalance,
    CheckVersion { version: u64 },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::ReadConfig => RequestKind::ReadConfig,
            Request::UpdateConfig { .. } => RequestKind::UpdateConfig,
            Request::RegisterNode { .. } => RequestKind::RegisterNode,
            Request::Heartbeat { .. } => RequestKind::Heartbeat,
            Request::DeregisterNode { .. } => RequestKind::DeregisterNode,
            Request::Rebalance => RequestKind::Rebalance,
            Request::CheckVersion { .. } => RequestKind::CheckVersion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    ReadConfig,
    UpdateConfig,
    RegisterNode,
    Heartbeat,
    DeregisterNode,
    Rebalance,
    CheckVersion,
    WatchConfig,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::ReadConfig => "read_config",
            RequestKind::UpdateConfig => "update_config",
            RequestKind::RegisterNode => "register_node",
            RequestKind::Heartbeat => "heartbeat",
            RequestKind::DeregisterNode => "deregister_node",
            RequestKind::Rebalance => "rebalance",
            RequestKind::CheckVersion => "check_version",
            RequestKind::WatchConfig => "watch_config",
        }
    }
}

/// Lease handed back on registration and heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseGrant {
    pub node_id: NodeId,
    pub expires_at_ms: u64,
    /// Current configuration version, so nodes notice changes on heartbeat
    pub config_version: u64,
}

#[derive(Debug, Clone)]
pub enum Reply {
    Config(Arc<ClusterConfig>),
    Lease(LeaseGrant),
    Removed { node_id: NodeId },
    Version(VersionCheck),
}

#[derive(Debug)]
pub struct Response {
    pub kind: RequestKind,
    pub result: Result<Reply>,
}

#[derive(Clone)]
pub struct CoordinatorService {
    store: Arc<ConfigStore>,
    membership: Arc<MembershipTracker>,
    distributor: Arc<ConfigDistributor>,
    metrics: Arc<CoordinatorMetrics>,
    clock: Arc<dyn Clock>,
    num_shards: u32,
    watch_timeout: Duration,
}

impl CoordinatorService {
    pub fn new(
        store: Arc<ConfigStore>,
        membership: Arc<MembershipTracker>,
        distributor: Arc<ConfigDistributor>,
        metrics: Arc<CoordinatorMetrics>,
        clock: Arc<dyn Clock>,
        settings: &CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            membership,
            distributor,
            metrics,
            clock,
            num_shards: settings.num_shards,
            watch_timeout: settings.watch_timeout(),
        }
    }

    pub fn handle(&self, request: Request) -> Response {
        let kind = request.kind();
        let start = Instant::now();

        let result = self.dispatch(request);

        self.metrics
            .record_request(kind.as_str(), start.elapsed(), result.is_ok());
        if let Err(e) = &result {
            debug!(kind = kind.as_str(), error = %e, "Request failed");
        }
        Response { kind, result }
    }

    /// Response for a request the transport could not decode
    pub fn reject(&self, kind: RequestKind, error: crate::Error) -> Response {
        self.metrics
            .record_request(kind.as_str(), Duration::ZERO, false);
        debug!(kind = kind.as_str(), error = %error, "Request rejected");
        Response {
            kind,
            result: Err(error),
        }
    }

    fn dispatch(&self, request: Request) -> Result<Reply> {
        match request {
            Request::ReadConfig => Ok(Reply::Config(self.distributor.read_config())),
            Request::UpdateConfig { delta } => {
                Ok(Reply::Config(self.distributor.propose_update(&delta)?))
            }
            Request::RegisterNode { descriptor } => {
                let node_id = descriptor.node_id.clone();
                let lease = self
                    .membership
                    .register_node(descriptor, self.clock.now_millis())?;
                self.metrics
                    .registered_nodes
                    .set(self.membership.len() as u64);
                Ok(Reply::Lease(self.grant(node_id, lease)))
            }
            Request::Heartbeat {
                node_id,
                timestamp_ms,
            } => {
                let now = self.clock.now_millis();
                let sent = heartbeat_time(timestamp_ms, now);
                let lease = self.membership.heartbeat_at(&node_id, sent, now)?;
                self.metrics.heartbeats_total.inc();
                Ok(Reply::Lease(self.grant(node_id, lease)))
            }
            Request::DeregisterNode { node_id } => {
                self.membership
                    .deregister(&node_id, self.clock.now_millis())?;
                Ok(Reply::Removed { node_id })
            }
            Request::Rebalance => {
                let config = match self.distributor.rebalance(self.num_shards)? {
                    Some(committed) => committed,
                    None => self.distributor.read_config(),
                };
                Ok(Reply::Config(config))
            }
            Request::CheckVersion { version } => {
                Ok(Reply::Version(self.distributor.check_version(version)?))
            }
        }
    }

    fn grant(&self, node_id: NodeId, lease: Lease) -> LeaseGrant {
        LeaseGrant {
            node_id,
            expires_at_ms: lease.expires_at_ms,
            config_version: self.store.current_version(),
        }
    }

    /// Long-poll for a version newer than `known_version`.
    ///
    /// `timeout` of zero, or above the configured bound, uses the bound.
    pub async fn watch_config(&self, known_version: u64, timeout: Duration) -> Response {
        let start = Instant::now();
        let timeout = if timeout.is_zero() {
            self.watch_timeout
        } else {
            timeout.min(self.watch_timeout)
        };

        let config = self.distributor.wait_for_version(known_version, timeout).await;

        let kind = RequestKind::WatchConfig;
        self.metrics.record_request(kind.as_str(), start.elapsed(), true);
        Response {
            kind,
            result: Ok(Reply::Config(config)),
        }
    }

    /// Run one sweep/reconcile cycle at the coordinator's current time
    pub fn reconcile_now(&self) -> Result<Option<Arc<ClusterConfig>>> {
        self.distributor.reconcile(self.clock.now_millis())
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn membership(&self) -> &Arc<MembershipTracker> {
        &self.membership
    }

    pub fn distributor(&self) -> &Arc<ConfigDistributor> {
        &self.distributor
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Clamp a client timestamp to the coordinator clock so a lease can't be
/// pushed into the future
fn heartbeat_time(timestamp_ms: u64, now_ms: u64) -> u64 {
    if timestamp_ms == 0 {
        now_ms
    } else {
        timestamp_ms.min(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ManualClock, NodeStatus};
    use crate::coordinator::membership::MembershipConfig;
    use crate::proto::ErrorCode;
    use std::collections::BTreeMap;

    const START: u64 = 1_000_000;

    fn service() -> (CoordinatorService, Arc<ManualClock>) {
        let settings = CoordinatorConfig {
            lease_timeout_ms: 1_000,
            suspect_grace_ms: 1_000,
            num_shards: 4,
            watch_timeout_ms: 50,
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(ConfigStore::new(ClusterConfig::initial(BTreeMap::new()), 8));
        let membership = Arc::new(MembershipTracker::new(MembershipConfig {
            lease_timeout: settings.lease_timeout(),
            suspect_grace: settings.suspect_grace(),
        }));
        store.add_observer(membership.clone());
        let metrics = Arc::new(CoordinatorMetrics::new());
        let distributor = Arc::new(ConfigDistributor::new(
            store.clone(),
            membership.clone(),
            metrics.clone(),
        ));
        let service = CoordinatorService::new(
            store,
            membership,
            distributor,
            metrics,
            clock.clone(),
            &settings,
        );
        (service, clock)
    }

    fn register(service: &CoordinatorService, id: &str) -> LeaseGrant {
        let response = service.handle(Request::RegisterNode {
            descriptor: NodeDescriptor::new(id, format!("{}:11211", id), 1 << 30),
        });
        match response.result {
            Ok(Reply::Lease(grant)) => grant,
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_response_carries_request_kind() {
        let (service, _) = service();
        let response = service.handle(Request::ReadConfig);
        assert_eq!(response.kind, RequestKind::ReadConfig);
        assert!(matches!(response.result, Ok(Reply::Config(c)) if c.version == 0));

        let response = service.handle(Request::Heartbeat {
            node_id: "ghost".into(),
            timestamp_ms: 0,
        });
        assert_eq!(response.kind, RequestKind::Heartbeat);
        let err = response.result.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownNode);
    }

    #[test]
    fn test_register_then_join_config() {
        let (service, _) = service();
        let grant = register(&service, "a");
        assert_eq!(grant.expires_at_ms, START + 1_000);
        assert_eq!(grant.config_version, 0);

        let delta = ConfigDelta::new()
            .add_node(NodeDescriptor::new("a", "", 0))
            .assign_shard(0, "a");
        let response = service.handle(Request::UpdateConfig { delta });
        let config = match response.result {
            Ok(Reply::Config(config)) => config,
            other => panic!("unexpected reply: {:?}", other),
        };
        assert_eq!(config.version, 1);
        // Address and capacity come from the registration.
        assert_eq!(config.nodes["a"].address, "a:11211");
        assert_eq!(config.nodes["a"].capacity, 1 << 30);

        let duplicate = service.handle(Request::RegisterNode {
            descriptor: NodeDescriptor::new("a", "a:11211", 0),
        });
        assert_eq!(duplicate.result.unwrap_err().code(), ErrorCode::DuplicateNode);
    }

    #[test]
    fn test_heartbeat_timestamp_clamped() {
        let (service, clock) = service();
        register(&service, "a");
        clock.advance(Duration::from_millis(500));

        // A timestamp from the future counts as "now".
        let response = service.handle(Request::Heartbeat {
            node_id: "a".into(),
            timestamp_ms: START + 60_000,
        });
        match response.result {
            Ok(Reply::Lease(grant)) => assert_eq!(grant.expires_at_ms, START + 500 + 1_000),
            other => panic!("unexpected reply: {:?}", other),
        }

        // A late timestamp can't shorten the lease.
        let response = service.handle(Request::Heartbeat {
            node_id: "a".into(),
            timestamp_ms: START + 10,
        });
        match response.result {
            Ok(Reply::Lease(grant)) => assert_eq!(grant.expires_at_ms, START + 1_500),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(service.metrics().heartbeats_total.get(), 2);
    }

    #[test]
    fn test_stale_heartbeat_keeps_suspect_node_out_of_placement() {
        let (service, clock) = service();
        register(&service, "a");
        clock.advance(Duration::from_millis(1_500));
        service.reconcile_now().unwrap();
        assert_eq!(service.membership().status("a"), Some(NodeStatus::Suspect));

        let response = service.handle(Request::Heartbeat {
            node_id: "a".into(),
            timestamp_ms: 5,
        });
        match response.result {
            Ok(Reply::Lease(grant)) => assert_eq!(grant.expires_at_ms, START + 1_000),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(service.membership().status("a"), Some(NodeStatus::Suspect));

        let response = service.handle(Request::UpdateConfig {
            delta: ConfigDelta::new()
                .add_node(NodeDescriptor::new("a", "", 0))
                .assign_shard(0, "a"),
        });
        assert_eq!(
            response.result.unwrap_err().code(),
            ErrorCode::InvalidShardAssignment
        );
        assert_eq!(service.distributor().read_config().version, 0);

        // A current heartbeat brings it back.
        service.handle(Request::Heartbeat {
            node_id: "a".into(),
            timestamp_ms: 0,
        });
        assert_eq!(service.membership().status("a"), Some(NodeStatus::Active));
    }

    #[test]
    fn test_malformed_register_is_invalid_request() {
        let (service, _) = service();
        let response = service.handle(Request::RegisterNode {
            descriptor: NodeDescriptor::new("", "", 0),
        });
        assert_eq!(response.result.unwrap_err().code(), ErrorCode::InvalidRequest);
        assert_eq!(service.metrics().request("register_node").errors.get(), 1);
    }

    #[test]
    fn test_deregister_and_reconcile() {
        let (service, clock) = service();
        register(&service, "a");
        register(&service, "b");
        service.handle(Request::UpdateConfig {
            delta: ConfigDelta::new()
                .add_node(NodeDescriptor::new("a", "", 0))
                .add_node(NodeDescriptor::new("b", "", 0))
                .assign_shard(0, "a")
                .assign_shard(1, "b"),
        });

        let response = service.handle(Request::DeregisterNode {
            node_id: "a".into(),
        });
        assert!(matches!(response.result, Ok(Reply::Removed { ref node_id }) if node_id == "a"));
        assert_eq!(service.membership().status("a"), Some(NodeStatus::Dead));

        clock.advance(Duration::from_millis(10));
        let committed = service.reconcile_now().unwrap().expect("commit expected");
        assert_eq!(committed.version, 2);
        assert_eq!(committed.shard_map.get(&0).map(String::as_str), Some("b"));
        assert!(!committed.nodes.contains_key("a"));
    }

    #[test]
    fn test_rebalance_uses_configured_shard_count() {
        let (service, _) = service();
        register(&service, "a");
        service.handle(Request::UpdateConfig {
            delta: ConfigDelta::new().add_node(NodeDescriptor::new("a", "", 0)),
        });

        match service.handle(Request::Rebalance).result {
            Ok(Reply::Config(config)) => assert_eq!(config.shard_map.len(), 4),
            other => panic!("unexpected reply: {:?}", other),
        }
        // Nothing left to place: same snapshot comes back.
        match service.handle(Request::Rebalance).result {
            Ok(Reply::Config(config)) => assert_eq!(config.version, 2),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_check_version() {
        let (service, _) = service();
        match service.handle(Request::CheckVersion { version: 0 }).result {
            Ok(Reply::Version(check)) => {
                assert_eq!(check.current, 0);
                assert!(!check.stale);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        let response = service.handle(Request::CheckVersion { version: 3 });
        assert_eq!(response.result.unwrap_err().code(), ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_watch_config_times_out_with_current() {
        let (service, _) = service();
        let response = service
            .watch_config(0, Duration::from_secs(60))
            .await;
        assert_eq!(response.kind, RequestKind::WatchConfig);
        assert!(matches!(response.result, Ok(Reply::Config(c)) if c.version == 0));
    }
}
