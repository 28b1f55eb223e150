//! Configuration for the coordinator
//!
//! Loaded from an optional TOML file, then overridden by `NVCACHE__*`
//! environment variables (e.g. `NVCACHE__COORDINATOR__LEASE_TIMEOUT_MS=5000`).

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator instance id (used in logs and status output)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "coord-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            coordinator: CoordinatorConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from `path` (if it exists) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("NVCACHE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.coordinator.validate()?;
        Ok(config)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the gRPC API
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,

    /// Bind address for the HTTP admin API
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Lease length granted by registration and heartbeats
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_ms: u64,

    /// Extra time a SUSPECT node gets before it is declared DEAD
    #[serde(default = "default_suspect_grace")]
    pub suspect_grace_ms: u64,

    /// Sweep/reconcile period; 0 means half the lease timeout
    #[serde(default)]
    pub reconcile_interval_ms: u64,

    /// Committed snapshots retained for version checks
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Shard count used by rebalance
    #[serde(default = "default_num_shards")]
    pub num_shards: u32,

    /// Upper bound for WatchConfig long-polls
    #[serde(default = "default_watch_timeout")]
    pub watch_timeout_ms: u64,

    /// Cache policy parameters seeded into version 0
    #[serde(default = "default_policy")]
    pub policy: BTreeMap<String, String>,
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7001))
}
fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7000))
}
fn default_lease_timeout() -> u64 {
    10_000
}
fn default_suspect_grace() -> u64 {
    20_000
}
fn default_history_limit() -> usize {
    64
}
fn default_num_shards() -> u32 {
    64
}
fn default_watch_timeout() -> u64 {
    30_000
}

/// Cache server settings distributed with every configuration
pub fn default_policy() -> BTreeMap<String, String> {
    [
        ("evict_opt", "lru"),
        ("slab_size", "1048576"),
        ("lease_token_expiry_ms", "10000"),
        ("use_cas", "true"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            http_addr: default_http_addr(),
            lease_timeout_ms: default_lease_timeout(),
            suspect_grace_ms: default_suspect_grace(),
            reconcile_interval_ms: 0,
            history_limit: default_history_limit(),
            num_shards: default_num_shards(),
            watch_timeout_ms: default_watch_timeout(),
            policy: default_policy(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lease_timeout_ms == 0 {
            return Err(Error::InvalidConfig("lease_timeout_ms must be > 0".into()));
        }
        if self.num_shards == 0 {
            return Err(Error::InvalidConfig("num_shards must be > 0".into()));
        }
        if self.history_limit == 0 {
            return Err(Error::InvalidConfig("history_limit must be > 0".into()));
        }
        Ok(())
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn suspect_grace(&self) -> Duration {
        Duration::from_millis(self.suspect_grace_ms)
    }

    /// Effective reconcile period, never below 1ms
    pub fn reconcile_interval(&self) -> Duration {
        let ms = if self.reconcile_interval_ms == 0 {
            self.lease_timeout_ms / 2
        } else {
            self.reconcile_interval_ms
        };
        Duration::from_millis(ms.max(1))
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_millis(self.watch_timeout_ms)
    }
}
