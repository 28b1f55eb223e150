//! Common utilities and types shared across nvcache-coord

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing_middleware;
pub mod types;
pub mod utils;

pub use config::{Config, CoordinatorConfig};
pub use error::{ConfigError, Error, MembershipError, Result};
pub use metrics::CoordinatorMetrics;
pub use types::{
    ClusterConfig, ConfigChange, ConfigDelta, Lease, NodeDescriptor, NodeId, NodeStatus, ShardId,
};
pub use utils::{format_bytes, parse_duration, timestamp_now_millis, Clock, ManualClock, SystemClock};
