//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - Versioned cluster configuration (nodes, shard map, cache policy)
//! - Node membership via leases and heartbeats
//! - Folding failed nodes out of the configuration
//! - Serving the configuration to cache nodes over gRPC and HTTP

pub mod config_store;
pub mod convert;
pub mod distributor;
pub mod grpc;
pub mod http;
pub mod membership;
pub mod placement;
pub mod reconciler;
pub mod server;
pub mod service;

pub use config_store::{ConfigObserver, ConfigStore};
pub use distributor::{ConfigDistributor, VersionCheck};
pub use membership::{MemberEntry, MembershipConfig, MembershipTracker};
pub use server::Coordinator;
pub use service::{CoordinatorService, LeaseGrant, Reply, Request, RequestKind, Response};
