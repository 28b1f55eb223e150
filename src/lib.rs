//! # nvcache-coord
//!
//! Membership and configuration coordinator for a distributed NVM cache:
//! - Versioned, immutable cluster configurations (nodes, shard map, policy)
//! - Lease-based membership with ACTIVE / SUSPECT / DEAD states
//! - Automatic removal of dead nodes with deterministic shard reassignment
//! - gRPC for cache nodes, HTTP for operators
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │              Coordinator                  │
//! │  ConfigStore ◄── ConfigDistributor        │
//! │      │               ▲                    │
//! │      └─ observer ─► MembershipTracker     │
//! └───────────┬───────────────────────────────┘
//!             │ gRPC (ReadConfig, Heartbeat, ...)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌───▼────────┐
//! │ Cache 1    │   │ Cache 2    │   │ Cache 3    │
//! │ (shards)   │   │ (shards)   │   │ (shards)   │
//! └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! nvcache-coord serve --id coord-1 --config coord.toml
//! ```
//!
//! ### Use the CLI
//! ```bash
//! nvcache-ctl register cache-1 10.0.0.1:11211 --capacity 17179869184
//! nvcache-ctl heartbeat cache-1
//! nvcache-ctl read-config
//! nvcache-ctl check-version 3
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod coordinator;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("nvcache");
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
