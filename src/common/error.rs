//! Error types for nvcache-coord

use crate::common::types::{NodeId, ShardId};
use crate::proto::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of configuration reads, updates and commits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Version conflict: expected {expected}, candidate has {found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("Invalid shard assignment: shard {shard} -> {node}: {reason}")]
    InvalidShardAssignment {
        shard: ShardId,
        node: NodeId,
        reason: String,
    },

    #[error("Update contended: gave up after retry at version {0}")]
    Contended(u64),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} is not active")]
    InactiveNode(NodeId),

    #[error("Update contains no changes")]
    EmptyDelta,
}

/// Failures of membership operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("Duplicate node: {0} is already registered")]
    DuplicateNode(NodeId),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Invalid node descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Clock went backwards: last sweep at {last_ms}, now {now_ms}")]
    ClockAnomaly { last_ms: u64, now_ms: u64 },
}

#[derive(Error, Debug)]
pub enum Error {
    // === Core Errors ===
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    // === Boundary Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Process Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Config(ConfigError::Contended(_))
                | Error::Config(ConfigError::VersionConflict { .. })
        )
    }

    /// Wire error code carried in-band in every response
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Config(e) => match e {
                ConfigError::VersionConflict { .. } => ErrorCode::VersionConflict,
                ConfigError::InvalidShardAssignment { .. } | ConfigError::InactiveNode(_) => {
                    ErrorCode::InvalidShardAssignment
                }
                ConfigError::Contended(_) => ErrorCode::Contended,
                ConfigError::UnknownNode(_) => ErrorCode::UnknownNode,
                ConfigError::EmptyDelta => ErrorCode::InvalidRequest,
            },
            Error::Membership(e) => match e {
                MembershipError::DuplicateNode(_) => ErrorCode::DuplicateNode,
                MembershipError::UnknownNode(_) => ErrorCode::UnknownNode,
                MembershipError::InvalidDescriptor(_) => ErrorCode::InvalidRequest,
                MembershipError::ClockAnomaly { .. } => ErrorCode::Internal,
            },
            Error::InvalidRequest(_) | Error::InvalidConfig(_) => ErrorCode::InvalidRequest,
            Error::Io(_) | Error::Transport(_) | Error::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.code() {
            ErrorCode::UnknownNode => StatusCode::NOT_FOUND,
            ErrorCode::DuplicateNode | ErrorCode::VersionConflict | ErrorCode::Contended => {
                StatusCode::CONFLICT
            }
            ErrorCode::InvalidShardAssignment => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::None | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
