//! Conversions between wire messages and domain types

use crate::common::{
    ClusterConfig, ConfigChange, ConfigDelta, Error, NodeDescriptor, NodeStatus, Result,
};
use crate::coordinator::service::Reply;
use crate::proto;
use crate::proto::config_change::Change;
use crate::proto::ErrorCode;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub fn status_to_proto(status: NodeStatus) -> proto::NodeStatus {
    match status {
        NodeStatus::Active => proto::NodeStatus::Active,
        NodeStatus::Suspect => proto::NodeStatus::Suspect,
        NodeStatus::Dead => proto::NodeStatus::Dead,
    }
}

pub fn proto_node_status(raw: i32) -> Result<NodeStatus> {
    match proto::NodeStatus::try_from(raw) {
        Ok(proto::NodeStatus::Active) => Ok(NodeStatus::Active),
        Ok(proto::NodeStatus::Suspect) => Ok(NodeStatus::Suspect),
        Ok(proto::NodeStatus::Dead) => Ok(NodeStatus::Dead),
        Err(_) => Err(Error::InvalidRequest(format!("unknown node status {}", raw))),
    }
}

pub fn node_to_proto(node: &NodeDescriptor) -> proto::NodeDescriptor {
    proto::NodeDescriptor {
        node_id: node.node_id.clone(),
        address: node.address.clone(),
        capacity: node.capacity,
        status: status_to_proto(node.status) as i32,
    }
}

pub fn node_from_proto(node: proto::NodeDescriptor) -> Result<NodeDescriptor> {
    Ok(NodeDescriptor {
        status: proto_node_status(node.status)?,
        node_id: node.node_id,
        address: node.address,
        capacity: node.capacity,
    })
}

pub fn config_to_proto(config: &ClusterConfig) -> proto::ClusterConfig {
    proto::ClusterConfig {
        version: config.version,
        nodes: config.nodes.values().map(node_to_proto).collect(),
        shard_map: config
            .shard_map
            .iter()
            .map(|(shard, node)| (*shard, node.clone()))
            .collect(),
        policy: config
            .policy
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        committed_at_ms: config.committed_at.timestamp_millis(),
    }
}

pub fn config_from_proto(config: proto::ClusterConfig) -> Result<ClusterConfig> {
    let nodes: BTreeMap<_, _> = config
        .nodes
        .into_iter()
        .map(|n| node_from_proto(n).map(|n| (n.node_id.clone(), n)))
        .collect::<Result<_>>()?;
    let committed_at = DateTime::<Utc>::from_timestamp_millis(config.committed_at_ms)
        .ok_or_else(|| {
            Error::InvalidRequest(format!("bad commit time {}", config.committed_at_ms))
        })?;

    Ok(ClusterConfig {
        version: config.version,
        nodes,
        shard_map: config.shard_map.into_iter().collect(),
        policy: config.policy.into_iter().collect(),
        committed_at,
    })
}

pub fn change_to_proto(change: &ConfigChange) -> proto::ConfigChange {
    let change = match change {
        ConfigChange::AddNode(node) => Change::AddNode(node_to_proto(node)),
        ConfigChange::RemoveNode { node_id } => Change::RemoveNode(node_id.clone()),
        ConfigChange::AssignShard { shard, node_id } => {
            Change::AssignShard(proto::ShardAssignment {
                shard_id: *shard,
                node_id: node_id.clone(),
            })
        }
        ConfigChange::UnassignShard { shard } => Change::UnassignShard(*shard),
        ConfigChange::SetPolicy { key, value } => Change::SetPolicy(proto::PolicyEntry {
            key: key.clone(),
            value: value.clone(),
        }),
        ConfigChange::RemovePolicy { key } => Change::RemovePolicy(key.clone()),
    };
    proto::ConfigChange {
        change: Some(change),
    }
}

pub fn change_from_proto(change: proto::ConfigChange) -> Result<ConfigChange> {
    let change = change
        .change
        .ok_or_else(|| Error::InvalidRequest("config change has no operation".into()))?;

    Ok(match change {
        Change::AddNode(node) => ConfigChange::AddNode(node_from_proto(node)?),
        Change::RemoveNode(node_id) => ConfigChange::RemoveNode { node_id },
        Change::AssignShard(assignment) => ConfigChange::AssignShard {
            shard: assignment.shard_id,
            node_id: assignment.node_id,
        },
        Change::UnassignShard(shard) => ConfigChange::UnassignShard { shard },
        Change::SetPolicy(entry) => {
            if entry.key.is_empty() {
                return Err(Error::InvalidRequest("policy key is empty".into()));
            }
            ConfigChange::SetPolicy {
                key: entry.key,
                value: entry.value,
            }
        }
        Change::RemovePolicy(key) => ConfigChange::RemovePolicy { key },
    })
}

pub fn delta_from_proto(request: proto::UpdateConfigRequest) -> Result<ConfigDelta> {
    let changes = request
        .changes
        .into_iter()
        .map(change_from_proto)
        .collect::<Result<Vec<_>>>()?;
    Ok(ConfigDelta { changes })
}

pub fn delta_to_proto(delta: &ConfigDelta) -> proto::UpdateConfigRequest {
    proto::UpdateConfigRequest {
        changes: delta.changes.iter().map(change_to_proto).collect(),
    }
}

fn unexpected(reply: &Reply) -> Error {
    Error::Internal(format!("unexpected reply {:?}", reply))
}

pub fn config_response(result: Result<Reply>) -> proto::ConfigResponse {
    let result = result.and_then(|reply| match reply {
        Reply::Config(config) => Ok(config),
        other => Err(unexpected(&other)),
    });
    match result {
        Ok(config) => proto::ConfigResponse {
            config: Some(config_to_proto(&config)),
            error_code: ErrorCode::None as i32,
            error_message: String::new(),
        },
        Err(e) => proto::ConfigResponse {
            config: None,
            error_code: e.code() as i32,
            error_message: e.to_string(),
        },
    }
}

pub fn lease_response(result: Result<Reply>) -> proto::LeaseResponse {
    match result {
        Ok(Reply::Lease(grant)) => proto::LeaseResponse {
            node_id: grant.node_id,
            lease_expires_at_ms: grant.expires_at_ms,
            config_version: grant.config_version,
            error_code: ErrorCode::None as i32,
            error_message: String::new(),
        },
        Ok(Reply::Removed { node_id }) => proto::LeaseResponse {
            node_id,
            error_code: ErrorCode::None as i32,
            ..Default::default()
        },
        Ok(other) => lease_error(unexpected(&other)),
        Err(e) => lease_error(e),
    }
}

fn lease_error(e: Error) -> proto::LeaseResponse {
    proto::LeaseResponse {
        error_code: e.code() as i32,
        error_message: e.to_string(),
        ..Default::default()
    }
}

pub fn version_response(result: Result<Reply>) -> proto::CheckVersionResponse {
    let result = result.and_then(|reply| match reply {
        Reply::Version(check) => Ok(check),
        other => Err(unexpected(&other)),
    });
    match result {
        Ok(check) => proto::CheckVersionResponse {
            current_version: check.current,
            stale: check.stale,
            retained: check.retained,
            error_code: ErrorCode::None as i32,
            error_message: String::new(),
        },
        Err(e) => proto::CheckVersionResponse {
            error_code: e.code() as i32,
            error_message: e.to_string(),
            ..Default::default()
        },
    }
}

/// Turn an in-band error code back into a client-side error
pub fn check_error_code(code: i32, message: &str) -> Result<()> {
    match ErrorCode::try_from(code) {
        Ok(ErrorCode::None) => Ok(()),
        Ok(code) => Err(Error::Internal(format!(
            "{}: {}",
            code.as_str_name(),
            message
        ))),
        Err(_) => Err(Error::Internal(format!("error code {}: {}", code, message))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ConfigError;
    use std::sync::Arc;

    fn sample_config() -> ClusterConfig {
        let mut config = ClusterConfig::initial(BTreeMap::from([(
            "evict_opt".to_string(),
            "lru".to_string(),
        )]));
        config.version = 3;
        for id in ["a", "b"] {
            config.nodes.insert(
                id.to_string(),
                NodeDescriptor::new(id, format!("{}:11211", id), 1 << 30),
            );
        }
        config.shard_map.insert(0, "a".into());
        config.shard_map.insert(1, "b".into());
        config
    }

    #[test]
    fn test_config_survives_the_wire() {
        let config = sample_config();
        let wire = config_to_proto(&config);
        assert_eq!(wire.nodes.len(), 2);
        assert_eq!(wire.shard_map.get(&1).map(String::as_str), Some("b"));

        let back = config_from_proto(wire).unwrap();
        assert_eq!(back.version, 3);
        assert_eq!(back.nodes, config.nodes);
        assert_eq!(back.shard_map, config.shard_map);
        assert_eq!(back.policy, config.policy);
        assert_eq!(
            back.committed_at.timestamp_millis(),
            config.committed_at.timestamp_millis()
        );
    }

    #[test]
    fn test_missing_operation_rejected() {
        let request = proto::UpdateConfigRequest {
            changes: vec![
                change_to_proto(&ConfigChange::UnassignShard { shard: 1 }),
                proto::ConfigChange { change: None },
            ],
        };
        let err = delta_from_proto(request).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_unknown_status_rejected() {
        let node = proto::NodeDescriptor {
            node_id: "a".into(),
            address: "a:1".into(),
            capacity: 0,
            status: 42,
        };
        assert!(matches!(
            node_from_proto(node),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_delta_keeps_order() {
        let delta = ConfigDelta::new()
            .assign_shard(2, "a")
            .remove_node("c")
            .set_policy("use_cas", "false");
        let back = delta_from_proto(delta_to_proto(&delta)).unwrap();
        assert_eq!(back, delta);
    }

    #[test]
    fn test_error_responses_in_band() {
        let err: Error = ConfigError::Contended(7).into();
        let response = config_response(Err(err));
        assert!(response.config.is_none());
        assert_eq!(response.error_code, ErrorCode::Contended as i32);
        assert!(response.error_message.contains("7"));

        let ok = config_response(Ok(Reply::Config(Arc::new(sample_config()))));
        assert_eq!(ok.error_code, ErrorCode::None as i32);
        assert_eq!(ok.config.map(|c| c.version), Some(3));

        let mismatched = lease_response(Ok(Reply::Config(Arc::new(sample_config()))));
        assert_eq!(mismatched.error_code, ErrorCode::Internal as i32);
    }

    #[test]
    fn test_check_error_code() {
        assert!(check_error_code(0, "").is_ok());
        let err = check_error_code(ErrorCode::UnknownNode as i32, "ghost").unwrap_err();
        assert!(err.to_string().contains("ERROR_CODE_UNKNOWN_NODE"));
    }
}
