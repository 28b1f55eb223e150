//! HTTP admin API for the coordinator
//!
//! JSON views of the configuration and the lease table, the same
//! operations as the gRPC API for operators and scripts, health probes,
//! Prometheus metrics and a server-sent event stream of committed configs.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{ClusterConfig, ConfigDelta, Error, NodeDescriptor, NodeStatus};
use crate::coordinator::service::{CoordinatorService, Reply, Request, Response};
use async_stream::stream;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct CoordState {
    /// Coordinator instance id, reported by status endpoints
    pub coordinator_id: String,
    pub service: CoordinatorService,
}

/// Creates the HTTP router with all public endpoints.
pub fn create_router(state: CoordState) -> Router {
    Router::new()
        // Configuration
        .route(
            "/config",
            axum::routing::get(read_config).post(update_config),
        )
        .route("/config/watch", axum::routing::get(watch_config))
        .route("/config/check/:version", axum::routing::get(check_version))
        // Membership
        .route(
            "/nodes",
            axum::routing::get(list_nodes).post(register_node),
        )
        .route("/nodes/:id/heartbeat", axum::routing::post(heartbeat))
        .route("/nodes/:id", axum::routing::delete(deregister_node))
        // Admin
        .route("/admin/rebalance", axum::routing::post(admin_rebalance))
        .route("/admin/status", axum::routing::get(admin_status))
        // Health check endpoints
        .route("/health", axum::routing::get(health))
        .route("/health/ready", axum::routing::get(health_ready))
        .route("/health/live", axum::routing::get(health_live))
        .route("/metrics", axum::routing::get(metrics))
        .route("/watch/sse", axum::routing::get(watch_sse))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_tracing_middleware)),
        )
        .with_state(state)
}

fn error_response(e: &Error) -> axum::response::Response {
    (
        e.to_http_status(),
        Json(json!({
            "error": e.to_string(),
            "code": e.code().as_str_name(),
        })),
    )
        .into_response()
}

/// Render a service response; `created` is the status used for a new lease
fn reply_response(response: Response, created: StatusCode) -> axum::response::Response {
    match response.result {
        Ok(Reply::Config(config)) => (StatusCode::OK, Json(config.as_ref())).into_response(),
        Ok(Reply::Lease(grant)) => (created, Json(grant)).into_response(),
        Ok(Reply::Removed { node_id }) => (
            StatusCode::OK,
            Json(json!({ "node_id": node_id, "status": NodeStatus::Dead })),
        )
            .into_response(),
        Ok(Reply::Version(check)) => (StatusCode::OK, Json(check)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn read_config(State(state): State<CoordState>) -> impl IntoResponse {
    reply_response(state.service.handle(Request::ReadConfig), StatusCode::OK)
}

async fn update_config(
    State(state): State<CoordState>,
    Json(delta): Json<ConfigDelta>,
) -> impl IntoResponse {
    reply_response(
        state.service.handle(Request::UpdateConfig { delta }),
        StatusCode::OK,
    )
}

#[derive(Debug, Deserialize)]
struct WatchQuery {
    #[serde(default)]
    known_version: u64,
    #[serde(default)]
    timeout_ms: u64,
}

/// Long-poll: returns once a version above `known_version` is committed
async fn watch_config(
    State(state): State<CoordState>,
    Query(query): Query<WatchQuery>,
) -> impl IntoResponse {
    let response = state
        .service
        .watch_config(query.known_version, Duration::from_millis(query.timeout_ms))
        .await;
    reply_response(response, StatusCode::OK)
}

async fn check_version(
    State(state): State<CoordState>,
    Path(version): Path<u64>,
) -> impl IntoResponse {
    reply_response(
        state.service.handle(Request::CheckVersion { version }),
        StatusCode::OK,
    )
}

async fn list_nodes(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!({ "members": state.service.membership().members() }))
}

async fn register_node(
    State(state): State<CoordState>,
    Json(descriptor): Json<NodeDescriptor>,
) -> impl IntoResponse {
    reply_response(
        state.service.handle(Request::RegisterNode { descriptor }),
        StatusCode::CREATED,
    )
}

#[derive(Debug, Deserialize)]
struct HeartbeatQuery {
    #[serde(default)]
    timestamp_ms: u64,
}

async fn heartbeat(
    State(state): State<CoordState>,
    Path(node_id): Path<String>,
    Query(query): Query<HeartbeatQuery>,
) -> impl IntoResponse {
    reply_response(
        state.service.handle(Request::Heartbeat {
            node_id,
            timestamp_ms: query.timestamp_ms,
        }),
        StatusCode::OK,
    )
}

async fn deregister_node(
    State(state): State<CoordState>,
    Path(node_id): Path<String>,
) -> impl IntoResponse {
    reply_response(
        state.service.handle(Request::DeregisterNode { node_id }),
        StatusCode::OK,
    )
}

/// Admin endpoint: place every unassigned shard on an active node
async fn admin_rebalance(State(state): State<CoordState>) -> impl IntoResponse {
    reply_response(state.service.handle(Request::Rebalance), StatusCode::OK)
}

/// Admin endpoint: cluster overview for dashboards
async fn admin_status(State(state): State<CoordState>) -> impl IntoResponse {
    let config = state.service.distributor().read_config();
    let members = state.service.membership().members();
    let count = |status: NodeStatus| members.iter().filter(|m| m.status == status).count();

    Json(json!({
        "coordinator_id": state.coordinator_id,
        "config_version": config.version,
        "oldest_retained_version": state.service.store().oldest_retained(),
        "committed_at": config.committed_at,
        "config_nodes": config.nodes.len(),
        "assigned_shards": config.shard_map.len(),
        "members": {
            "active": count(NodeStatus::Active),
            "suspect": count(NodeStatus::Suspect),
            "dead": count(NodeStatus::Dead),
        },
        "uptime_secs": state.service.metrics().uptime_seconds(),
    }))
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "coordinator_id": state.coordinator_id,
        "config_version": state.service.store().current_version(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness probe: 200 once clients have a shard map to route with
async fn health_ready(State(state): State<CoordState>) -> impl IntoResponse {
    let config = state.service.distributor().read_config();
    let body = json!({
        "ready": !config.shard_map.is_empty(),
        "config_version": config.version,
        "assigned_shards": config.shard_map.len(),
        "active_nodes": config.active_nodes().len(),
    });
    if config.shard_map.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    } else {
        (StatusCode::OK, Json(body))
    }
}

/// Liveness probe: if we can respond, we're alive
async fn health_live(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!({
        "alive": true,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp_ms": state.service.clock().now_millis(),
    }))
}

/// Prometheus metrics
pub async fn metrics(State(state): State<CoordState>) -> impl IntoResponse {
    let mut out = state.service.metrics().to_prometheus();

    let members = state.service.membership().members();
    out += "# TYPE nvcache_members gauge\n";
    for status in [NodeStatus::Active, NodeStatus::Suspect, NodeStatus::Dead] {
        let n = members.iter().filter(|m| m.status == status).count();
        out += &format!("nvcache_members{{status=\"{}\"}} {}\n", status, n);
    }

    (StatusCode::OK, out)
}

fn config_event(config: &ClusterConfig) -> Option<Event> {
    match serde_json::to_string(config) {
        Ok(data) => Some(
            Event::default()
                .event("config")
                .id(config.version.to_string())
                .data(data),
        ),
        Err(e) => {
            tracing::warn!(version = config.version, error = %e, "Failed to encode config event");
            None
        }
    }
}

/// SSE endpoint: the current config, then every committed config
pub async fn watch_sse(
    State(state): State<CoordState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.service.store().subscribe();
    let stream = stream! {
        loop {
            let event = {
                let config = rx.borrow_and_update().clone();
                config_event(&config)
            };
            if let Some(event) = event {
                yield Ok(event);
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
