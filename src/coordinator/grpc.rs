//! Coordinator gRPC service
//!
//! Cache nodes use this API to fetch the configuration, register, renew
//! their leases and validate configuration numbers. Domain errors travel
//! in-band as `ErrorCode` + message; `Status` is reserved for transport
//! failures.

use crate::coordinator::convert::{
    config_response, delta_from_proto, lease_response, node_from_proto, version_response,
};
use crate::coordinator::service::{self, CoordinatorService, RequestKind};
use crate::proto::coordinator_server::{Coordinator, CoordinatorServer};
use crate::proto::*;
use std::time::Duration;
use tonic::{Request, Response, Status};

/// CoordGrpcService adapts the generated `Coordinator` trait to the service layer.
#[derive(Clone)]
pub struct CoordGrpcService {
    service: CoordinatorService,
}

impl CoordGrpcService {
    pub fn new(service: CoordinatorService) -> Self {
        Self { service }
    }

    /// Converts this service into a gRPC server instance.
    pub fn into_server(self) -> CoordinatorServer<Self> {
        CoordinatorServer::new(self)
    }
}

#[tonic::async_trait]
impl Coordinator for CoordGrpcService {
    async fn read_config(
        &self,
        _req: Request<ReadConfigRequest>,
    ) -> Result<Response<ConfigResponse>, Status> {
        let response = self.service.handle(service::Request::ReadConfig);
        Ok(Response::new(config_response(response.result)))
    }

    async fn update_config(
        &self,
        req: Request<UpdateConfigRequest>,
    ) -> Result<Response<ConfigResponse>, Status> {
        let response = match delta_from_proto(req.into_inner()) {
            Ok(delta) => self.service.handle(service::Request::UpdateConfig { delta }),
            Err(e) => self.service.reject(RequestKind::UpdateConfig, e),
        };
        Ok(Response::new(config_response(response.result)))
    }

    async fn register_node(
        &self,
        req: Request<RegisterNodeRequest>,
    ) -> Result<Response<LeaseResponse>, Status> {
        let decoded = req
            .into_inner()
            .node
            .ok_or_else(|| crate::Error::InvalidRequest("missing node descriptor".into()))
            .and_then(node_from_proto);
        let response = match decoded {
            Ok(descriptor) => self.service.handle(service::Request::RegisterNode { descriptor }),
            Err(e) => self.service.reject(RequestKind::RegisterNode, e),
        };
        Ok(Response::new(lease_response(response.result)))
    }

    async fn heartbeat(
        &self,
        req: Request<HeartbeatRequest>,
    ) -> Result<Response<LeaseResponse>, Status> {
        let req = req.into_inner();
        let response = self.service.handle(service::Request::Heartbeat {
            node_id: req.node_id,
            timestamp_ms: req.timestamp_ms,
        });
        Ok(Response::new(lease_response(response.result)))
    }

    async fn deregister_node(
        &self,
        req: Request<DeregisterNodeRequest>,
    ) -> Result<Response<LeaseResponse>, Status> {
        let response = self.service.handle(service::Request::DeregisterNode {
            node_id: req.into_inner().node_id,
        });
        Ok(Response::new(lease_response(response.result)))
    }

    async fn watch_config(
        &self,
        req: Request<WatchConfigRequest>,
    ) -> Result<Response<ConfigResponse>, Status> {
        let req = req.into_inner();
        let response = self
            .service
            .watch_config(req.known_version, Duration::from_millis(req.timeout_ms))
            .await;
        Ok(Response::new(config_response(response.result)))
    }

    async fn check_version(
        &self,
        req: Request<CheckVersionRequest>,
    ) -> Result<Response<CheckVersionResponse>, Status> {
        let response = self.service.handle(service::Request::CheckVersion {
            version: req.into_inner().version,
        });
        Ok(Response::new(version_response(response.result)))
    }
}
