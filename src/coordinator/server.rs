//! Coordinator server

use crate::common::{
    Clock, ClusterConfig, CoordinatorConfig, CoordinatorMetrics, Error, Result, SystemClock,
};
use crate::coordinator::config_store::ConfigStore;
use crate::coordinator::distributor::ConfigDistributor;
use crate::coordinator::grpc::CoordGrpcService;
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::membership::{MembershipConfig, MembershipTracker};
use crate::coordinator::reconciler::{spawn_reconciler, ReconcilerHandle};
use crate::coordinator::service::CoordinatorService;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

pub struct Coordinator {
    config: CoordinatorConfig,
    node_id: String,
    service: CoordinatorService,
    reconciler: Option<ReconcilerHandle>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, node_id: String) -> Self {
        Self::with_clock(config, node_id, Arc::new(SystemClock))
    }

    /// Build every component explicitly; nothing runs until [`start`](Self::start)
    pub fn with_clock(config: CoordinatorConfig, node_id: String, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(ConfigStore::new(
            ClusterConfig::initial(config.policy.clone()),
            config.history_limit,
        ));
        let membership = Arc::new(MembershipTracker::new(MembershipConfig {
            lease_timeout: config.lease_timeout(),
            suspect_grace: config.suspect_grace(),
        }));
        store.add_observer(membership.clone());

        let metrics = Arc::new(CoordinatorMetrics::new());
        let distributor = Arc::new(ConfigDistributor::new(
            store.clone(),
            membership.clone(),
            metrics.clone(),
        ));
        let service =
            CoordinatorService::new(store, membership, distributor, metrics, clock, &config);

        Self {
            config,
            node_id,
            service,
            reconciler: None,
        }
    }

    pub fn service(&self) -> &CoordinatorService {
        &self.service
    }

    pub fn router(&self) -> axum::Router {
        create_router(CoordState {
            coordinator_id: self.node_id.clone(),
            service: self.service.clone(),
        })
    }

    pub fn grpc_service(&self) -> CoordGrpcService {
        CoordGrpcService::new(self.service.clone())
    }

    /// Spawn the reconciler; a second call is a no-op
    pub fn start(&mut self) {
        if self.reconciler.is_none() {
            self.reconciler = Some(spawn_reconciler(
                self.service.clone(),
                self.config.reconcile_interval(),
            ));
        }
    }

    pub async fn stop(&mut self) {
        if let Some(reconciler) = self.reconciler.take() {
            reconciler.stop().await;
        }
    }

    /// Bind the configured addresses and serve until ctrl-c
    pub async fn serve(self) -> Result<()> {
        let http = TcpListener::bind(self.config.http_addr).await?;
        let grpc = TcpListener::bind(self.config.grpc_addr).await?;
        self.serve_with_listeners(http, grpc, shutdown_signal()).await
    }

    /// Serve HTTP and gRPC on pre-bound listeners until either fails or
    /// `shutdown` resolves, then stop the reconciler.
    pub async fn serve_with_listeners<F>(
        mut self,
        http: TcpListener,
        grpc: TcpListener,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!("Starting coordinator: {}", self.node_id);
        tracing::info!("  HTTP API: {}", http.local_addr()?);
        tracing::info!("  gRPC API: {}", grpc.local_addr()?);
        tracing::info!(
            "  Lease: {}ms, grace: {}ms",
            self.config.lease_timeout_ms,
            self.config.suspect_grace_ms
        );

        self.start();

        let grpc_server = tonic::transport::Server::builder()
            .add_service(self.grpc_service().into_server())
            .serve_with_incoming(TcpListenerStream::new(grpc));
        let http_server = axum::serve(http, self.router()).into_future();

        tracing::info!("Coordinator ready (config version {})", self.service.store().current_version());

        let result = tokio::select! {
            res = http_server => res.map_err(|e| {
                tracing::error!("HTTP server error: {}", e);
                Error::from(e)
            }),
            res = grpc_server => res.map_err(|e| {
                tracing::error!("gRPC server error: {}", e);
                Error::from(e)
            }),
            _ = shutdown => {
                tracing::info!("Shutting down coordinator");
                Ok(())
            }
        };

        self.stop().await;
        result
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
