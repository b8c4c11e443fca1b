use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use parasel_catalog::TaskCatalog;
use parasel_core::config::GatewayConfig;
use parasel_engine::Executor;

use crate::routes;
use crate::state::AppState;

/// HTTP gateway exposing the task catalog.
pub struct GatewayServer {
    config: GatewayConfig,
    catalog: Arc<TaskCatalog>,
    executor: Arc<Executor>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, catalog: Arc<TaskCatalog>, executor: Arc<Executor>) -> Self {
        Self {
            config,
            catalog,
            executor,
        }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            catalog: self.catalog.clone(),
            executor: self.executor.clone(),
        });
        let app = router(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, tasks = self.catalog.len(), "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}

/// The gateway's routes, without a listener.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/tasks", get(routes::list_tasks))
        .route("/api/tasks/{id}", get(routes::task_info))
        .route("/api/run/{id}", post(routes::run))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
