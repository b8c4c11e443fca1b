use std::sync::Arc;

use parasel_catalog::TaskCatalog;
use parasel_core::config::GatewayConfig;
use parasel_engine::Executor;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub catalog: Arc<TaskCatalog>,
    pub executor: Arc<Executor>,
}
