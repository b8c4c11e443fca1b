use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use parasel_catalog::{run_task, RunRequest, VersionSelector};
use parasel_core::error::ParaselError;

use crate::state::AppState;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn error_response(e: &ParaselError) -> (StatusCode, Json<Value>) {
    let status = match e {
        ParaselError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        ParaselError::Contract(_) | ParaselError::InvalidVersion { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %e, "Request failed");
    }
    (status, Json(json!({ "error": e.to_string() })))
}

// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "bind": state.config.bind,
        "tasks": state.catalog.len(),
    }))
}

// GET /api/tasks
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "tasks": state.catalog.summaries() }))
}

#[derive(Deserialize)]
pub struct VersionQuery {
    #[serde(default)]
    pub version: Option<String>,
}

// GET /api/tasks/:id?version=latest
pub async fn task_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<VersionQuery>,
) -> ApiResult {
    let selector: VersionSelector = q
        .version
        .as_deref()
        .unwrap_or("latest")
        .parse()
        .map_err(|e| error_response(&e))?;
    let spec = state
        .catalog
        .get(&id, &selector)
        .map_err(|e| error_response(&e))?;
    serde_json::to_value(spec.info())
        .map(Json)
        .map_err(|e| error_response(&e.into()))
}

// POST /api/run/:id
pub async fn run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RunRequest>,
) -> ApiResult {
    debug!(task_id = %id, "Run requested");
    let report = run_task(&state.catalog, &state.executor, Some(&id), body)
        .await
        .map_err(|e| error_response(&e))?;
    serde_json::to_value(report)
        .map(Json)
        .map_err(|e| error_response(&e.into()))
}
