//! Health, tool discovery and no-content stubs.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::downloader::tools::ToolInfo;
use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(get_health))
        .route("/tools", get(get_tools))
        .route("/favicon.ico", get(no_content))
        .route("/robots.txt", get(no_content))
        .route("/ads.txt", get(no_content))
}

/// Heartbeat endpoint.
///
/// Returns `{"status": "ok", "version": "...", "active_jobs": n}` with HTTP 200.
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status":      "ok",
        "version":     env!("CARGO_PKG_VERSION"),
        "active_jobs": state.runner.active_jobs(),
    }))
}

/// Versions and paths of the external tools the backends run.
pub async fn get_tools(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ToolInfo>>, ServerError> {
    let tools = state.tools.clone();
    // Version checks spawn processes
    let infos = tokio::task::spawn_blocking(move || tools.get_all_tools())
        .await
        .map_err(|e| ServerError::Internal(format!("tool discovery failed: {}", e)))?;
    Ok(Json(infos))
}

async fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}
