//! Download history endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::downloader::models::HistoryEntry;
use crate::error::ServerError;
use crate::jobs::history::HistoryQuery;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/history",      get(list_history).delete(clear_history))
        .route("/history/{id}", delete(delete_history_item))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub keyword: Option<String>,
    pub platform: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

impl From<HistoryParams> for HistoryQuery {
    fn from(p: HistoryParams) -> Self {
        HistoryQuery {
            keyword: p.keyword.unwrap_or_default(),
            platform: p.platform.unwrap_or_default(),
            status: p.status.unwrap_or_default(),
            limit: p.limit,
        }
    }
}

/// Most-recent-first, optionally filtered.
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryEntry>>, ServerError> {
    let entries = state.runner.history().search(&params.into()).await?;
    Ok(Json(entries))
}

pub async fn delete_history_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    if !state.runner.history().delete(&id).await? {
        return Err(ServerError::NotFound("History entry not found".to_owned()));
    }
    Ok(Json(json!({ "deleted": true })))
}

pub async fn clear_history(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ServerError> {
    state.runner.history().clear().await?;
    Ok(Json(json!({ "cleared": true })))
}
