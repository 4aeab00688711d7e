//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - metadata, download, cancel and status routes
//! - history query and maintenance routes
//! - artifact file serving
//! - health, tool discovery and the static no-content stubs

mod download;
mod health;
mod history;
mod media;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(download::router())
        .merge(history::router())
        .merge(media::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
