//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::downloader::tools::ToolManager;
use crate::jobs::runner::JobRunner;

#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Owns job statuses, cancellation tokens and the history log.
    pub runner: JobRunner,
    pub tools: ToolManager,
}

impl AppState {
    pub fn new(config: Config, runner: JobRunner, tools: ToolManager) -> Self {
        Self {
            config: Arc::new(config),
            runner,
            tools,
        }
    }
}
