pub mod config;
pub mod downloader;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod state;

pub use config::{Config, RunnerConfig};
pub use jobs::runner::JobRunner;
pub use state::AppState;
