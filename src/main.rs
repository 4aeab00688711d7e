//! media-broker – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON or human-readable).
//! 3. Discover external tools and register platform backends.
//! 4. Build the job runner and start the retention sweeper.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use media_broker::config::Config;
use media_broker::downloader::registry::BackendRegistry;
use media_broker::downloader::tools::{ToolManager, ToolType};
use media_broker::jobs::history::HistoryStore;
use media_broker::jobs::runner::JobRunner;
use media_broker::jobs::sweeper;
use media_broker::routes;
use media_broker::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: BROKER_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "media-broker starting");

    // ── 3. Tools and backends ──────────────────────────────────────────────────
    let tools = ToolManager::new().with_ytdlp(cfg.ytdlp_path.clone());
    let discovery = tools.clone();
    let discovered = tokio::task::spawn_blocking(move || {
        [ToolType::YtDlp, ToolType::Ffmpeg].map(|t| discovery.get_tool_info(t))
    })
    .await?;
    for tool in &discovered {
        if tool.is_available {
            info!(
                tool = %tool.name,
                version = tool.version.as_deref().unwrap_or("unknown"),
                path = tool.path.as_deref().unwrap_or(""),
                "tool found"
            );
        } else {
            warn!(tool = %tool.name, "tool not found; dependent downloads will fail");
        }
    }

    let registry = BackendRegistry::with_defaults(&tools, cfg.extract_timeout_secs);
    info!(platforms = ?registry.platforms(), "backends registered");

    // ── 4. Job runner and sweeper ──────────────────────────────────────────────
    tokio::fs::create_dir_all(&cfg.video_dir).await?;
    tokio::fs::create_dir_all(&cfg.audio_dir).await?;

    let history = Arc::new(HistoryStore::new(cfg.history_file.clone(), cfg.history_limit));
    let runner = JobRunner::new(cfg.runner(), registry, history);

    let sweeper = sweeper::spawn(
        vec![cfg.video_dir.clone(), cfg.audio_dir.clone()],
        cfg.retention(),
        cfg.sweep_interval(),
        runner.status_store().clone(),
        cfg.status_ttl(),
    );
    info!(
        retention_minutes = cfg.retention_minutes,
        interval_secs = cfg.sweep_interval_secs,
        "retention sweeper started"
    );

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let state = Arc::new(AppState::new(cfg.clone(), runner, tools));
    let app = routes::build(state);
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, public_url = %cfg.public_url, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("media-broker stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
