//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::downloader::models::HeaderMap;

/// Runtime configuration for media-broker.
///
/// Every field has a default so the server starts without any environment
/// variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:5000"`).
    pub bind_address: String,

    /// Base URL clients use to fetch finished artifacts.
    pub public_url: String,

    pub video_dir: PathBuf,
    pub audio_dir: PathBuf,

    /// JSON file holding the bounded download history.
    pub history_file: PathBuf,
    pub history_limit: usize,

    /// Proxy passed to every backend (`socks5h://...`, `http://...`).
    pub proxy: Option<String>,

    /// Directory with `{platform}_cookies.txt` files.
    pub cookies_dir: PathBuf,

    /// Artifacts older than this are deleted by the sweeper.
    pub retention_minutes: u64,
    pub sweep_interval_secs: u64,

    /// Status records untouched for this long are dropped.
    pub status_ttl_secs: u64,

    /// Transfers running at once.
    pub max_concurrent_jobs: usize,

    /// Jobs allowed to wait for a transfer slot before submissions get 503.
    pub queue_capacity: usize,

    /// Per-job wall clock limit; `0` disables it.
    pub job_timeout_secs: u64,
    pub extract_timeout_secs: u64,

    /// Completed artifacts smaller than this are treated as failures.
    pub min_output_bytes: u64,

    /// Explicit yt-dlp binary; searched for when unset.
    pub ytdlp_path: Option<PathBuf>,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("BROKER_BIND", "0.0.0.0:5000"),
            public_url: env_or("BROKER_PUBLIC_URL", "http://127.0.0.1:5000"),
            video_dir: env_or("BROKER_VIDEO_DIR", "static/videos").into(),
            audio_dir: env_or("BROKER_AUDIO_DIR", "static/audios").into(),
            history_file: env_or("BROKER_HISTORY_FILE", "data/history.json").into(),
            history_limit: parse_env("BROKER_HISTORY_LIMIT", 50),
            proxy: env_opt("BROKER_PROXY"),
            cookies_dir: env_or("BROKER_COOKIES_DIR", "cookies").into(),
            retention_minutes: parse_env("BROKER_RETENTION_MINUTES", 1440),
            sweep_interval_secs: parse_env("BROKER_SWEEP_INTERVAL_SECS", 3600),
            status_ttl_secs: parse_env("BROKER_STATUS_TTL_SECS", 3600),
            max_concurrent_jobs: parse_env("BROKER_MAX_CONCURRENT_JOBS", 4),
            queue_capacity: parse_env("BROKER_QUEUE_CAPACITY", 32),
            job_timeout_secs: parse_env("BROKER_JOB_TIMEOUT_SECS", 0),
            extract_timeout_secs: parse_env("BROKER_EXTRACT_TIMEOUT_SECS", 60),
            min_output_bytes: parse_env("BROKER_MIN_OUTPUT_BYTES", 1),
            ytdlp_path: env_opt("BROKER_YTDLP").map(PathBuf::from),
            log_level: env_or("BROKER_LOG", "info"),
            log_json: std::env::var("BROKER_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// The slice of configuration the job runner needs.
    pub fn runner(&self) -> RunnerConfig {
        RunnerConfig {
            video_dir: self.video_dir.clone(),
            audio_dir: self.audio_dir.clone(),
            public_base_url: self.public_url.trim_end_matches('/').to_string(),
            cookies_dir: self.cookies_dir.clone(),
            proxy: self.proxy.clone(),
            max_concurrent_jobs: self.max_concurrent_jobs.max(1),
            queue_capacity: self.queue_capacity,
            job_timeout: (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs)),
            extract_timeout: Duration::from_secs(self.extract_timeout_secs.max(1)),
            min_output_bytes: self.min_output_bytes,
            ..RunnerConfig::default()
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_minutes * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }
}

/// Configuration consumed by [`JobRunner`](crate::jobs::runner::JobRunner).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub video_dir: PathBuf,
    pub audio_dir: PathBuf,
    /// Without trailing slash.
    pub public_base_url: String,
    pub cookies_dir: PathBuf,
    pub proxy: Option<String>,
    /// Headers sent with every backend request, below caller overrides.
    pub base_headers: HeaderMap,
    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
    pub job_timeout: Option<Duration>,
    pub extract_timeout: Duration,
    pub min_output_bytes: u64,
    pub progress_channel_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let mut base_headers = HeaderMap::new();
        base_headers.insert(
            "User-Agent".to_string(),
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
        );
        base_headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());

        Self {
            video_dir: PathBuf::from("static/videos"),
            audio_dir: PathBuf::from("static/audios"),
            public_base_url: "http://127.0.0.1:5000".to_string(),
            cookies_dir: PathBuf::from("cookies"),
            proxy: None,
            base_headers,
            max_concurrent_jobs: 4,
            queue_capacity: 32,
            job_timeout: None,
            extract_timeout: Duration::from_secs(60),
            min_output_bytes: 1,
            progress_channel_capacity: 64,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
