// Helper functions for backend implementations

use std::path::Path;
use std::process::Stdio;

use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration as TokioDuration};

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{HeaderMap, ProgressUpdate};
use crate::downloader::platform::PlatformTag;
use crate::jobs::cancel::CancelToken;

lazy_static::lazy_static! {
    // [download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)
    static ref PROGRESS_RE: Regex = Regex::new(
        r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*(\d+\.?\d*\s*\w+)\s+at\s+(\d+\.?\d*\s*\w+/s)(?:\s+ETA\s+(\S+))?(?:\s+\(frag\s+(\d+)/(\d+)\))?"
    ).unwrap();
    static ref DEST_RE: Regex = Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
    static ref MERGE_RE: Regex = Regex::new(r"\[Merger?\]\s+Merging").unwrap();
    static ref EXTRACT_AUDIO_RE: Regex = Regex::new(r"\[ExtractAudio\]\s+Destination").unwrap();
    static ref SIZE_RE: Regex = Regex::new(r"^(\d+\.?\d*)\s*([KMGT]?i?B)$").unwrap();
}

/// Run command with timeout, killing it on expiry or when `cancel` fires
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
    cancel: Option<&CancelToken>,
) -> Result<std::process::Output, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DownloadError::Internal(format!("Failed to start {}: {}", program, e)))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::Internal(format!("Failed to capture stdout from {}", program)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::Internal(format!("Failed to capture stderr from {}", program)))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };

    let waited = tokio::select! {
        res = timeout(TokioDuration::from_secs(timeout_secs), child.wait()) => Some(res),
        _ = cancelled => None,
    };

    match waited {
        Some(Ok(status_res)) => {
            let status = status_res
                .map_err(|e| DownloadError::Internal(format!("Failed to wait for {}: {}", program, e)))?;
            let stdout = join_pipe(stdout_task).await?;
            let stderr = join_pipe(stderr_task).await?;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Some(Err(_)) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::TransferFailed(format!(
                "{} timed out after {}s",
                program, timeout_secs
            )))
        }
        None => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::Cancelled)
        }
    }
}

async fn join_pipe(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<Vec<u8>, DownloadError> {
    task.await
        .map_err(|e| DownloadError::Internal(format!("pipe reader failed: {}", e)))?
        .map_err(DownloadError::from)
}

/// Parse a yt-dlp progress line into a snapshot.
///
/// Recognises percentage lines, the destination banner and the merge and
/// audio-extraction steps. Returns `None` for anything else.
pub fn parse_ytdlp_progress(line: &str) -> Option<ProgressUpdate> {
    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        let size = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let speed = caps.get(3).map(|m| m.as_str().replace(' ', "")).unwrap_or_default();
        let eta = caps.get(4).map(|m| m.as_str().to_string());

        let total = parse_size(size);
        let downloaded = total.map(|t| (t as f64 * percent as f64 / 100.0) as u64);

        let message = match (caps.get(5), caps.get(6)) {
            (Some(fc), Some(ft)) => Some(format!("fragment {}/{}", fc.as_str(), ft.as_str())),
            _ => None,
        };

        return Some(ProgressUpdate {
            percent,
            speed,
            eta,
            downloaded_bytes: downloaded,
            total_bytes: total,
            message,
        });
    }

    if let Some(caps) = DEST_RE.captures(line) {
        let filename = caps.get(1).map(|m| m.as_str()).unwrap_or("file");
        let short_name: String = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(filename)
            .chars()
            .take(50)
            .collect();
        let mut update = ProgressUpdate::percent(0.0, "0KB/s");
        update.message = Some(format!("Starting: {}", short_name));
        return Some(update);
    }

    if MERGE_RE.is_match(line) {
        let mut update = ProgressUpdate::percent(99.0, "0KB/s");
        update.message = Some("Merging video and audio".to_string());
        return Some(update);
    }

    if EXTRACT_AUDIO_RE.is_match(line) {
        let mut update = ProgressUpdate::percent(99.0, "0KB/s");
        update.message = Some("Extracting audio".to_string());
        return Some(update);
    }

    None
}

/// "343.72MiB" -> bytes
fn parse_size(s: &str) -> Option<u64> {
    let caps = SIZE_RE.captures(s.trim())?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let factor = match caps.get(2)?.as_str() {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some((value * factor) as u64)
}

/// Bandwidth limit in bytes per second.
///
/// Accepts `"500K"`, `"2M"`, `"1G"` (binary multiples) or a bare number in KiB.
pub fn parse_bandwidth_limit(limit: &str) -> Option<u64> {
    let limit = limit.trim().to_ascii_uppercase();
    if limit.is_empty() {
        return None;
    }

    let (number, factor) = match limit.chars().last() {
        Some('K') => (&limit[..limit.len() - 1], 1024.0),
        Some('M') => (&limit[..limit.len() - 1], 1024.0 * 1024.0),
        Some('G') => (&limit[..limit.len() - 1], 1024.0 * 1024.0 * 1024.0),
        _ => (limit.as_str(), 1024.0),
    };

    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    Some((value * factor) as u64)
}

/// `{prefix}_{12 lowercase alphanumerics}`
pub fn generate_filename(prefix: &str) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &random[..12])
}

/// Human-readable size, e.g. `"12.34 MB"`
pub fn format_size(bytes: u64) -> String {
    let mb = bytes as f64 / 1_048_576.0;
    if mb >= 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{:.2} MB", mb)
    }
}

/// Merge base headers, caller overrides and the platform's default cookies.
///
/// Looks for `{cookies_dir}/{platform}_cookies.txt`. A Netscape cookie jar is
/// returned as a path for the backend; anything else is sent as a raw
/// `Cookie` header unless the caller already supplied one.
pub fn build_platform_headers(
    cookies_dir: &Path,
    platform: PlatformTag,
    base: &HeaderMap,
    overrides: &HeaderMap,
) -> (HeaderMap, Option<std::path::PathBuf>) {
    let mut headers = base.clone();
    headers.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

    let cookie_path = cookies_dir.join(format!("{}_cookies.txt", platform.as_str()));
    let contents = match std::fs::read_to_string(&cookie_path) {
        Ok(c) => c,
        Err(_) => return (headers, None),
    };
    let contents = contents.trim();
    if contents.is_empty() {
        return (headers, None);
    }

    if contents.starts_with("# Netscape HTTP Cookie File") || contents.starts_with("# HTTP Cookie File") {
        return (headers, Some(cookie_path));
    }

    let has_cookie = headers.keys().any(|k| k.eq_ignore_ascii_case("cookie"));
    if !has_cookie {
        headers.insert("Cookie".to_string(), contents.to_string());
    }
    (headers, None)
}
