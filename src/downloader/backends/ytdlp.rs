use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::downloader::errors::DownloadError;
use crate::downloader::format_selector::FormatSelector;
use crate::downloader::models::{
    ExtractRequest, ExtractedInfo, HeaderMap, OutputTarget, TransferOutcome, TransferRequest,
};
use crate::downloader::traits::{PlatformBackend, ProgressSink};
use crate::downloader::utils;
use crate::jobs::cancel::CancelToken;

// Markers for the lines we ask yt-dlp to print after the final move
const PATH_MARKER: &str = "[broker:path] ";
const TITLE_MARKER: &str = "[broker:title] ";
const STDERR_TAIL_LINES: usize = 40;

/// Runs the yt-dlp CLI as a child process
pub struct YtDlpBackend {
    binary_path: String,
    extract_timeout_secs: u64,
}

impl YtDlpBackend {
    pub fn new(binary_path: &str, extract_timeout_secs: u64) -> Self {
        Self {
            binary_path: binary_path.to_string(),
            extract_timeout_secs,
        }
    }

    fn network_args(
        headers: &HeaderMap,
        cookie_file: Option<&Path>,
        proxy: Option<&str>,
    ) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-update".to_string(),
            "--socket-timeout".to_string(),
            "30".to_string(),
            "--retries".to_string(),
            "5".to_string(),
            "--fragment-retries".to_string(),
            "10".to_string(),
        ];

        let mut names: Vec<&String> = headers.keys().collect();
        names.sort();
        for name in names {
            args.push("--add-header".to_string());
            args.push(format!("{}:{}", name, headers[name]));
        }

        if let Some(path) = cookie_file {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().into_owned());
        }

        if let Some(proxy_url) = proxy {
            args.push("--proxy".to_string());
            args.push(proxy_url.to_string());
        }

        args
    }

    fn transfer_args(request: &TransferRequest, format: &str) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            format.to_string(),
            "--newline".to_string(),
            "--no-simulate".to_string(),
            "--progress".to_string(),
            "--no-part".to_string(),
            "-o".to_string(),
            output_template(&request.output),
            "--print".to_string(),
            format!("after_move:{}%(filepath)s", PATH_MARKER),
            "--print".to_string(),
            format!("after_move:{}%(title)s", TITLE_MARKER),
        ];

        args.extend(Self::network_args(
            &request.headers,
            request.cookie_file.as_deref(),
            request.proxy.as_deref(),
        ));

        if let Some(rate) = request.bandwidth_limit {
            args.push("--limit-rate".to_string());
            args.push(rate.to_string());
        }

        args
    }

    /// Spawn yt-dlp and stream its stdout into the sink, one poll per line
    async fn run_transfer(
        &self,
        mut args: Vec<String>,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError> {
        sink.checkpoint()?;
        args.push(request.url.clone());

        tracing::debug!(binary = %self.binary_path, url = %request.url, "spawning yt-dlp");

        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloadError::Internal(format!("Failed to start yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Internal("Failed to capture yt-dlp stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Internal("Failed to capture yt-dlp stderr".to_string()))?;

        // Keep only the tail of stderr; that's where yt-dlp puts the ERROR line
        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail).join("\n")
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut final_path: Option<PathBuf> = None;
        let mut title: Option<String> = None;
        let cancel = sink.cancel_token();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = cancel.cancelled() => {
                    tracing::info!(url = %request.url, "cancel observed, killing yt-dlp");
                    let _ = child.kill().await;
                    stderr_task.abort();
                    return Err(DownloadError::Cancelled);
                }
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "yt-dlp stdout read failed");
                    break;
                }
            };

            if let Err(e) = sink.checkpoint() {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(e);
            }

            if let Some(path) = line.strip_prefix(PATH_MARKER) {
                final_path = Some(PathBuf::from(path.trim()));
            } else if let Some(t) = line.strip_prefix(TITLE_MARKER) {
                let t = t.trim();
                if !t.is_empty() && t != "NA" {
                    title = Some(t.to_string());
                }
            } else if let Some(update) = utils::parse_ytdlp_progress(&line) {
                sink.report(update)?;
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadError::Internal(format!("yt-dlp wait failed: {}", e)))?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        sink.checkpoint()?;

        if !status.success() {
            tracing::debug!(code = ?status.code(), stderr = %stderr_output, "yt-dlp exited with failure");
            return Err(DownloadError::classify(&stderr_output));
        }

        let path = match final_path.filter(|p| p.is_file()) {
            Some(p) => p,
            None => find_by_stem(&request.output).ok_or_else(|| {
                DownloadError::Internal("yt-dlp reported success but produced no file".to_string())
            })?,
        };

        Ok(TransferOutcome { path, title })
    }
}

fn output_template(output: &OutputTarget) -> String {
    output
        .dir
        .join(format!("{}.%(ext)s", output.stem))
        .to_string_lossy()
        .into_owned()
}

/// Locate `{stem}.{ext}` in the output directory, skipping partial files
fn find_by_stem(output: &OutputTarget) -> Option<PathBuf> {
    let prefix = format!("{}.", output.stem);
    let entries = std::fs::read_dir(&output.dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .find(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
            name.starts_with(&prefix)
                && !name.ends_with(".part")
                && !name.ends_with(".ytdl")
                && !name.contains(".temp.")
        })
}

#[async_trait]
impl PlatformBackend for YtDlpBackend {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancelToken,
    ) -> Result<ExtractedInfo, DownloadError> {
        let mut args = vec!["--dump-json".to_string(), "--skip-download".to_string()];
        args.extend(Self::network_args(
            &request.headers,
            request.cookie_file.as_deref(),
            request.proxy.as_deref(),
        ));
        args.push(request.url.clone());

        let output = utils::run_output_with_timeout(
            &self.binary_path,
            args,
            self.extract_timeout_secs,
            Some(cancel),
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DownloadError::classify(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first = stdout.lines().find(|l| l.trim_start().starts_with('{')).ok_or_else(|| {
            DownloadError::Internal("yt-dlp returned no metadata document".to_string())
        })?;
        let json: serde_json::Value = serde_json::from_str(first)
            .map_err(|e| DownloadError::Internal(format!("JSON parse error: {}", e)))?;

        Ok(FormatSelector::from_info_json(&json))
    }

    async fn start_video(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError> {
        let format = FormatSelector::video_selector(&request.quality, request.audio_lang.as_deref());
        let mut args = Self::transfer_args(request, &format);
        args.push("--merge-output-format".to_string());
        args.push("mp4".to_string());
        self.run_transfer(args, request, sink).await
    }

    async fn start_audio(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError> {
        let format = FormatSelector::audio_selector(&request.quality);
        let mut args = Self::transfer_args(request, &format);
        args.extend([
            "-x".to_string(),
            "--audio-format".to_string(),
            "mp3".to_string(),
            "--audio-quality".to_string(),
            FormatSelector::audio_quality(&request.quality),
        ]);
        self.run_transfer(args, request, sink).await
    }
}
