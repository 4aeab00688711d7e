// Common data models for jobs, metadata and history

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::platform::PlatformTag;

/// What a download job produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    #[default]
    Video,
    Audio,
}

impl JobKind {
    /// Filename prefix for generated artifacts
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Extracting,
    Ready,
    Starting,
    Downloading,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Ready => "ready",
            Self::Starting => "starting",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record for one job, as returned by `GET /status/<id>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub platform: PlatformTag,
    pub requested_quality: Option<String>,
    pub status: JobStatus,
    pub progress: f32,
    pub speed: String,
    pub eta: Option<String>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub title: Option<String>,
    pub filename: Option<String>,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl JobRecord {
    /// Implicit record for an id nothing has written yet
    pub fn pending(id: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.to_string(),
            kind: JobKind::Video,
            platform: PlatformTag::Unknown,
            requested_quality: None,
            status: JobStatus::Pending,
            progress: 0.0,
            speed: "0KB/s".to_string(),
            eta: None,
            downloaded_bytes: None,
            total_bytes: None,
            title: None,
            filename: None,
            output_url: None,
            error: None,
            message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Shallow partial update. `None` keeps the previous value.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub kind: Option<JobKind>,
    pub platform: Option<PlatformTag>,
    pub requested_quality: Option<String>,
    pub status: Option<JobStatus>,
    pub progress: Option<f32>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub title: Option<String>,
    pub filename: Option<String>,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn completed(output_url: String, filename: String) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100.0),
            speed: Some("0KB/s".to_string()),
            output_url: Some(output_url),
            filename: Some(filename),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Cancelled),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Patch produced by a progress snapshot; moves the job into `downloading`
    pub fn from_progress(p: &ProgressUpdate) -> Self {
        Self {
            status: Some(JobStatus::Downloading),
            progress: Some(p.percent.clamp(0.0, 100.0)),
            speed: Some(p.speed.clone()),
            eta: p.eta.clone(),
            downloaded_bytes: p.downloaded_bytes,
            total_bytes: p.total_bytes,
            message: p.message.clone(),
            ..Default::default()
        }
    }
}

/// Progress snapshot pushed by a backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f32,
    pub speed: String,
    pub eta: Option<String>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn percent(percent: f32, speed: impl Into<String>) -> Self {
        Self {
            percent,
            speed: speed.into(),
            eta: None,
            downloaded_bytes: None,
            total_bytes: None,
            message: None,
        }
    }

    /// Snapshot from byte counters, the way chunked transfers report
    pub fn from_bytes(downloaded: u64, total: Option<u64>, bytes_per_sec: f64) -> Self {
        let percent = match total {
            Some(t) if t > 0 => (downloaded as f64 / t as f64 * 100.0) as f32,
            _ => 0.0,
        };
        Self {
            percent,
            speed: format!("{:.1}KB/s", bytes_per_sec / 1024.0),
            eta: None,
            downloaded_bytes: Some(downloaded),
            total_bytes: total,
            message: None,
        }
    }
}

/// Request headers merged for a backend call
pub type HeaderMap = HashMap<String, String>;

/// Input to a metadata extraction
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub url: String,
    pub platform: PlatformTag,
    pub headers: HeaderMap,
    pub cookie_file: Option<PathBuf>,
    pub proxy: Option<String>,
}

/// Where a backend writes its artifact. The backend picks the extension.
#[derive(Debug, Clone)]
pub struct OutputTarget {
    pub dir: PathBuf,
    pub stem: String,
}

impl OutputTarget {
    pub fn path_with_ext(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.stem, ext))
    }
}

/// Input to a download backend
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub platform: PlatformTag,
    /// Resolution label (`"720p"`) for video, bitrate (`"192"`) for audio
    pub quality: String,
    pub audio_lang: Option<String>,
    /// Bytes per second
    pub bandwidth_limit: Option<u64>,
    pub headers: HeaderMap,
    pub cookie_file: Option<PathBuf>,
    pub proxy: Option<String>,
    pub output: OutputTarget,
}

/// What a successful transfer produced
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub path: PathBuf,
    pub title: Option<String>,
}

/// Raw extraction result, before the runner validates it
#[derive(Debug, Clone, Default)]
pub struct ExtractedInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    pub duration: Option<f64>,
    pub resolutions: Vec<String>,
    pub sizes: Vec<String>,
    pub audio_formats: Vec<AudioFormat>,
    pub audio_dubs: Vec<AudioDub>,
    /// Explicit error reported inside an otherwise well-formed document
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioFormat {
    pub label: String,
    pub abr: Option<f64>,
    pub size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioDub {
    pub lang: String,
    pub label: String,
}

/// Metadata document returned by `POST /fetch_info`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaMetadata {
    pub download_id: String,
    pub platform: PlatformTag,
    pub title: String,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    pub duration: f64,
    pub video_url: String,
    pub resolutions: Vec<String>,
    pub sizes: Vec<String>,
    #[serde(rename = "audioFormats")]
    pub audio_formats: Vec<AudioFormat>,
    pub audio_dubs: Vec<AudioDub>,
}

/// Outcome of a metadata request
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataReply {
    Ready(MediaMetadata),
    Failed { error: String, download_id: String },
}

/// Validated download submission
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub kind: JobKind,
    pub quality: String,
    pub audio_lang: Option<String>,
    pub bandwidth_limit: Option<String>,
    pub headers: HeaderMap,
}

/// Immutable record of a finished job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub title: String,
    pub platform: String,
    pub resolution: String,
    pub size: String,
    pub status: String,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Downloading.is_terminal());
        assert!(!JobStatus::Ready.is_terminal());
    }

    #[test]
    fn test_progress_patch_clamps_percent() {
        let patch = JobPatch::from_progress(&ProgressUpdate::percent(140.0, "1KB/s"));
        assert_eq!(patch.progress, Some(100.0));
        assert_eq!(patch.status, Some(JobStatus::Downloading));
    }

    #[test]
    fn test_progress_from_bytes() {
        let p = ProgressUpdate::from_bytes(512, Some(1024), 2048.0);
        assert_eq!(p.percent, 50.0);
        assert_eq!(p.speed, "2.0KB/s");
        let unknown = ProgressUpdate::from_bytes(512, None, 0.0);
        assert_eq!(unknown.percent, 0.0);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn test_failed_reply_shape() {
        let reply = MetadataReply::Failed {
            error: "boom".into(),
            download_id: "abc".into(),
        };
        let v = serde_json::to_value(&reply).unwrap();
        assert_eq!(v["error"], "boom");
        assert_eq!(v["download_id"], "abc");
    }
}
