// Error types for platform backends and the job runner

use thiserror::Error;

/// Every failure a job can end with, plus the two request-level rejections
/// (`InvalidRequest`, `Busy`) that happen before a job exists.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownloadError {
    /// No backend is registered for the URL's platform.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Login, CAPTCHA or session wall detected.
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Supported platform, but the URL is not an individual media resource.
    #[error("Unsupported link: {0}")]
    UnsupportedLink(String),

    /// Requested quality/bitrate is not offered by the source.
    #[error("Format unavailable: {0}")]
    FormatUnavailable(String),

    /// Network or codec failure during transfer.
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// User-initiated abort (or a synthesized timeout signal).
    #[error("Cancelled by user")]
    Cancelled,

    /// Anything uncategorized. The detail stays server-side.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Malformed request (missing url, missing quality).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Admission control rejected the job.
    #[error("Server busy: {0}")]
    Busy(String),
}

impl DownloadError {
    /// Map free-form backend output (yt-dlp stderr, HTTP client errors) to a category.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        let detail = first_meaningful_line(text);

        if AUTH_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::AuthRequired(detail);
        }

        if LINK_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::UnsupportedLink(detail);
        }

        if FORMAT_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::FormatUnavailable(detail);
        }

        if TRANSFER_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::TransferFailed(detail);
        }

        // Missing postprocessors and everything else
        Self::Internal(detail)
    }

    /// Terminal errors that a fallback chain must not paper over.
    pub fn is_terminal_for_chain(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::UnsupportedPlatform(_) | Self::InvalidRequest(_)
        )
    }

    /// Stable category name, used in logs and history.
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnsupportedPlatform(_) => "unsupported_platform",
            Self::AuthRequired(_) => "auth_required",
            Self::UnsupportedLink(_) => "unsupported_link",
            Self::FormatUnavailable(_) => "format_unavailable",
            Self::TransferFailed(_) => "transfer_failed",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Busy(_) => "busy",
        }
    }

    /// Short message stored in `JobRecord.error`.
    pub fn user_message(&self) -> String {
        match self {
            Self::UnsupportedPlatform(p) => format!("Unsupported platform: {}", p),
            Self::AuthRequired(_) => {
                "Login required. Supply session cookies for this platform and retry.".to_string()
            }
            Self::UnsupportedLink(_) => {
                "This link is not an individual video or post.".to_string()
            }
            Self::FormatUnavailable(_) => {
                "The requested quality is not available for this media.".to_string()
            }
            Self::TransferFailed(_) => "Download failed due to a network error.".to_string(),
            Self::Cancelled => "Download cancelled".to_string(),
            Self::Internal(_) => "Internal error while processing the request.".to_string(),
            Self::InvalidRequest(m) => m.clone(),
            Self::Busy(m) => m.clone(),
        }
    }
}

// Convert from String for backends that only have text to go on
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        Self::classify(&s)
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(format!("io: {}", e))
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            return Self::TransferFailed(e.to_string());
        }
        if let Some(status) = e.status() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Self::AuthRequired(e.to_string());
            }
            return Self::TransferFailed(e.to_string());
        }
        Self::Internal(e.to_string())
    }
}

const AUTH_PATTERNS: &[&str] = &[
    "login required",
    "log in",
    "login to",
    "sign in",
    "captcha",
    "use --cookies",
    "cookies-from-browser",
    "confirm your age",
    "private video",
    "this video is private",
    "members only",
    "members-only",
    "requires authentication",
    "rate-limit reached or login required",
];

const LINK_PATTERNS: &[&str] = &[
    "unsupported url",
    "is not a valid url",
    "no video could be found",
    "there is no video in this post",
    "not a video",
    "is a playlist",
];

const FORMAT_PATTERNS: &[&str] = &[
    "requested format is not available",
    "no video formats found",
    "format not available",
    "drm",
    "widevine",
];

const TRANSFER_PATTERNS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "unable to download",
    "http error",
    "network is unreachable",
    "temporary failure in name resolution",
    "incomplete read",
];

/// First `ERROR:` line if present, otherwise the last non-empty line.
fn first_meaningful_line(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| text.lines().rev().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("unknown error");
    line.chars().take(300).collect()
}
