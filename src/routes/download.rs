//! Metadata extraction, download submission, cancellation and job status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::downloader::models::{DownloadRequest, HeaderMap, JobKind, JobRecord, MetadataReply};
use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/fetch_info",   post(fetch_info))
        .route("/extract",      post(fetch_info))
        .route("/download",     post(start_download))
        .route("/cancel/{id}",  post(cancel_download))
        .route("/status",       get(list_statuses))
        .route("/status/{id}",  get(get_status))
}

#[derive(Debug, Deserialize)]
pub struct FetchInfoBody {
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HeaderMap,
}

#[derive(Debug, Deserialize)]
pub struct DownloadBody {
    pub url: Option<String>,
    /// Bitrate for audio, resolution label for video
    pub quality: Option<String>,
    /// Older clients send the video resolution under this name
    pub resolution: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub audio_lang: Option<String>,
    pub bandwidth_limit: Option<String>,
    #[serde(default)]
    pub headers: HeaderMap,
}

impl DownloadBody {
    fn into_request(self) -> Result<DownloadRequest, ServerError> {
        let kind = match self.kind.as_deref().map(str::trim) {
            None | Some("") | Some("video") => JobKind::Video,
            Some("audio") => JobKind::Audio,
            Some(other) => {
                return Err(ServerError::BadRequest(format!("Invalid download type: {}", other)))
            }
        };
        Ok(DownloadRequest {
            url: self.url.unwrap_or_default(),
            kind,
            quality: self.quality.or(self.resolution).unwrap_or_default(),
            audio_lang: self.audio_lang,
            bandwidth_limit: self.bandwidth_limit,
            headers: self.headers,
        })
    }
}

/// Extract metadata for a URL. Extraction failures come back as
/// `{error, download_id}` with HTTP 200.
pub async fn fetch_info(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FetchInfoBody>,
) -> Result<Json<MetadataReply>, ServerError> {
    let url = body.url.unwrap_or_default();
    let reply = state.runner.fetch_info(&url, &body.headers).await?;
    Ok(Json(reply))
}

pub async fn start_download(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DownloadBody>,
) -> Result<Json<Value>, ServerError> {
    let request = body.into_request()?;
    let id = state.runner.submit(request)?;
    Ok(Json(json!({ "download_id": id, "status": "started" })))
}

pub async fn cancel_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    if !state.runner.cancel(&id) {
        info!(job_id = %id, "cancel for unknown or finished job");
        return Err(ServerError::BadRequest(
            "Invalid download ID or already finished".to_owned(),
        ));
    }
    Ok(Json(json!({ "status": "cancelled" })))
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ServerError> {
    state
        .runner
        .status(&id)
        .map(Json)
        .ok_or_else(|| ServerError::NotFound("Invalid download ID".to_owned()))
}

pub async fn list_statuses(State(state): State<Arc<AppState>>) -> Json<Vec<JobRecord>> {
    Json(state.runner.statuses())
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn body(kind: Option<&str>) -> DownloadBody {
        DownloadBody {
            url: Some("https://youtu.be/x".into()),
            quality: None,
            resolution: Some("720p".into()),
            kind: kind.map(String::from),
            audio_lang: None,
            bandwidth_limit: None,
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_resolution_alias_and_default_kind() {
        let req = body(None).into_request().unwrap();
        assert_eq!(req.kind, JobKind::Video);
        assert_eq!(req.quality, "720p");
    }

    #[test]
    fn test_quality_wins_over_resolution() {
        let mut b = body(Some("audio"));
        b.quality = Some("192".into());
        let req = b.into_request().unwrap();
        assert_eq!(req.kind, JobKind::Audio);
        assert_eq!(req.quality, "192");
    }

    #[test]
    fn test_unknown_kind_is_bad_request() {
        assert!(matches!(
            body(Some("podcast")).into_request(),
            Err(ServerError::BadRequest(_))
        ));
    }
}
