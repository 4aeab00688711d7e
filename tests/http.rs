// HTTP surface exercised through the axum router without a socket

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use media_broker::config::Config;
use media_broker::downloader::errors::DownloadError;
use media_broker::downloader::models::{
    ExtractRequest, ExtractedInfo, ProgressUpdate, TransferOutcome, TransferRequest,
};
use media_broker::downloader::platform::PlatformTag;
use media_broker::downloader::registry::BackendRegistry;
use media_broker::downloader::tools::ToolManager;
use media_broker::downloader::traits::{PlatformBackend, ProgressSink};
use media_broker::jobs::cancel::CancelToken;
use media_broker::jobs::history::HistoryStore;
use media_broker::jobs::runner::JobRunner;
use media_broker::routes;
use media_broker::state::AppState;

const PUBLIC_URL: &str = "http://broker.test";

/// Writes a fixed payload after a couple of progress ticks
struct InstantBackend;

#[async_trait]
impl PlatformBackend for InstantBackend {
    fn name(&self) -> &'static str {
        "instant"
    }

    async fn extract(
        &self,
        _request: &ExtractRequest,
        _cancel: &CancelToken,
    ) -> Result<ExtractedInfo, DownloadError> {
        Ok(ExtractedInfo {
            title: Some("Clip".into()),
            resolutions: vec!["720p".into()],
            sizes: vec!["Unknown".into()],
            ..Default::default()
        })
    }

    async fn start_video(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError> {
        sink.report(ProgressUpdate::percent(50.0, "1.0KB/s"))?;
        let path = request.output.path_with_ext("mp4");
        tokio::fs::write(&path, vec![1u8; 2048]).await?;
        Ok(TransferOutcome {
            path,
            title: Some("Clip".into()),
        })
    }

    async fn start_audio(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError> {
        sink.checkpoint()?;
        let path = request.output.path_with_ext("mp3");
        tokio::fs::write(&path, vec![2u8; 512]).await?;
        Ok(TransferOutcome { path, title: None })
    }
}

fn app() -> (Router, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::from_env();
    config.public_url = PUBLIC_URL.to_string();
    config.video_dir = dir.path().join("videos");
    config.audio_dir = dir.path().join("audios");
    config.cookies_dir = dir.path().join("cookies");
    config.history_file = dir.path().join("history.json");
    config.job_timeout_secs = 0;

    let mut registry = BackendRegistry::new();
    registry.register(PlatformTag::Youtube, Arc::new(InstantBackend));
    let history = Arc::new(HistoryStore::new(config.history_file.clone(), 50));
    let runner = JobRunner::new(config.runner(), registry, history);

    let state = Arc::new(AppState::new(config, runner, ToolManager::new()));
    (routes::build(state), dir)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Bytes) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(v) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes)
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn wait_until_terminal(app: &Router, id: &str) -> Value {
    for _ in 0..500 {
        let (status, body) = send_json(app, Method::GET, &format!("/status/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        if matches!(body["status"].as_str(), Some("completed" | "error" | "cancelled")) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never finished", id);
}

#[tokio::test]
async fn test_health() {
    let (app, _dir) = app();
    let (status, body) = send_json(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["active_jobs"], 0);
}

#[tokio::test]
async fn test_stub_routes_return_no_content() {
    let (app, _dir) = app();
    for uri in ["/favicon.ico", "/robots.txt", "/ads.txt"] {
        let (status, bytes) = send(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT, "{}", uri);
        assert!(bytes.is_empty());
    }
}

#[tokio::test]
async fn test_download_requires_url_and_quality() {
    let (app, _dir) = app();

    let (status, body) =
        send_json(&app, Method::POST, "/download", Some(json!({ "resolution": "720p" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "URL is required");

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/download",
        Some(json!({ "url": "https://youtu.be/abc", "type": "audio" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Audio quality is required");
}

#[tokio::test]
async fn test_download_unknown_platform_is_bad_request() {
    let (app, _dir) = app();
    let (status, body) = send_json(
        &app,
        Method::POST,
        "/download",
        Some(json!({ "url": "https://example.com/video", "resolution": "720p" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Unsupported platform: unknown");
}

#[tokio::test]
async fn test_cancel_and_status_for_unknown_id() {
    let (app, _dir) = app();

    let (status, body) = send_json(&app, Method::POST, "/cancel/does-not-exist", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid download ID"));

    let (status, body) = send_json(&app, Method::GET, "/status/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Invalid download ID");
}

#[tokio::test]
async fn test_fetch_info_and_extract_alias() {
    let (app, _dir) = app();
    for uri in ["/fetch_info", "/extract"] {
        let (status, body) = send_json(
            &app,
            Method::POST,
            uri,
            Some(json!({ "url": "https://www.youtube.com/watch?v=abc" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Clip");
        assert_eq!(body["platform"], "youtube");
        assert_eq!(body["resolutions"], json!(["720p"]));
        assert!(body["audioFormats"].is_array());

        let id = body["download_id"].as_str().unwrap();
        let (_, record) = send_json(&app, Method::GET, &format!("/status/{}", id), None).await;
        assert_eq!(record["status"], "ready");
    }

    let (status, _) = send_json(&app, Method::POST, "/fetch_info", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_lifecycle() {
    let (app, _dir) = app();

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/download",
        Some(json!({ "url": "https://youtu.be/abc", "resolution": "720p" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    let id = body["download_id"].as_str().unwrap().to_string();

    let record = wait_until_terminal(&app, &id).await;
    assert_eq!(record["status"], "completed");
    let filename = record["filename"].as_str().unwrap().to_string();
    assert_eq!(
        record["output_url"],
        format!("{}/media/{}", PUBLIC_URL, filename)
    );
    assert!(record["error"].is_null());

    // Artifact is served under both routes
    for prefix in ["/media", "/videos"] {
        let (status, bytes) = send(&app, Method::GET, &format!("{}/{}", prefix, filename), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes.len(), 2048);
    }
    let (status, _) = send(&app, Method::GET, &format!("/audios/{}", filename), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, history) = send_json(&app, Method::GET, "/history", None).await;
    assert_eq!(history[0]["id"], id.as_str());
    assert_eq!(history[0]["resolution"], "720p");

    let (_, listed) = send_json(&app, Method::GET, "/status", None).await;
    assert!(listed.as_array().unwrap().iter().any(|r| r["id"] == id.as_str()));

    let (status, _) = send_json(&app, Method::POST, &format!("/cancel/{}", id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send_json(&app, Method::DELETE, &format!("/history/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);
    let (status, _) = send_json(&app, Method::DELETE, &format!("/history/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_history_filters_and_clear() {
    let (app, _dir) = app();

    for _ in 0..3 {
        let (_, body) = send_json(
            &app,
            Method::POST,
            "/download",
            Some(json!({ "url": "https://youtu.be/abc", "quality": "128", "type": "audio" })),
        )
        .await;
        let id = body["download_id"].as_str().unwrap().to_string();
        wait_until_terminal(&app, &id).await;
    }

    let (_, body) = send_json(&app, Method::GET, "/history?platform=youtube", None).await;
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (_, body) = send_json(&app, Method::GET, "/history?limit=2", None).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, body) = send_json(&app, Method::GET, "/history?platform=tiktok", None).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = send_json(&app, Method::DELETE, "/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], true);
    let (_, body) = send_json(&app, Method::GET, "/history", None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_media_rejects_traversal_and_missing() {
    let (app, dir) = app();
    std::fs::write(dir.path().join("secret.txt"), b"nope").unwrap();

    let (status, _) = send(&app, Method::GET, "/media/..%2Fsecret.txt", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::GET, "/media/video_missing.mp4", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
