use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::downloader::errors::DownloadError;
use crate::downloader::format_selector::FormatSelector;
use crate::downloader::models::{
    ExtractRequest, ExtractedInfo, HeaderMap, ProgressUpdate, TransferOutcome, TransferRequest,
};
use crate::downloader::traits::{PlatformBackend, ProgressSink};
use crate::downloader::utils;
use crate::jobs::cancel::CancelToken;

const REPORT_INTERVAL: Duration = Duration::from_millis(250);

/// Resolved single-file stream
#[derive(Debug, Clone)]
struct ResolvedStream {
    url: String,
    ext: String,
    title: Option<String>,
    headers: HeaderMap,
}

/// Streams a single pre-muxed file over HTTP.
///
/// The stream URL comes from yt-dlp's resolver (`-j -f <selector>`); selectors
/// that need a merge are rejected as `FormatUnavailable`. URLs that already
/// point at a media file are streamed as-is.
pub struct DirectHttpBackend {
    resolver_path: String,
    resolve_timeout_secs: u64,
}

impl DirectHttpBackend {
    pub fn new(resolver_path: &str, resolve_timeout_secs: u64) -> Self {
        Self {
            resolver_path: resolver_path.to_string(),
            resolve_timeout_secs,
        }
    }

    fn client(proxy: Option<&str>) -> Result<reqwest::Client, DownloadError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36");
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| DownloadError::Internal(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| DownloadError::Internal(format!("Failed to build HTTP client: {}", e)))
    }

    /// HEAD the URL; returns the extension when it serves audio or video directly
    async fn head_media_ext(client: &reqwest::Client, url: &str) -> Option<String> {
        let resp = client.head(url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let content_type = resp.headers().get(CONTENT_TYPE)?.to_str().ok()?.to_ascii_lowercase();
        mime_to_ext(&content_type).map(String::from)
    }

    async fn resolve(
        &self,
        request: &TransferRequest,
        selector: &str,
        client: &reqwest::Client,
        cancel: &CancelToken,
    ) -> Result<ResolvedStream, DownloadError> {
        if let Some(ext) = Self::head_media_ext(client, &request.url).await {
            return Ok(ResolvedStream {
                url: request.url.clone(),
                ext,
                title: None,
                headers: request.headers.clone(),
            });
        }

        let mut args = vec![
            "-j".to_string(),
            "--no-playlist".to_string(),
            "-f".to_string(),
            selector.to_string(),
        ];
        for (name, value) in &request.headers {
            args.push("--add-header".to_string());
            args.push(format!("{}:{}", name, value));
        }
        if let Some(path) = &request.cookie_file {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        if let Some(proxy) = &request.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args.push(request.url.clone());

        let output =
            utils::run_output_with_timeout(&self.resolver_path, args, self.resolve_timeout_secs, Some(cancel))
                .await?;
        if !output.status.success() {
            return Err(DownloadError::classify(&String::from_utf8_lossy(&output.stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let json: Value = serde_json::from_str(stdout.trim())
            .map_err(|e| DownloadError::Internal(format!("JSON parse error: {}", e)))?;
        resolved_from_json(&json, &request.headers)
    }

    async fn stream(
        &self,
        request: &TransferRequest,
        selector: &str,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError> {
        sink.checkpoint()?;
        let client = Self::client(request.proxy.as_deref())?;
        let resolved = self.resolve(request, selector, &client, sink.cancel_token()).await?;
        sink.checkpoint()?;

        let mut req = client.get(&resolved.url);
        for (name, value) in &resolved.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                req = req.header(n, v);
            }
        }

        let resp = req.send().await?.error_for_status()?;
        let total = resp.content_length();

        let final_path = request.output.path_with_ext(&resolved.ext);
        let part_path = PathBuf::from(format!("{}.part", final_path.display()));
        let mut file = tokio::fs::File::create(&part_path).await?;

        let started = Instant::now();
        let mut last_report: Option<Instant> = None;
        let mut downloaded: u64 = 0;
        let mut body = resp.bytes_stream();

        while let Some(chunk) = body.next().await {
            sink.checkpoint()?;
            let chunk = chunk.map_err(|e| {
                DownloadError::TransferFailed(format!("connection lost after {} bytes: {}", downloaded, e))
            })?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            let elapsed = started.elapsed().as_secs_f64().max(0.001);
            if last_report.map_or(true, |t| t.elapsed() >= REPORT_INTERVAL) {
                last_report = Some(Instant::now());
                sink.report(ProgressUpdate::from_bytes(downloaded, total, downloaded as f64 / elapsed))?;
            }

            if let Some(limit) = request.bandwidth_limit.filter(|l| *l > 0) {
                let expected = downloaded as f64 / limit as f64;
                if expected > elapsed {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs_f64(expected - elapsed)) => {}
                        _ = sink.cancel_token().cancelled() => return Err(DownloadError::Cancelled),
                    }
                }
            }
        }

        file.flush().await?;
        drop(file);

        if let Some(expected) = total {
            if downloaded < expected {
                return Err(DownloadError::TransferFailed(format!(
                    "connection closed after {} of {} bytes",
                    downloaded, expected
                )));
            }
        }

        tokio::fs::rename(&part_path, &final_path).await?;
        sink.report(ProgressUpdate::from_bytes(downloaded, Some(downloaded), 0.0))?;

        Ok(TransferOutcome {
            path: final_path,
            title: resolved.title,
        })
    }
}

fn mime_to_ext(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    match mime {
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "video/quicktime" => Some("mov"),
        "video/x-matroska" => Some("mkv"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        "audio/mpeg" => Some("mp3"),
        "audio/webm" => Some("webm"),
        "audio/ogg" => Some("ogg"),
        _ => None,
    }
}

/// Pick the single stream out of a `yt-dlp -j -f` document
fn resolved_from_json(json: &Value, base_headers: &HeaderMap) -> Result<ResolvedStream, DownloadError> {
    if json.get("requested_formats").map_or(false, |f| f.is_array()) {
        return Err(DownloadError::FormatUnavailable(
            "selected format needs a merge step".to_string(),
        ));
    }

    let url = json["url"]
        .as_str()
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .ok_or_else(|| DownloadError::FormatUnavailable("no direct stream URL".to_string()))?;

    let ext = json["ext"].as_str().unwrap_or("mp4").to_string();

    let mut headers = base_headers.clone();
    if let Some(map) = json["http_headers"].as_object() {
        for (k, v) in map {
            if let Some(v) = v.as_str() {
                headers.entry(k.clone()).or_insert_with(|| v.to_string());
            }
        }
    }

    Ok(ResolvedStream {
        url: url.to_string(),
        ext,
        title: json["title"].as_str().map(String::from),
        headers,
    })
}

#[async_trait]
impl PlatformBackend for DirectHttpBackend {
    fn name(&self) -> &'static str {
        "direct-http"
    }

    /// Only handles URLs that already point at a media file
    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancelToken,
    ) -> Result<ExtractedInfo, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let client = Self::client(request.proxy.as_deref())?;
        let ext = Self::head_media_ext(&client, &request.url)
            .await
            .ok_or_else(|| DownloadError::UnsupportedLink("not a direct media URL".to_string()))?;

        let title = url::Url::parse(&request.url)
            .ok()
            .and_then(|u| u.path_segments().and_then(|s| s.last().map(String::from)))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("media.{}", ext));

        Ok(ExtractedInfo {
            title: Some(title),
            resolutions: vec!["source".to_string()],
            sizes: vec!["Unknown".to_string()],
            ..Default::default()
        })
    }

    async fn start_video(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError> {
        let selector = FormatSelector::single_file_selector(&request.quality);
        self.stream(request, &selector, sink).await
    }

    async fn start_audio(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError> {
        let selector = FormatSelector::audio_selector(&request.quality);
        self.stream(request, &selector, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merged_format_is_unavailable() {
        let doc = json!({"requested_formats": [{}, {}], "url": null});
        assert!(matches!(
            resolved_from_json(&doc, &HeaderMap::new()),
            Err(DownloadError::FormatUnavailable(_))
        ));
    }

    #[test]
    fn test_single_stream_resolution() {
        let mut base = HeaderMap::new();
        base.insert("Referer".into(), "mine".into());
        let doc = json!({
            "url": "https://cdn.example/v.mp4",
            "ext": "mp4",
            "title": "Clip",
            "http_headers": {"Referer": "theirs", "Accept": "*/*"}
        });
        let r = resolved_from_json(&doc, &base).unwrap();
        assert_eq!(r.url, "https://cdn.example/v.mp4");
        assert_eq!(r.title.as_deref(), Some("Clip"));
        assert_eq!(r.headers["Referer"], "mine");
        assert_eq!(r.headers["Accept"], "*/*");
    }

    #[test]
    fn test_mime_to_ext() {
        assert_eq!(mime_to_ext("video/mp4; charset=binary"), Some("mp4"));
        assert_eq!(mime_to_ext("audio/mpeg"), Some("mp3"));
        assert_eq!(mime_to_ext("text/html"), None);
    }

    use std::net::SocketAddr;

    use axum::http::header;
    use axum::routing::get;
    use axum::Router;
    use tokio::io::AsyncReadExt;

    use crate::downloader::models::OutputTarget;
    use crate::downloader::platform::PlatformTag;

    async fn serve_media(size: usize) -> SocketAddr {
        let router = Router::new().route(
            "/clip.mp4",
            get(move || async move { ([(header::CONTENT_TYPE, "video/mp4")], vec![7u8; size]) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        addr
    }

    /// Announces `claimed` bytes but hangs up after `sent`
    async fn serve_truncated(claimed: usize, sent: usize) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                let mut buf = [0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    claimed
                );
                let _ = socket.write_all(head.as_bytes()).await;
                if !buf[..n].starts_with(b"HEAD") {
                    let _ = socket.write_all(&vec![7u8; sent]).await;
                }
                let _ = socket.shutdown().await;
            }
        });
        addr
    }

    fn transfer(addr: SocketAddr, dir: &std::path::Path, bandwidth_limit: Option<u64>) -> TransferRequest {
        TransferRequest {
            url: format!("http://{}/clip.mp4", addr),
            platform: PlatformTag::Instagram,
            quality: "720p".into(),
            audio_lang: None,
            bandwidth_limit,
            headers: HeaderMap::new(),
            cookie_file: None,
            proxy: None,
            output: OutputTarget {
                dir: dir.to_path_buf(),
                stem: "video_0123456789ab".into(),
            },
        }
    }

    fn backend() -> DirectHttpBackend {
        DirectHttpBackend::new("/nonexistent/yt-dlp", 5)
    }

    #[tokio::test]
    async fn test_extract_direct_media_url() {
        let addr = serve_media(1024).await;
        let request = ExtractRequest {
            url: format!("http://{}/clip.mp4", addr),
            platform: PlatformTag::Instagram,
            headers: HeaderMap::new(),
            cookie_file: None,
            proxy: None,
        };
        let info = backend().extract(&request, &CancelToken::new()).await.unwrap();
        assert_eq!(info.title.as_deref(), Some("clip.mp4"));
        assert_eq!(info.resolutions, vec!["source".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_completes_and_renames_part_file() {
        let addr = serve_media(100_000).await;
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let sink = ProgressSink::new(tx, CancelToken::new());

        let outcome = backend()
            .start_video(&transfer(addr, dir.path(), None), &sink)
            .await
            .unwrap();

        assert_eq!(outcome.path, dir.path().join("video_0123456789ab.mp4"));
        assert_eq!(std::fs::metadata(&outcome.path).unwrap().len(), 100_000);
        assert!(!dir.path().join("video_0123456789ab.mp4.part").exists());

        let mut last = None;
        while let Ok(update) = rx.try_recv() {
            last = Some(update);
        }
        let last = last.unwrap();
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.downloaded_bytes, Some(100_000));
    }

    #[tokio::test]
    async fn test_stream_honours_bandwidth_limit() {
        let addr = serve_media(32 * 1024).await;
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let sink = ProgressSink::new(tx, CancelToken::new());

        let started = Instant::now();
        backend()
            .start_video(&transfer(addr, dir.path(), Some(32 * 1024)), &sink)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(900), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_cancel_while_throttled() {
        let addr = serve_media(256 * 1024).await;
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let token = CancelToken::new();
        let sink = ProgressSink::new(tx, token.clone());
        let request = transfer(addr, dir.path(), Some(16 * 1024));
        let backend = backend();

        let stream = backend.start_video(&request, &sink);
        tokio::pin!(stream);
        tokio::select! {
            update = rx.recv() => assert!(update.unwrap().downloaded_bytes.unwrap() > 0),
            _ = &mut stream => panic!("transfer finished before the first chunk was reported"),
        }
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), stream)
            .await
            .expect("cancel was not observed");
        assert_eq!(result.unwrap_err(), DownloadError::Cancelled);
        assert!(!dir.path().join("video_0123456789ab.mp4").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let addr = serve_media(1024).await;
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let token = CancelToken::new();
        token.cancel();
        let sink = ProgressSink::new(tx, token);
        assert_eq!(
            backend()
                .start_audio(&transfer(addr, dir.path(), None), &sink)
                .await
                .unwrap_err(),
            DownloadError::Cancelled
        );
    }

    #[tokio::test]
    async fn test_short_body_is_transfer_failure() {
        let addr = serve_truncated(10_000, 1_000).await;
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let sink = ProgressSink::new(tx, CancelToken::new());

        let err = backend()
            .start_video(&transfer(addr, dir.path(), None), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::TransferFailed(_)), "{:?}", err);
        assert!(!dir.path().join("video_0123456789ab.mp4").exists());
    }
}
