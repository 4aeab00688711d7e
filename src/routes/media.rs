//! Finished artifact download routes.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media/{filename}",  get(serve_media))
        .route("/videos/{filename}", get(serve_video))
        .route("/audios/{filename}", get(serve_audio))
}

/// Looks in the video directory, then the audio directory.
pub async fn serve_media(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ServerError> {
    let dirs = [state.config.video_dir.clone(), state.config.audio_dir.clone()];
    serve_from(&dirs, &filename).await
}

pub async fn serve_video(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ServerError> {
    serve_from(&[state.config.video_dir.clone()], &filename).await
}

pub async fn serve_audio(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ServerError> {
    serve_from(&[state.config.audio_dir.clone()], &filename).await
}

// ── private helpers ──────────────────────────────────────────────────────────

async fn serve_from(dirs: &[PathBuf], filename: &str) -> Result<Response, ServerError> {
    if !is_plain_filename(filename) {
        debug!(filename = %filename, "rejected artifact name");
        return Err(not_found());
    }

    for dir in dirs {
        let path = dir.join(filename);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| ServerError::Internal(format!("open {}: {}", path.display(), e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type_for(filename)));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(meta.len()));
        let disposition = format!("attachment; filename=\"{}\"", filename);
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_str(&disposition)
                .map_err(|_| ServerError::Internal("invalid content-disposition".to_owned()))?,
        );

        let body = Body::from_stream(ReaderStream::new(file));
        return Ok((headers, body).into_response());
    }

    Err(not_found())
}

fn not_found() -> ServerError {
    ServerError::NotFound("File not found".to_owned())
}

/// A single path component without separators, dots-only names or quotes.
fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '"', '\0'])
        && FsPath::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = FsPath::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "opus" | "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}
