//! HTTP-facing error type.
//!
//! Handlers return `Result<T, ServerError>`. Request-level problems map to
//! 4xx/503 with the message exposed; internal failures are logged in full and
//! the caller only sees a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::downloader::errors::DownloadError;
use crate::jobs::history::HistoryError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The caller referenced a job, history entry or file that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or malformed request fields, unsupported platform.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Admission control is full.
    #[error("service unavailable: {0}")]
    Busy(String),

    #[error("history error: {0}")]
    History(#[from] HistoryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Busy(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),

            ServerError::History(e) => {
                error!(error = %e, "history store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<DownloadError> for ServerError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::InvalidRequest(m) => ServerError::BadRequest(m),
            e @ DownloadError::UnsupportedPlatform(_) => ServerError::BadRequest(e.user_message()),
            DownloadError::Busy(m) => ServerError::Busy(m),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}
