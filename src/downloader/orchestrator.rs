// Fallback chain: one backend built from an ordered list of strategies

use async_trait::async_trait;

use super::errors::DownloadError;
use super::models::{ExtractRequest, ExtractedInfo, TransferOutcome, TransferRequest};
use super::traits::{PlatformBackend, ProgressSink};
use crate::jobs::cancel::CancelToken;

/// Tries each backend in order; the first success wins.
///
/// Errors that mean "stop" (cancellation, unsupported platform, bad request)
/// end the chain immediately. Otherwise the first backend's error is returned.
pub struct FallbackChain {
    name: &'static str,
    backends: Vec<Box<dyn PlatformBackend>>,
}

impl FallbackChain {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            backends: Vec::new(),
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn PlatformBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    fn exhausted(&self) -> DownloadError {
        DownloadError::Internal(format!("{}: no backends configured", self.name))
    }
}

#[async_trait]
impl PlatformBackend for FallbackChain {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancelToken,
    ) -> Result<ExtractedInfo, DownloadError> {
        let mut first_err: Option<DownloadError> = None;
        for backend in &self.backends {
            tracing::debug!(chain = self.name, backend = backend.name(), "trying extract");
            match backend.extract(request, cancel).await {
                Ok(info) => return Ok(info),
                Err(e) if e.is_terminal_for_chain() => return Err(e),
                Err(e) => {
                    tracing::warn!(chain = self.name, backend = backend.name(), error = %e, "extract failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        Err(first_err.unwrap_or_else(|| self.exhausted()))
    }

    async fn start_video(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError> {
        let mut first_err: Option<DownloadError> = None;
        for backend in &self.backends {
            sink.checkpoint()?;
            tracing::debug!(chain = self.name, backend = backend.name(), "trying video download");
            match backend.start_video(request, sink).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_terminal_for_chain() => return Err(e),
                Err(e) => {
                    tracing::warn!(chain = self.name, backend = backend.name(), error = %e, "video download failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        Err(first_err.unwrap_or_else(|| self.exhausted()))
    }

    async fn start_audio(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError> {
        let mut first_err: Option<DownloadError> = None;
        for backend in &self.backends {
            sink.checkpoint()?;
            tracing::debug!(chain = self.name, backend = backend.name(), "trying audio download");
            match backend.start_audio(request, sink).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_terminal_for_chain() => return Err(e),
                Err(e) => {
                    tracing::warn!(chain = self.name, backend = backend.name(), error = %e, "audio download failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        Err(first_err.unwrap_or_else(|| self.exhausted()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    use crate::downloader::models::OutputTarget;
    use crate::downloader::platform::PlatformTag;

    struct Scripted {
        result: Result<(), DownloadError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PlatformBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn extract(
            &self,
            _request: &ExtractRequest,
            _cancel: &CancelToken,
        ) -> Result<ExtractedInfo, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map(|_| ExtractedInfo {
                title: Some("ok".into()),
                ..Default::default()
            })
        }

        async fn start_video(
            &self,
            _request: &TransferRequest,
            _sink: &ProgressSink,
        ) -> Result<TransferOutcome, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map(|_| TransferOutcome {
                path: PathBuf::from("/tmp/out.mp4"),
                title: None,
            })
        }

        async fn start_audio(
            &self,
            request: &TransferRequest,
            sink: &ProgressSink,
        ) -> Result<TransferOutcome, DownloadError> {
            self.start_video(request, sink).await
        }
    }

    fn scripted(result: Result<(), DownloadError>) -> (Box<dyn PlatformBackend>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Scripted {
                result,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    fn request() -> TransferRequest {
        TransferRequest {
            url: "https://youtu.be/x".into(),
            platform: PlatformTag::Youtube,
            quality: "720p".into(),
            audio_lang: None,
            bandwidth_limit: None,
            headers: Default::default(),
            cookie_file: None,
            proxy: None,
            output: OutputTarget {
                dir: PathBuf::from("/tmp"),
                stem: "video_x".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_falls_back_on_recoverable_error() {
        let (first, first_calls) = scripted(Err(DownloadError::TransferFailed("reset".into())));
        let (second, second_calls) = scripted(Ok(()));
        let chain = FallbackChain::new("youtube").with_backend(first).with_backend(second);

        let (tx, _rx) = mpsc::channel(4);
        let sink = ProgressSink::new(tx, CancelToken::new());
        assert!(chain.start_video(&request(), &sink).await.is_ok());
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_chain() {
        let (first, _) = scripted(Err(DownloadError::Cancelled));
        let (second, second_calls) = scripted(Ok(()));
        let chain = FallbackChain::new("youtube").with_backend(first).with_backend(second);

        let (tx, _rx) = mpsc::channel(4);
        let sink = ProgressSink::new(tx, CancelToken::new());
        assert_eq!(
            chain.start_video(&request(), &sink).await.unwrap_err(),
            DownloadError::Cancelled
        );
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_primary_error_is_returned() {
        let (first, _) = scripted(Err(DownloadError::TransferFailed("a".into())));
        let (second, _) = scripted(Err(DownloadError::AuthRequired("b".into())));
        let chain = FallbackChain::new("tiktok").with_backend(first).with_backend(second);

        let req = ExtractRequest {
            url: "https://tiktok.com/x".into(),
            platform: PlatformTag::Tiktok,
            headers: Default::default(),
            cookie_file: None,
            proxy: None,
        };
        assert_eq!(
            chain.extract(&req, &CancelToken::new()).await.unwrap_err(),
            DownloadError::TransferFailed("a".into())
        );
    }

    #[tokio::test]
    async fn test_empty_chain_is_internal_error() {
        let chain = FallbackChain::new("empty");
        let (tx, _rx) = mpsc::channel(1);
        let sink = ProgressSink::new(tx, CancelToken::new());
        assert!(matches!(
            chain.start_audio(&request(), &sink).await,
            Err(DownloadError::Internal(_))
        ));
    }
}
