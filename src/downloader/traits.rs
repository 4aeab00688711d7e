// Platform backend trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::errors::DownloadError;
use super::models::{ExtractRequest, ExtractedInfo, ProgressUpdate, TransferOutcome, TransferRequest};
use crate::jobs::cancel::CancelToken;

/// Capability bundle registered for one platform
#[async_trait]
pub trait PlatformBackend: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Extract metadata and selectable qualities
    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancelToken,
    ) -> Result<ExtractedInfo, DownloadError>;

    /// Download a video at the requested resolution
    async fn start_video(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError>;

    /// Download audio at the requested bitrate
    async fn start_audio(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, DownloadError>;
}

/// Progress reporter handed to a backend for one job.
///
/// Every call to [`report`](Self::report) or [`checkpoint`](Self::checkpoint)
/// is a cancellation poll point; backends must call one of them at each chunk
/// or line boundary of their transfer loop.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressUpdate>,
    cancel: CancelToken,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressUpdate>, cancel: CancelToken) -> Self {
        Self { tx, cancel }
    }

    /// Fail with `Cancelled` if the job has been signalled
    pub fn checkpoint(&self) -> Result<(), DownloadError> {
        if self.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        Ok(())
    }

    /// Poll cancellation, then push a snapshot. A full channel drops the snapshot.
    pub fn report(&self, update: ProgressUpdate) -> Result<(), DownloadError> {
        self.checkpoint()?;
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(update) {
            tracing::trace!("progress channel full, dropping snapshot");
        }
        Ok(())
    }

    /// Token view for backends that need to await the signal
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_forwards_until_cancelled() {
        let (tx, mut rx) = mpsc::channel(4);
        let token = CancelToken::new();
        let sink = ProgressSink::new(tx, token.clone());

        sink.report(ProgressUpdate::percent(10.0, "1KB/s")).unwrap();
        assert_eq!(rx.recv().await.unwrap().percent, 10.0);

        token.cancel();
        assert_eq!(
            sink.report(ProgressUpdate::percent(20.0, "1KB/s")),
            Err(DownloadError::Cancelled)
        );
        assert_eq!(sink.checkpoint(), Err(DownloadError::Cancelled));
    }

    #[tokio::test]
    async fn test_full_channel_drops_snapshot() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ProgressSink::new(tx, CancelToken::new());
        sink.report(ProgressUpdate::percent(1.0, "")).unwrap();
        sink.report(ProgressUpdate::percent(2.0, "")).unwrap();
        assert_eq!(rx.recv().await.unwrap().percent, 1.0);
        assert!(rx.try_recv().is_err());
    }
}
