//! Download job runner: admission, lifecycle transitions, progress and timeouts.
//!
//! Each admitted download runs as one tokio task. The backend call itself is
//! spawned separately so a panic surfaces through its `JoinHandle` instead of
//! tearing down the job. Progress flows backend → bounded channel → one
//! observer task → [`StatusStore`]; the runner joins the observer before it
//! writes the terminal state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{
    DownloadRequest, ExtractRequest, ExtractedInfo, HeaderMap, HistoryEntry, JobKind, JobPatch,
    JobRecord, JobStatus, MediaMetadata, MetadataReply, OutputTarget, ProgressUpdate,
    TransferOutcome, TransferRequest,
};
use crate::downloader::platform::{self, PlatformTag};
use crate::downloader::registry::BackendRegistry;
use crate::downloader::traits::{PlatformBackend, ProgressSink};
use crate::downloader::utils;
use crate::jobs::cancel::{CancelToken, CancellationRegistry};
use crate::jobs::history::HistoryStore;
use crate::jobs::status::{StatusStore, UpdateOutcome};

/// Holds one admission slot; released on drop.
struct AdmissionGuard {
    admitted: Arc<AtomicUsize>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.admitted.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Everything one spawned download needs
struct JobContext {
    id: String,
    kind: JobKind,
    platform: PlatformTag,
    backend: Arc<dyn PlatformBackend>,
    request: TransferRequest,
    token: CancelToken,
}

struct RunnerInner {
    registry: BackendRegistry,
    statuses: Arc<StatusStore>,
    cancels: Arc<CancellationRegistry>,
    history: Arc<HistoryStore>,
    config: RunnerConfig,
    permits: Arc<Semaphore>,
    admitted: Arc<AtomicUsize>,
}

/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<RunnerInner>,
}

impl JobRunner {
    pub fn new(config: RunnerConfig, registry: BackendRegistry, history: Arc<HistoryStore>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(RunnerInner {
                registry,
                statuses: Arc::new(StatusStore::new()),
                cancels: Arc::new(CancellationRegistry::new()),
                history,
                config,
                permits,
                admitted: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    pub fn status_store(&self) -> &Arc<StatusStore> {
        &self.inner.statuses
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.inner.history
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Jobs admitted and not yet terminal (running plus queued)
    pub fn active_jobs(&self) -> usize {
        self.inner.admitted.load(Ordering::Acquire)
    }

    pub fn status(&self, id: &str) -> Option<JobRecord> {
        self.inner.statuses.lookup(id)
    }

    pub fn statuses(&self) -> Vec<JobRecord> {
        self.inner.statuses.list()
    }

    /// Signal a job's token. False for unknown or already-finished jobs.
    pub fn cancel(&self, id: &str) -> bool {
        let signalled = self.inner.cancels.signal(id);
        if signalled {
            info!(job_id = %id, "cancel requested");
        }
        signalled
    }

    /// Extract metadata for `url` under a fresh job id.
    ///
    /// Request-level problems (missing URL, unsupported platform) are `Err`.
    /// Extraction failures come back as [`MetadataReply::Failed`] with the job
    /// left in `error`.
    pub async fn fetch_info(
        &self,
        url: &str,
        overrides: &HeaderMap,
    ) -> Result<MetadataReply, DownloadError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DownloadError::InvalidRequest("URL is required".to_string()));
        }

        let tag = platform::resolve(url);
        let backend = self.inner.registry.get_backend(tag)?;

        let id = uuid::Uuid::new_v4().to_string();
        self.inner.statuses.update(
            &id,
            JobPatch {
                platform: Some(tag),
                status: Some(JobStatus::Extracting),
                progress: Some(0.0),
                ..Default::default()
            },
        );
        let token = self.inner.cancels.register(&id);

        let (headers, cookie_file) = self.merged_headers(tag, overrides);
        let request = ExtractRequest {
            url: url.to_string(),
            platform: tag,
            headers,
            cookie_file,
            proxy: self.inner.config.proxy.clone(),
        };

        info!(job_id = %id, platform = %tag, backend = backend.name(), "extracting metadata");

        let extract_timeout = self.inner.config.extract_timeout;
        let result = match tokio::time::timeout(extract_timeout, backend.extract(&request, &token)).await {
            Ok(result) => match result.and_then(validate_metadata) {
                // A killed extractor can fail with anything once signalled
                Err(e) if token.is_cancelled() && e != DownloadError::Cancelled => {
                    debug!(job_id = %id, error = %e, "extraction error after cancel signal");
                    Err(DownloadError::Cancelled)
                }
                other => other,
            },
            Err(_) => {
                token.cancel();
                Err(DownloadError::TransferFailed(format!(
                    "metadata extraction timed out after {}s",
                    extract_timeout.as_secs()
                )))
            }
        };
        self.inner.cancels.forget(&id);

        match result {
            Ok(info) => {
                let title = info.title.clone().unwrap_or_default();
                self.inner.statuses.update(
                    &id,
                    JobPatch {
                        status: Some(JobStatus::Ready),
                        title: Some(title.clone()),
                        ..Default::default()
                    },
                );
                Ok(MetadataReply::Ready(MediaMetadata {
                    download_id: id,
                    platform: tag,
                    title,
                    thumbnail: info.thumbnail,
                    uploader: info.uploader,
                    duration: info.duration.unwrap_or(0.0),
                    video_url: url.to_string(),
                    resolutions: info.resolutions,
                    sizes: info.sizes,
                    audio_formats: info.audio_formats,
                    audio_dubs: info.audio_dubs,
                }))
            }
            Err(DownloadError::Cancelled) => {
                info!(job_id = %id, "metadata extraction cancelled");
                let message = "cancelled by user".to_string();
                self.inner.statuses.update(&id, JobPatch::cancelled(message.clone()));
                Ok(MetadataReply::Failed {
                    error: message,
                    download_id: id,
                })
            }
            Err(e) => {
                log_failure(&id, &e);
                let message = e.user_message();
                self.inner.statuses.update(&id, JobPatch::failed(message.clone()));
                Ok(MetadataReply::Failed {
                    error: message,
                    download_id: id,
                })
            }
        }
    }

    /// Validate, admit and spawn a download. Returns the new job id.
    pub fn submit(&self, request: DownloadRequest) -> Result<String, DownloadError> {
        let url = request.url.trim().to_string();
        if url.is_empty() {
            return Err(DownloadError::InvalidRequest("URL is required".to_string()));
        }
        let quality = request.quality.trim().to_string();
        if quality.is_empty() {
            return Err(DownloadError::InvalidRequest(match request.kind {
                JobKind::Video => "Resolution is required".to_string(),
                JobKind::Audio => "Audio quality is required".to_string(),
            }));
        }

        let tag = platform::resolve(&url);
        let backend = self.inner.registry.get_backend(tag)?;
        let guard = self.try_admit()?;

        let bandwidth_limit = request.bandwidth_limit.as_deref().and_then(|raw| {
            let parsed = utils::parse_bandwidth_limit(raw);
            if parsed.is_none() {
                warn!(value = %raw, "ignoring unparseable bandwidth limit");
            }
            parsed
        });

        let id = uuid::Uuid::new_v4().to_string();
        let dir = match request.kind {
            JobKind::Video => self.inner.config.video_dir.clone(),
            JobKind::Audio => self.inner.config.audio_dir.clone(),
        };
        let (headers, cookie_file) = self.merged_headers(tag, &request.headers);

        let transfer = TransferRequest {
            url,
            platform: tag,
            quality: quality.clone(),
            audio_lang: request.audio_lang.filter(|l| !l.trim().is_empty()),
            bandwidth_limit,
            headers,
            cookie_file,
            proxy: self.inner.config.proxy.clone(),
            output: OutputTarget {
                dir,
                stem: utils::generate_filename(request.kind.file_prefix()),
            },
        };

        self.inner.statuses.update(
            &id,
            JobPatch {
                kind: Some(request.kind),
                platform: Some(tag),
                requested_quality: Some(quality),
                status: Some(JobStatus::Pending),
                message: Some("queued".to_string()),
                ..Default::default()
            },
        );
        let token = self.inner.cancels.register(&id);

        info!(job_id = %id, platform = %tag, kind = %request.kind, "download admitted");

        let ctx = JobContext {
            id: id.clone(),
            kind: request.kind,
            platform: tag,
            backend,
            request: transfer,
            token,
        };
        let runner = self.clone();
        tokio::spawn(async move {
            runner.run_job(ctx).await;
            drop(guard);
        });

        Ok(id)
    }

    fn try_admit(&self) -> Result<AdmissionGuard, DownloadError> {
        let cap = self.inner.config.max_concurrent_jobs.max(1) + self.inner.config.queue_capacity;
        self.inner
            .admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < cap).then_some(n + 1))
            .map_err(|_| {
                DownloadError::Busy("Too many downloads in progress, try again later".to_string())
            })?;
        Ok(AdmissionGuard {
            admitted: self.inner.admitted.clone(),
        })
    }

    fn merged_headers(&self, tag: PlatformTag, overrides: &HeaderMap) -> (HeaderMap, Option<PathBuf>) {
        utils::build_platform_headers(
            &self.inner.config.cookies_dir,
            tag,
            &self.inner.config.base_headers,
            overrides,
        )
    }

    async fn run_job(&self, ctx: JobContext) {
        let timed_out = AtomicBool::new(false);

        let result = {
            let work = self.execute(&ctx);
            tokio::pin!(work);
            match self.inner.config.job_timeout {
                Some(limit) => tokio::select! {
                    res = &mut work => res,
                    _ = tokio::time::sleep(limit) => {
                        warn!(job_id = %ctx.id, secs = limit.as_secs(), "job timed out, cancelling");
                        timed_out.store(true, Ordering::Release);
                        ctx.token.cancel();
                        work.await
                    }
                },
                None => work.await,
            }
        };

        // Retire the token first so a late cancel reports "already finished"
        self.inner.cancels.forget(&ctx.id);
        self.finish(&ctx, result, timed_out.load(Ordering::Acquire)).await;
    }

    /// Queue wait, backend call and observer join
    async fn execute(&self, ctx: &JobContext) -> Result<TransferOutcome, DownloadError> {
        let _permit: OwnedSemaphorePermit = tokio::select! {
            permit = self.inner.permits.clone().acquire_owned() => {
                permit.map_err(|_| DownloadError::Internal("job semaphore closed".to_string()))?
            }
            _ = ctx.token.cancelled() => return Err(DownloadError::Cancelled),
        };
        if ctx.token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        tokio::fs::create_dir_all(&ctx.request.output.dir).await?;

        self.inner.statuses.update(
            &ctx.id,
            JobPatch {
                status: Some(JobStatus::Starting),
                progress: Some(0.0),
                speed: Some("0KB/s".to_string()),
                message: Some("starting".to_string()),
                ..Default::default()
            },
        );
        debug!(job_id = %ctx.id, backend = ctx.backend.name(), "transfer starting");

        let (tx, rx) = mpsc::channel(self.inner.config.progress_channel_capacity.max(1));
        let observer = tokio::spawn(observe_progress(
            ctx.id.clone(),
            rx,
            self.inner.statuses.clone(),
        ));

        let sink = ProgressSink::new(tx, ctx.token.clone());
        let backend = ctx.backend.clone();
        let request = ctx.request.clone();
        let kind = ctx.kind;
        let handle = tokio::spawn(async move {
            match kind {
                JobKind::Video => backend.start_video(&request, &sink).await,
                JobKind::Audio => backend.start_audio(&request, &sink).await,
            }
        });

        let result = match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(DownloadError::Internal("backend task panicked".to_string())),
            Err(e) => Err(DownloadError::Internal(format!("backend task failed: {}", e))),
        };

        // The sink went away with the backend task, so the observer drains and exits
        if let Err(e) = observer.await {
            warn!(job_id = %ctx.id, error = %e, "progress observer failed");
        }

        result
    }

    async fn finish(
        &self,
        ctx: &JobContext,
        result: Result<TransferOutcome, DownloadError>,
        timed_out: bool,
    ) {
        let result = match result {
            Ok(outcome) => self.verify_output(ctx, outcome).await,
            Err(e) => Err(e),
        };

        // A kill triggered by cancellation can surface as any error
        let result = match result {
            Err(e) if ctx.token.is_cancelled() && e != DownloadError::Cancelled => {
                debug!(job_id = %ctx.id, error = %e, "error after cancel signal, treating as cancelled");
                Err(DownloadError::Cancelled)
            }
            other => other,
        };

        let id = &ctx.id;
        let outcome = match result {
            Ok((filename, size, title)) => {
                // The history entry exists before `completed` becomes visible
                let entry = HistoryEntry {
                    id: id.clone(),
                    title: title.clone().unwrap_or_else(|| filename.clone()),
                    platform: ctx.platform.to_string(),
                    resolution: ctx.request.quality.clone(),
                    size: utils::format_size(size),
                    status: JobStatus::Completed.to_string(),
                    timestamp: String::new(),
                };
                if let Err(e) = self.inner.history.save(entry).await {
                    warn!(job_id = %id, error = %e, "failed to record history");
                }

                let output_url = format!("{}/media/{}", self.inner.config.public_base_url, filename);
                let mut patch = JobPatch::completed(output_url, filename.clone());
                patch.title = title;
                let applied = self.inner.statuses.update(id, patch);
                if applied == UpdateOutcome::Applied {
                    info!(job_id = %id, file = %filename, bytes = size, "download completed");
                }
                applied
            }
            Err(DownloadError::Cancelled) => {
                let message = match (timed_out, self.inner.config.job_timeout) {
                    (true, Some(limit)) => format!("timed out after {}s", limit.as_secs()),
                    _ => "cancelled by user".to_string(),
                };
                info!(job_id = %id, reason = %message, "download cancelled");
                self.inner.statuses.update(id, JobPatch::cancelled(message))
            }
            Err(e) => {
                log_failure(id, &e);
                self.inner.statuses.update(id, JobPatch::failed(e.user_message()))
            }
        };

        if outcome == UpdateOutcome::RejectedTerminal {
            warn!(job_id = %id, "terminal state already recorded, dropping final update");
        }
    }

    /// Artifact must be a regular file inside the output dir and big enough
    async fn verify_output(
        &self,
        ctx: &JobContext,
        outcome: TransferOutcome,
    ) -> Result<(String, u64, Option<String>), DownloadError> {
        let dir = tokio::fs::canonicalize(&ctx.request.output.dir).await?;
        let path = tokio::fs::canonicalize(&outcome.path).await.map_err(|e| {
            DownloadError::Internal(format!("artifact {} missing: {}", outcome.path.display(), e))
        })?;

        if path.parent() != Some(dir.as_path()) {
            return Err(DownloadError::Internal(format!(
                "artifact {} is outside {}",
                path.display(),
                dir.display()
            )));
        }

        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(DownloadError::Internal(format!("{} is not a file", path.display())));
        }
        if meta.len() < self.inner.config.min_output_bytes {
            return Err(DownloadError::TransferFailed(format!(
                "artifact too small: {} bytes",
                meta.len()
            )));
        }

        let filename = file_name(&path)
            .ok_or_else(|| DownloadError::Internal("artifact has no file name".to_string()))?;
        Ok((filename, meta.len(), outcome.title))
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(String::from)
}

/// A document is usable once it has a title and something to pick
fn validate_metadata(info: ExtractedInfo) -> Result<ExtractedInfo, DownloadError> {
    if let Some(err) = &info.error {
        return Err(DownloadError::classify(err));
    }
    if info.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
        return Err(DownloadError::Internal("malformed metadata: missing title".to_string()));
    }
    if info.resolutions.is_empty() && info.audio_formats.is_empty() {
        return Err(DownloadError::FormatUnavailable(
            "no selectable qualities".to_string(),
        ));
    }
    Ok(info)
}

fn log_failure(id: &str, e: &DownloadError) {
    match e {
        DownloadError::Internal(detail) => error!(job_id = %id, detail = %detail, "job failed"),
        other => warn!(job_id = %id, category = other.category(), error = %other, "job failed"),
    }
}

async fn observe_progress(
    id: String,
    mut rx: mpsc::Receiver<ProgressUpdate>,
    statuses: Arc<StatusStore>,
) {
    while let Some(update) = rx.recv().await {
        if statuses.update(&id, JobPatch::from_progress(&update)) == UpdateOutcome::RejectedTerminal {
            debug!(job_id = %id, "progress after terminal state dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_metadata() {
        let missing_title = ExtractedInfo {
            resolutions: vec!["720p".into()],
            ..Default::default()
        };
        assert!(matches!(validate_metadata(missing_title), Err(DownloadError::Internal(_))));

        let no_qualities = ExtractedInfo {
            title: Some("t".into()),
            ..Default::default()
        };
        assert!(matches!(
            validate_metadata(no_qualities),
            Err(DownloadError::FormatUnavailable(_))
        ));

        let explicit = ExtractedInfo {
            title: Some("t".into()),
            resolutions: vec!["720p".into()],
            error: Some("ERROR: Sign in to confirm your age".into()),
            ..Default::default()
        };
        assert!(matches!(validate_metadata(explicit), Err(DownloadError::AuthRequired(_))));
    }

    #[test]
    fn test_admission_guard_releases() {
        let admitted = Arc::new(AtomicUsize::new(1));
        {
            let _g = AdmissionGuard {
                admitted: admitted.clone(),
            };
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 0);
    }
}
