//! Periodic retention sweep over the artifact directories.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::jobs::status::StatusStore;

/// Zero-byte files younger than this may still be in flight.
const EMPTY_FILE_GRACE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SweepReport {
    pub files_deleted: usize,
    pub dirs_deleted: usize,
    pub bytes_freed: u64,
    /// Lower-cased extension (with dot) -> files deleted
    pub by_extension: BTreeMap<String, usize>,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.files_deleted += other.files_deleted;
        self.dirs_deleted += other.dirs_deleted;
        self.bytes_freed += other.bytes_freed;
        for (ext, n) in other.by_extension {
            *self.by_extension.entry(ext).or_default() += n;
        }
    }
}

/// One pass over `dirs`. Missing directories are skipped.
pub fn run_once(dirs: &[PathBuf], max_age: Duration) -> SweepReport {
    let now = SystemTime::now();
    let mut report = SweepReport::default();
    for dir in dirs {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "sweep target missing, skipping");
            continue;
        }
        report.merge(sweep_dir(dir, now, max_age, true));
    }
    report
}

// Depth-first so emptied subdirectories can go in the same pass
fn sweep_dir(dir: &Path, now: SystemTime, max_age: Duration, is_root: bool) -> SweepReport {
    let mut report = SweepReport::default();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not scan directory");
            return report;
        }
    };

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };

        if meta.is_dir() {
            report.merge(sweep_dir(&path, now, max_age, false));
            continue;
        }
        if !meta.is_file() {
            continue;
        }

        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        let expired = age > max_age;
        let empty_and_stale = meta.len() == 0 && age > EMPTY_FILE_GRACE;

        if !(expired || empty_and_stale) {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                let ext = path
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                    .unwrap_or_default();
                *report.by_extension.entry(ext).or_default() += 1;
                report.files_deleted += 1;
                report.bytes_freed += meta.len();
                debug!(file = %path.display(), "deleted expired artifact");
            }
            Err(e) => warn!(file = %path.display(), error = %e, "failed to delete artifact"),
        }
    }

    if !is_root && is_empty_dir(dir).unwrap_or(false) {
        match fs::remove_dir(dir) {
            Ok(()) => report.dirs_deleted += 1,
            Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove empty directory"),
        }
    }

    report
}

fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

/// Spawn the sweep loop. Each tick deletes old artifacts and drops stale
/// status records.
pub fn spawn(
    dirs: Vec<PathBuf>,
    retention: Duration,
    interval: Duration,
    statuses: Arc<StatusStore>,
    status_ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            let targets = dirs.clone();
            let report = match tokio::task::spawn_blocking(move || run_once(&targets, retention)).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "sweep task failed");
                    continue;
                }
            };

            let evicted = statuses.sweep(status_ttl);
            info!(
                files = report.files_deleted,
                dirs = report.dirs_deleted,
                mb_freed = format!("{:.2}", report.bytes_freed as f64 / 1_048_576.0),
                types = ?report.by_extension,
                statuses_evicted = evicted,
                "sweep complete"
            );
        }
    })
}
