//! In-memory job status store.
//!
//! One map guarded by a single mutex. Every mutation is a short critical
//! section (a field merge); nothing awaits while holding the lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use time::OffsetDateTime;

use crate::downloader::models::{JobPatch, JobRecord, JobStatus};

/// Result of [`StatusStore::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The record was already terminal; nothing changed.
    RejectedTerminal,
}

#[derive(Debug, Default)]
pub struct StatusStore {
    records: Mutex<HashMap<String, JobRecord>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the record if missing. Existing records are left alone.
    pub fn init(&self, id: &str) {
        self.lock()
            .entry(id.to_string())
            .or_insert_with(|| JobRecord::pending(id));
    }

    /// Merge `patch` into the record, creating it lazily.
    ///
    /// Terminal records reject further updates. `output_url` survives only on
    /// `completed` and `error` only on `error`.
    pub fn update(&self, id: &str, patch: JobPatch) -> UpdateOutcome {
        let mut map = self.lock();
        let record = map
            .entry(id.to_string())
            .or_insert_with(|| JobRecord::pending(id));

        if record.status.is_terminal() {
            return UpdateOutcome::RejectedTerminal;
        }

        apply(record, patch);
        UpdateOutcome::Applied
    }

    /// Record for `id`, or an implicit pending record if nothing was written yet.
    pub fn get(&self, id: &str) -> JobRecord {
        self.lookup(id).unwrap_or_else(|| JobRecord::pending(id))
    }

    pub fn lookup(&self, id: &str) -> Option<JobRecord> {
        self.lock().get(id).cloned()
    }

    pub fn clear(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Drop finished records (terminal or `ready`) not updated within
    /// `max_age`; returns how many were removed. Live jobs are never evicted.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let cutoff = OffsetDateTime::now_utc() - max_age;
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, r| !(is_settled(r.status) && r.updated_at < cutoff));
        before - map.len()
    }

    pub fn list(&self) -> Vec<JobRecord> {
        let mut all: Vec<JobRecord> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JobRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn is_settled(status: JobStatus) -> bool {
    status.is_terminal() || status == JobStatus::Ready
}

fn apply(record: &mut JobRecord, patch: JobPatch) {
    let now = OffsetDateTime::now_utc();

    if let Some(v) = patch.kind {
        record.kind = v;
    }
    if let Some(v) = patch.platform {
        record.platform = v;
    }
    if let Some(v) = patch.requested_quality {
        record.requested_quality = Some(v);
    }
    if let Some(v) = patch.progress {
        record.progress = v;
    }
    if let Some(v) = patch.speed {
        record.speed = v;
    }
    if let Some(v) = patch.eta {
        record.eta = Some(v);
    }
    if let Some(v) = patch.downloaded_bytes {
        record.downloaded_bytes = Some(v);
    }
    if let Some(v) = patch.total_bytes {
        record.total_bytes = Some(v);
    }
    if let Some(v) = patch.title {
        record.title = Some(v);
    }
    if let Some(v) = patch.filename {
        record.filename = Some(v);
    }
    if let Some(v) = patch.output_url {
        record.output_url = Some(v);
    }
    if let Some(v) = patch.error {
        record.error = Some(v);
    }
    if let Some(v) = patch.message {
        record.message = Some(v);
    }
    if let Some(status) = patch.status {
        record.status = status;
        if status.is_terminal() {
            record.completed_at = Some(now);
        }
    }

    if record.status != JobStatus::Completed {
        record.output_url = None;
    }
    if record.status != JobStatus::Error {
        record.error = None;
    }

    record.updated_at = now;
}
