//! Bounded, most-recent-first history log persisted as a JSON array.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::downloader::models::HistoryEntry;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history io error: {0}")]
    Io(#[from] io::Error),

    #[error("history file is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Filters for [`HistoryStore::search`]. Empty strings match everything.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub keyword: String,
    pub platform: String,
    pub status: String,
    pub limit: Option<usize>,
}

pub struct HistoryStore {
    path: PathBuf,
    cap: usize,
    // Spans every read-modify-write of the file
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap: cap.max(1),
            lock: Mutex::new(()),
        }
    }

    /// Insert at the front and evict past the cap. Returns the stored entry.
    pub async fn save(&self, mut entry: HistoryEntry) -> Result<HistoryEntry, HistoryError> {
        let _guard = self.lock.lock().await;

        let mut entries = match self.read().await {
            Ok(entries) => entries,
            Err(HistoryError::Corrupt(e)) => {
                tracing::warn!(path = %self.path.display(), error = %e, "history file unreadable, starting fresh");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        if entry.id.is_empty() {
            entry.id = uuid::Uuid::new_v4().to_string();
        }
        if entry.timestamp.is_empty() {
            entry.timestamp = now_rfc3339();
        }

        entries.insert(0, entry.clone());
        entries.truncate(self.cap);
        self.write(&entries).await?;
        Ok(entry)
    }

    pub async fn load(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        let mut entries = self.load().await?;
        entries.truncate(limit);
        Ok(entries)
    }

    /// Case-insensitive filter: substring on title, equality on platform and status
    pub async fn search(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, HistoryError> {
        let keyword = query.keyword.to_lowercase();
        let platform = query.platform.to_lowercase();
        let status = query.status.to_lowercase();

        let matches = self
            .load()
            .await?
            .into_iter()
            .filter(|e| keyword.is_empty() || e.title.to_lowercase().contains(&keyword))
            .filter(|e| platform.is_empty() || e.platform.to_lowercase() == platform)
            .filter(|e| status.is_empty() || e.status.to_lowercase() == status)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(matches)
    }

    /// Remove one entry. Returns false when no entry had that id.
    pub async fn delete(&self, id: &str) -> Result<bool, HistoryError> {
        let _guard = self.lock.lock().await;
        let entries = self.read().await?;
        let before = entries.len();
        let kept: Vec<HistoryEntry> = entries.into_iter().filter(|e| e.id != id).collect();
        if kept.len() == before {
            return Ok(false);
        }
        self.write(&kept).await?;
        Ok(true)
    }

    pub async fn clear(&self) -> Result<(), HistoryError> {
        let _guard = self.lock.lock().await;
        self.write(&[]).await
    }

    async fn read(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    // Write to a sibling temp file, then rename over the original
    async fn write(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
