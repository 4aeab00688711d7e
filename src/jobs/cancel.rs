//! Cooperative cancellation: shared tokens keyed by job id.
//!
//! The runner registers a token when a job is created and hands a clone to the
//! backend through its `ProgressSink`. A cancel request only flips the token;
//! the backend sees it at its next poll point and unwinds on its own.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// Cancellation signal for one job. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }
}

/// Shared registry of job id -> cancel token.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job; returns the token to pass down to the backend.
    /// Re-registering an id replaces the previous token.
    pub fn register(&self, id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.lock().insert(id.to_string(), token.clone());
        token
    }

    /// Signal a job. True only if a live, not-yet-signalled token existed.
    pub fn signal(&self, id: &str) -> bool {
        let map = self.lock();
        match map.get(id) {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_signaled(&self, id: &str) -> bool {
        self.lock().get(id).map(CancelToken::is_cancelled).unwrap_or(false)
    }

    /// Retire a job's token (call on every terminal transition).
    pub fn forget(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancelToken>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}
