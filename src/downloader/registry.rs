// Platform tag -> backend table, populated at startup

use std::collections::HashMap;
use std::sync::Arc;

use super::backends::{DirectHttpBackend, YtDlpBackend};
use super::errors::DownloadError;
use super::orchestrator::FallbackChain;
use super::platform::PlatformTag;
use super::tools::ToolManager;
use super::traits::PlatformBackend;

/// Read-only after construction; lookups never lock.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<PlatformTag, Arc<dyn PlatformBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// yt-dlp first, then direct HTTP streaming, for every known platform
    pub fn with_defaults(tools: &ToolManager, extract_timeout_secs: u64) -> Self {
        let ytdlp_path = tools.ytdlp_path();
        let mut registry = Self::new();
        for tag in PlatformTag::all() {
            let chain = FallbackChain::new(tag.as_str())
                .with_backend(Box::new(YtDlpBackend::new(&ytdlp_path, extract_timeout_secs)))
                .with_backend(Box::new(DirectHttpBackend::new(&ytdlp_path, extract_timeout_secs)));
            registry.register(tag, Arc::new(chain));
        }
        registry
    }

    /// `Unknown` is never registered.
    pub fn register(&mut self, tag: PlatformTag, backend: Arc<dyn PlatformBackend>) {
        if tag == PlatformTag::Unknown {
            tracing::warn!("refusing to register a backend for the unknown platform");
            return;
        }
        self.backends.insert(tag, backend);
    }

    pub fn get_backend(&self, tag: PlatformTag) -> Result<Arc<dyn PlatformBackend>, DownloadError> {
        self.backends
            .get(&tag)
            .cloned()
            .ok_or_else(|| DownloadError::UnsupportedPlatform(tag.to_string()))
    }

    pub fn platforms(&self) -> Vec<PlatformTag> {
        let mut tags: Vec<PlatformTag> = self.backends.keys().copied().collect();
        tags.sort_by_key(|t| t.as_str());
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_known_platforms() {
        let registry = BackendRegistry::with_defaults(&ToolManager::new(), 30);
        for tag in PlatformTag::all() {
            assert!(registry.get_backend(tag).is_ok());
        }
        assert_eq!(registry.platforms().len(), 4);
    }

    #[test]
    fn test_unknown_fails_fast() {
        let registry = BackendRegistry::with_defaults(&ToolManager::new(), 30);
        assert_eq!(
            registry.get_backend(PlatformTag::Unknown).err(),
            Some(DownloadError::UnsupportedPlatform("unknown".into()))
        );
    }

    #[test]
    fn test_empty_registry() {
        let registry = BackendRegistry::new();
        assert!(matches!(
            registry.get_backend(PlatformTag::Youtube),
            Err(DownloadError::UnsupportedPlatform(_))
        ));
    }
}
