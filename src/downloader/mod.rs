// Downloader module - platform dispatch and backend abstraction

pub mod backends;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod platform;
pub mod registry;
pub mod tools;
pub mod traits;
pub mod utils;

pub use errors::DownloadError;
pub use models::{JobKind, JobPatch, JobRecord, JobStatus, ProgressUpdate};
pub use orchestrator::FallbackChain;
pub use platform::PlatformTag;
pub use registry::BackendRegistry;
pub use traits::{PlatformBackend, ProgressSink};
