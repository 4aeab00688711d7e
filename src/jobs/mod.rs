// Job lifecycle: status, cancellation, history, execution and retention

pub mod cancel;
pub mod history;
pub mod runner;
pub mod status;
pub mod sweeper;

pub use cancel::{CancelToken, CancellationRegistry};
pub use history::{HistoryError, HistoryQuery, HistoryStore};
pub use runner::JobRunner;
pub use status::{StatusStore, UpdateOutcome};
