// Platform backends

pub mod direct;
pub mod ytdlp;

pub use direct::DirectHttpBackend;
pub use ytdlp::YtDlpBackend;
