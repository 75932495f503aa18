// Downloader backends

pub mod invidious;
pub mod ytdlp;

pub use invidious::{InvidiousBackend, DEFAULT_INSTANCES};
pub use ytdlp::YtDlpBackend;
