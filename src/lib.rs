// YouTube downloader service: resolution backends with fallback, a bounded
// download worker pool and an HTTP API for submitting and collecting files

pub mod config;
pub mod downloader;
pub mod server;
pub mod tasks;
pub mod transfer;

pub use config::AppConfig;
pub use downloader::{DownloadError, ErrorKind};
pub use server::{create_router, AppState};
pub use tasks::{DownloadManager, RetentionSweeper};
