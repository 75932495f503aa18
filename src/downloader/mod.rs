// Downloader module - resolution engine: URL normalization, backends,
// client identity rotation and fallback

pub mod backends;
pub mod clients;
pub mod diagnostics;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod traits;
pub mod utils;
pub mod youtube_url;

pub use errors::{BackendFailure, DownloadError, ErrorKind};
pub use models::{
    MediaKind, NetworkConfig, ProgressEvent, QualityHint, StreamDescriptor, StreamFormat,
    StreamSource, VideoInfo,
};
pub use orchestrator::Resolver;
pub use traits::{BackendAdapter, ProgressEmitter};
pub use youtube_url::{normalize, VideoId};
