// Backend adapter trait and progress plumbing

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::errors::DownloadError;
use super::models::{MediaKind, ProgressEvent, QualityHint, StreamDescriptor, VideoInfo};
use super::youtube_url::VideoId;

/// One extraction strategy behind a uniform contract.
///
/// Implementations make a single attempt per call (client rotation inside
/// one adapter counts as one attempt) and classify failures as `NotFound`,
/// `NoMatchingFormat`, `Transport` or `Blocked`. They never touch task state
/// or write files.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Name of the backend (for logging and failure chains)
    fn name(&self) -> &str;

    async fn resolve(
        &self,
        video_id: &VideoId,
        kind: MediaKind,
        quality: QualityHint,
    ) -> Result<StreamDescriptor, DownloadError>;

    async fn get_video_info(&self, video_id: &VideoId) -> Result<VideoInfo, DownloadError>;
}

/// Sending half of a task's progress channel
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressEmitter {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// Emitter whose events go nowhere
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    pub async fn emit(&self, progress: ProgressEvent) {
        // Receiver gone means nobody is polling this task any more
        let _ = self.tx.send(progress).await;
    }
}
