// Resolver - ordered backend walk with fallback
//
// Policy:
// - First success wins; later backends are never called
// - NotFound aborts the walk: no other backend can produce a missing video
// - NoMatchingFormat, Transport and Blocked move on to the next backend
// - Exhausting the list yields AllBackendsFailed with every failure, in order

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use super::errors::{BackendFailure, DownloadError};
use super::models::{MediaKind, QualityHint, StreamDescriptor, VideoInfo};
use super::traits::BackendAdapter;
use super::youtube_url::VideoId;

#[derive(Clone, Default)]
pub struct Resolver {
    backends: Vec<Arc<dyn BackendAdapter>>,
}

impl Resolver {
    pub fn new() -> Self {
        Self { backends: Vec::new() }
    }

    pub fn with_backends(backends: Vec<Arc<dyn BackendAdapter>>) -> Self {
        Self { backends }
    }

    pub fn add_backend(&mut self, backend: Arc<dyn BackendAdapter>) {
        self.backends.push(backend);
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub async fn resolve_best(
        &self,
        video_id: &VideoId,
        kind: MediaKind,
        quality: QualityHint,
    ) -> Result<StreamDescriptor, DownloadError> {
        self.walk(video_id, "resolve", |backend| {
            let video_id = video_id.clone();
            async move {
                backend
                    .resolve(&video_id, kind, quality)
                    .await
                    .and_then(StreamDescriptor::validate)
            }
        })
        .await
    }

    pub async fn video_info(&self, video_id: &VideoId) -> Result<VideoInfo, DownloadError> {
        self.walk(video_id, "info", |backend| {
            let video_id = video_id.clone();
            async move { backend.get_video_info(&video_id).await }
        })
        .await
    }

    async fn walk<T, F, Fut>(
        &self,
        video_id: &VideoId,
        operation: &str,
        mut call: F,
    ) -> Result<T, DownloadError>
    where
        F: FnMut(Arc<dyn BackendAdapter>) -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let mut failures = Vec::new();

        for backend in &self.backends {
            info!(backend = backend.name(), video_id = %video_id, operation, "Trying backend");

            match call(Arc::clone(backend)).await {
                Ok(value) => {
                    info!(backend = backend.name(), video_id = %video_id, operation, "Backend succeeded");
                    return Ok(value);
                }
                Err(e) if !e.allows_fallback() => {
                    warn!(backend = backend.name(), video_id = %video_id, error = %e, "Backend reported a final error, aborting");
                    return Err(e);
                }
                Err(e) => {
                    warn!(backend = backend.name(), video_id = %video_id, error = %e, "Backend failed, trying next");
                    failures.push(BackendFailure {
                        backend: backend.name().to_string(),
                        error: e,
                    });
                }
            }
        }

        Err(DownloadError::AllBackendsFailed(failures))
    }
}
