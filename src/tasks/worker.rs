// Download manager - admission control and the per-task worker
//
// Submissions take an admission permit (running + queued slots) without
// waiting; when none is left the request is refused. Each admitted task
// gets a spawned worker that waits for a running permit, then drives
// resolve -> transfer -> (transcode) and records the outcome.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::model::{Task, TaskEvent};
use super::registry::TaskRegistry;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{MediaKind, QualityHint};
use crate::downloader::orchestrator::Resolver;
use crate::downloader::traits::ProgressEmitter;
use crate::downloader::youtube_url::{normalize, VideoId};
use crate::transfer::{Artifact, TransferExecutor};

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_concurrent: usize,
    pub max_queued: usize,
    pub task_timeout: Duration,
    /// MP3 bitrate used when the audio hint is "best"
    pub default_bitrate_kbps: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_queued: 16,
            task_timeout: Duration::from_secs(600),
            default_bitrate_kbps: 192,
        }
    }
}

/// Raw submission, validated by `DownloadManager::submit`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "type")]
    pub kind: String,
    #[serde(default, alias = "qualityHint")]
    pub quality: String,
}

#[derive(Clone)]
pub struct DownloadManager {
    registry: Arc<dyn TaskRegistry>,
    resolver: Arc<Resolver>,
    executor: Arc<TransferExecutor>,
    admission: Arc<Semaphore>,
    running: Arc<Semaphore>,
    cancellations: Arc<Mutex<HashMap<String, CancellationToken>>>,
    config: WorkerConfig,
}

impl DownloadManager {
    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        resolver: Arc<Resolver>,
        executor: Arc<TransferExecutor>,
        config: WorkerConfig,
    ) -> Self {
        let running = config.max_concurrent.max(1);
        Self {
            registry,
            resolver,
            executor,
            admission: Arc::new(Semaphore::new(running + config.max_queued)),
            running: Arc::new(Semaphore::new(running)),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<dyn TaskRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn executor(&self) -> &TransferExecutor {
        &self.executor
    }

    /// Tasks admitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.tokens().len()
    }

    /// Validate, create the task record and dispatch a worker.
    /// Returns as soon as the record exists; nothing here waits on the network.
    pub fn submit(&self, request: SubmitRequest) -> Result<Task, DownloadError> {
        let url = request.url.trim();
        if url.is_empty() {
            return Err(DownloadError::InvalidRequest("url is required".to_string()));
        }

        let kind: MediaKind = request.kind.parse()?;
        let quality = QualityHint::parse(kind, &request.quality)?;
        let video_id = normalize(url)?;

        let permit = Arc::clone(&self.admission)
            .try_acquire_owned()
            .map_err(|_| DownloadError::ServiceBusy)?;

        let task = Task::new(Uuid::new_v4().to_string(), &video_id, kind, quality);
        self.registry.create(task.clone())?;

        let cancel = CancellationToken::new();
        self.tokens().insert(task.id.clone(), cancel.clone());

        info!(
            task_id = %task.id,
            video_id = %video_id,
            kind = %kind,
            quality = %quality,
            "Task submitted"
        );

        let manager = self.clone();
        let task_id = task.id.clone();
        tokio::spawn(async move {
            let _admission = permit;
            manager.run(&task_id, &video_id, kind, quality, &cancel).await;
            manager.tokens().remove(&task_id);
        });

        Ok(task)
    }

    /// Ask a running task to stop. The worker records the cancellation itself.
    pub fn cancel(&self, task_id: &str) -> Result<Task, DownloadError> {
        let task = self
            .registry
            .get(task_id)
            .ok_or_else(|| DownloadError::TaskNotFound(task_id.to_string()))?;

        if !task.status.is_terminal() {
            if let Some(token) = self.tokens().get(task_id) {
                info!(task_id, "Cancellation requested");
                token.cancel();
            }
        }

        Ok(task)
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.cancellations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(
        &self,
        task_id: &str,
        video_id: &VideoId,
        kind: MediaKind,
        quality: QualityHint,
        cancel: &CancellationToken,
    ) {
        // Queued tasks stay in `preparing` until a running slot frees up
        let _running = tokio::select! {
            permit = Arc::clone(&self.running).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.finish(task_id, Err(DownloadError::Cancelled)).await;
                    return;
                }
            },
            _ = cancel.cancelled() => {
                self.finish(task_id, Err(DownloadError::Cancelled)).await;
                return;
            }
        };

        let job = self.execute(task_id, video_id, kind, quality, cancel);
        let outcome = match tokio::time::timeout(self.config.task_timeout, job).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DownloadError::TimedOut(self.config.task_timeout.as_secs())),
        };

        self.finish(task_id, outcome).await;
    }

    async fn execute(
        &self,
        task_id: &str,
        video_id: &VideoId,
        kind: MediaKind,
        quality: QualityHint,
        cancel: &CancellationToken,
    ) -> Result<Artifact, DownloadError> {
        let descriptor = tokio::select! {
            resolved = self.resolver.resolve_best(video_id, kind, quality) => resolved?,
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        };

        self.registry.apply(
            task_id,
            TaskEvent::Resolved {
                title: descriptor.title.clone(),
                uploader: descriptor.uploader.clone(),
                backend: descriptor.backend.clone(),
            },
        )?;

        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        // Progress flows over a channel into the registry
        let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let registry = Arc::clone(&self.registry);
        let consumer_id = task_id.to_string();
        let consumer = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                if registry.apply(&consumer_id, TaskEvent::Progress(progress)).is_err() {
                    break;
                }
            }
        });

        let emitter = ProgressEmitter::new(tx);
        let fetched = self.executor.fetch(task_id, &descriptor, &emitter, cancel).await;
        drop(emitter);
        // Every progress event lands before the terminal transition
        let _ = consumer.await;
        let artifact = fetched?;

        if !TransferExecutor::needs_transcode(kind, &descriptor.ext) {
            return Ok(artifact);
        }

        self.registry.apply(task_id, TaskEvent::Processing)?;
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let bitrate = match quality {
            QualityHint::Bitrate(kbps) => kbps,
            _ => self.config.default_bitrate_kbps,
        };
        self.executor.transcode_audio(&artifact, bitrate).await
    }

    async fn finish(&self, task_id: &str, outcome: Result<Artifact, DownloadError>) {
        let event = match outcome {
            Ok(artifact) => {
                info!(task_id, file = %artifact.filename, bytes = artifact.bytes, "Task completed");
                TaskEvent::Completed {
                    filename: artifact.filename,
                }
            }
            Err(e) => {
                let removed = self.executor.discard_task_files(task_id).await;
                match &e {
                    DownloadError::Cancelled => info!(task_id, removed, "Task cancelled"),
                    _ => warn!(task_id, kind = ?e.kind(), error = %e, removed, "Task failed"),
                }
                TaskEvent::Failed(e)
            }
        };

        // The sweeper may already have dropped a very old record
        if let Err(e) = self.registry.apply(task_id, event) {
            error!(task_id, error = %e, "Could not record task outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{NetworkConfig, StreamDescriptor, StreamSource, VideoInfo};
    use crate::downloader::traits::BackendAdapter;
    use crate::tasks::model::TaskStatus;
    use crate::tasks::registry::InMemoryTaskRegistry;
    use crate::transfer::{AudioCodec, DelegatedTransfer, FfmpegTranscoder, HttpTransfer, Transcoder};
    use crate::downloader::errors::ErrorKind;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct DirectBackend {
        url: String,
        ext: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl BackendAdapter for DirectBackend {
        fn name(&self) -> &str {
            "direct"
        }

        async fn resolve(
            &self,
            _video_id: &VideoId,
            _kind: MediaKind,
            _quality: QualityHint,
        ) -> Result<StreamDescriptor, DownloadError> {
            tokio::time::sleep(self.delay).await;
            Ok(StreamDescriptor {
                source: StreamSource::Direct { url: self.url.clone(), headers: Vec::new() },
                ext: self.ext.to_string(),
                title: "Song".to_string(),
                uploader: "Artist".to_string(),
                filesize: None,
                backend: "direct".to_string(),
            })
        }

        async fn get_video_info(&self, _video_id: &VideoId) -> Result<VideoInfo, DownloadError> {
            Err(DownloadError::Transport("unused".to_string()))
        }
    }

    struct CopyTranscoder;

    #[async_trait]
    impl Transcoder for CopyTranscoder {
        async fn transcode(
            &self,
            input: &Path,
            codec: AudioCodec,
            _bitrate_kbps: u32,
            _timeout: Duration,
        ) -> Result<PathBuf, DownloadError> {
            let output = FfmpegTranscoder::output_path(input, codec);
            tokio::fs::copy(input, &output).await?;
            Ok(output)
        }
    }

    fn manager(dir: &Path, backend: DirectBackend, config: WorkerConfig) -> DownloadManager {
        let executor = TransferExecutor::new(
            dir,
            HttpTransfer::with_client(reqwest::Client::new()),
            DelegatedTransfer::new("/nonexistent/yt-dlp", NetworkConfig::default()),
            Arc::new(CopyTranscoder),
            Duration::from_secs(10),
            Duration::from_secs(10),
        );
        DownloadManager::new(
            Arc::new(InMemoryTaskRegistry::new()),
            Arc::new(Resolver::with_backends(vec![Arc::new(backend)])),
            Arc::new(executor),
            config,
        )
    }

    async fn wait_terminal(manager: &DownloadManager, id: &str) -> Task {
        for _ in 0..200 {
            let task = manager.registry().get(id).unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("task {} did not finish", id);
    }

    fn request(url: &str, kind: &str, quality: &str) -> SubmitRequest {
        SubmitRequest {
            url: url.to_string(),
            kind: kind.to_string(),
            quality: quality.to_string(),
        }
    }

    #[tokio::test]
    async fn test_audio_task_completes_as_mp3() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let backend = DirectBackend { url: server.uri(), ext: "m4a", delay: Duration::ZERO };
        let manager = manager(dir.path(), backend, WorkerConfig::default());

        let task = manager
            .submit(request("https://www.youtube.com/watch?v=ABC123&list=PL1", "audio", "192k"))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Preparing);
        assert_eq!(task.source_url, "https://www.youtube.com/watch?v=ABC123");

        let done = wait_terminal(&manager, &task.id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress_percent, 100);

        let filename = done.output_filename.unwrap();
        assert!(filename.ends_with(".mp3"));
        let meta = std::fs::metadata(dir.path().join(&filename)).unwrap();
        assert!(meta.len() > 0);
        // Pre-transcode file is gone
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectBackend { url: String::new(), ext: "mp4", delay: Duration::ZERO };
        let manager = manager(dir.path(), backend, WorkerConfig::default());

        let empty = manager.submit(request("  ", "video", "best")).unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::InvalidRequest);

        let bad_url = manager.submit(request("https://vimeo.com/1", "video", "best")).unwrap_err();
        assert_eq!(bad_url.kind(), ErrorKind::InvalidUrl);

        let bad_bitrate = manager
            .submit(request("https://youtu.be/ABC123", "audio", "999k"))
            .unwrap_err();
        assert_eq!(bad_bitrate.kind(), ErrorKind::InvalidRequest);

        assert!(manager.registry().list().is_empty());
    }

    #[tokio::test]
    async fn test_admission_limit_and_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectBackend {
            url: "http://127.0.0.1:9/unused".to_string(),
            ext: "mp4",
            delay: Duration::from_secs(30),
        };
        let config = WorkerConfig { max_concurrent: 1, max_queued: 0, ..WorkerConfig::default() };
        let manager = manager(dir.path(), backend, config);

        let first = manager.submit(request("https://youtu.be/ABC123", "video", "best")).unwrap();
        let busy = manager.submit(request("https://youtu.be/DEF456", "video", "best")).unwrap_err();
        assert_eq!(busy.kind(), ErrorKind::ServiceBusy);

        manager.cancel(&first.id).unwrap();
        let cancelled = wait_terminal(&manager, &first.id).await;
        assert_eq!(cancelled.status, TaskStatus::Error);
        assert_eq!(cancelled.error_kind, Some(ErrorKind::Cancelled));

        // The slot is released once the worker exits
        for _ in 0..100 {
            if manager.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.submit(request("https://youtu.be/DEF456", "video", "best")).is_ok());
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectBackend { url: String::new(), ext: "mp4", delay: Duration::ZERO };
        let manager = manager(dir.path(), backend, WorkerConfig::default());
        let err = manager.cancel("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TaskNotFound);
    }

    #[tokio::test]
    async fn test_failed_transfer_marks_error_without_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let backend = DirectBackend { url: server.uri(), ext: "mp4", delay: Duration::ZERO };
        let manager = manager(dir.path(), backend, WorkerConfig::default());

        let task = manager.submit(request("https://youtu.be/ABC123", "video", "720p")).unwrap();
        let done = wait_terminal(&manager, &task.id).await;

        assert_eq!(done.status, TaskStatus::Error);
        assert!(done.error_detail.is_some());
        assert!(done.output_filename.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
