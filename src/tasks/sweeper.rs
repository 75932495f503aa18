// Retention sweeper
//
// Two independent sweeps on one timer:
// - output files whose mtime is older than the file TTL
// - task records created longer ago than the task TTL
// A file being written keeps a fresh mtime, so active transfers are never swept.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::TaskRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_removed: usize,
    pub tasks_removed: usize,
}

pub struct RetentionSweeper {
    output_dir: PathBuf,
    registry: Arc<dyn TaskRegistry>,
    file_ttl: Duration,
    task_ttl: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        registry: Arc<dyn TaskRegistry>,
        file_ttl: Duration,
        task_ttl: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            registry,
            file_ttl,
            task_ttl,
            interval,
        }
    }

    /// Sweep on every tick until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            file_ttl_secs = self.file_ttl.as_secs(),
            task_ttl_secs = self.task_ttl.as_secs(),
            "Starting retention sweeper"
        );

        let mut ticker = interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => {
                    info!("Retention sweeper stopped");
                    return;
                }
            }

            let report = self.sweep().await;
            if report != SweepReport::default() {
                info!(
                    files_removed = report.files_removed,
                    tasks_removed = report.tasks_removed,
                    "Retention sweep complete"
                );
            }
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        SweepReport {
            files_removed: self.sweep_files().await,
            tasks_removed: self.sweep_tasks(),
        }
    }

    async fn sweep_files(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(dir = %self.output_dir.display(), error = %e, "Cannot read output directory");
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age <= self.file_ttl {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!(file = %entry.path().display(), age_secs = age.as_secs(), "Removed expired file");
                    removed += 1;
                }
                // Raced with another remover
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file = %entry.path().display(), error = %e, "Failed to remove expired file"),
            }
        }

        removed
    }

    fn sweep_tasks(&self) -> usize {
        let Ok(ttl) = time::Duration::try_from(self.task_ttl) else {
            return 0;
        };
        let cutoff = time::OffsetDateTime::now_utc() - ttl;
        let removed = self.registry.remove_created_before(cutoff);
        for id in &removed {
            debug!(task_id = %id, "Removed expired task record");
        }
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{MediaKind, QualityHint};
    use crate::downloader::youtube_url::VideoId;
    use crate::tasks::model::Task;
    use crate::tasks::registry::InMemoryTaskRegistry;

    fn sweeper(dir: &std::path::Path, registry: Arc<InMemoryTaskRegistry>, ttl: Duration) -> RetentionSweeper {
        RetentionSweeper::new(dir, registry, ttl, Duration::from_secs(24 * 3600), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_sweep_removes_old_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.mp4");
        std::fs::write(&old, b"x").unwrap();
        let file = std::fs::File::options().write(true).open(&old).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(7200)).unwrap();
        std::fs::write(dir.path().join("fresh.mp4"), b"x").unwrap();

        let registry = Arc::new(InMemoryTaskRegistry::new());
        let report = sweeper(dir.path(), registry, Duration::from_secs(3600)).sweep().await;

        assert_eq!(report.files_removed, 1);
        assert!(!old.exists());
        assert!(dir.path().join("fresh.mp4").exists());
    }

    #[tokio::test]
    async fn test_second_sweep_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"x").unwrap();

        let registry = Arc::new(InMemoryTaskRegistry::new());
        let mut stale = Task::new("old", &VideoId::parse("ABC123").unwrap(), MediaKind::Audio, QualityHint::Best);
        stale.created_at -= time::Duration::hours(48);
        registry.create(stale).unwrap();

        let sweeper = sweeper(dir.path(), registry.clone(), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(20));

        let first = sweeper.sweep().await;
        assert_eq!(first, SweepReport { files_removed: 1, tasks_removed: 1 });

        let second = sweeper.sweep().await;
        assert_eq!(second, SweepReport::default());
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(InMemoryTaskRegistry::new());
        let report = sweeper(&dir.path().join("absent"), registry, Duration::ZERO).sweep().await;
        assert_eq!(report, SweepReport::default());
    }
}
