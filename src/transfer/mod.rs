// Transfer executor - turns a resolved stream into a file in the output directory
//
// Files are written as `<task_id>_<title>.<ext>.part` and renamed once the
// transfer completes, so the output directory never holds a truncated file
// under its final name.

pub mod delegated;
pub mod http;
pub mod transcode;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{MediaKind, StreamDescriptor, StreamSource};
use crate::downloader::traits::ProgressEmitter;
use crate::downloader::utils::sanitize_filename;

pub use delegated::DelegatedTransfer;
pub use http::HttpTransfer;
pub use transcode::{AudioCodec, FfmpegTranscoder, Transcoder};

const PART_SUFFIX: &str = ".part";

// Grace period on top of the transcoder's own timeout
const TRANSCODE_GRACE: Duration = Duration::from_secs(5);

/// A finished file in the output directory
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub filename: String,
    pub bytes: u64,
}

pub struct TransferExecutor {
    output_dir: PathBuf,
    http: HttpTransfer,
    delegated: DelegatedTransfer,
    transcoder: Arc<dyn Transcoder>,
    transfer_timeout: Duration,
    transcode_timeout: Duration,
}

impl TransferExecutor {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        http: HttpTransfer,
        delegated: DelegatedTransfer,
        transcoder: Arc<dyn Transcoder>,
        transfer_timeout: Duration,
        transcode_timeout: Duration,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            http,
            delegated,
            transcoder,
            transfer_timeout,
            transcode_timeout,
        }
    }

    /// Deterministic, collision-free name: the task id leads
    pub fn output_filename(task_id: &str, title: &str, ext: &str) -> String {
        format!("{}_{}.{}", task_id, sanitize_filename(title), ext)
    }

    /// Audio is delivered as MP3; anything else gets transcoded
    pub fn needs_transcode(kind: MediaKind, ext: &str) -> bool {
        kind == MediaKind::Audio && !ext.eq_ignore_ascii_case(AudioCodec::Mp3.extension())
    }

    pub async fn fetch(
        &self,
        task_id: &str,
        descriptor: &StreamDescriptor,
        progress: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<Artifact, DownloadError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let filename = Self::output_filename(task_id, &descriptor.title, &descriptor.ext);
        let path = self.output_dir.join(&filename);
        let part = self.output_dir.join(format!("{}{}", filename, PART_SUFFIX));

        info!(task_id, backend = %descriptor.backend, file = %filename, "Starting transfer");

        let transfer = async {
            match &descriptor.source {
                StreamSource::Direct { url, headers } => {
                    self.http.fetch(url, headers, &part, progress, cancel).await
                }
                StreamSource::Delegated {
                    format_id,
                    player_client,
                    page_url,
                } => {
                    self.delegated
                        .fetch(format_id, player_client, page_url, &part, progress, cancel)
                        .await
                }
            }
        };

        let bytes = match tokio::time::timeout(self.transfer_timeout, transfer).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                remove_quietly(&part).await;
                return Err(e);
            }
            Err(_) => {
                remove_quietly(&part).await;
                return Err(DownloadError::TimedOut(self.transfer_timeout.as_secs()));
            }
        };

        if bytes == 0 {
            remove_quietly(&part).await;
            return Err(DownloadError::Transport("transfer finished with an empty body".to_string()));
        }

        tokio::fs::rename(&part, &path).await?;
        info!(task_id, file = %filename, bytes, "Transfer complete");

        Ok(Artifact { path, filename, bytes })
    }

    /// Transcode to MP3 and delete the original on success
    pub async fn transcode_audio(
        &self,
        artifact: &Artifact,
        bitrate_kbps: u32,
    ) -> Result<Artifact, DownloadError> {
        let job = self.transcoder.transcode(
            &artifact.path,
            AudioCodec::Mp3,
            bitrate_kbps,
            self.transcode_timeout,
        );

        let output = match tokio::time::timeout(self.transcode_timeout + TRANSCODE_GRACE, job).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DownloadError::TranscodeFailed(format!(
                    "transcode exceeded {}s",
                    self.transcode_timeout.as_secs()
                )))
            }
        };

        let bytes = tokio::fs::metadata(&output).await?.len();
        if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
            warn!(file = %artifact.path.display(), error = %e, "Failed to remove pre-transcode file");
        }

        let filename = output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| DownloadError::Storage("transcoder returned a path without a file name".to_string()))?;

        Ok(Artifact {
            path: output,
            filename,
            bytes,
        })
    }

    /// Remove every file belonging to a task (partials and leftovers)
    pub async fn discard_task_files(&self, task_id: &str) -> usize {
        let prefix = format!("{}_", task_id);
        let mut removed = 0;

        let Ok(mut entries) = tokio::fs::read_dir(&self.output_dir).await else {
            return 0;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(&prefix)
                && tokio::fs::remove_file(entry.path()).await.is_ok()
            {
                removed += 1;
            }
        }

        removed
    }

    /// Path of a finished artifact, rejecting anything that would escape the output directory
    pub fn artifact_path(&self, filename: &str) -> Result<PathBuf, DownloadError> {
        let name = Path::new(filename);
        if filename.is_empty() || name.file_name().map(|n| n != name.as_os_str()).unwrap_or(true) {
            return Err(DownloadError::ArtifactMissing(filename.to_string()));
        }
        Ok(self.output_dir.join(name))
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), error = %e, "Failed to remove partial file"),
    }
}
