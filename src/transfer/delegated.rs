// Delegated transfer - download handed to yt-dlp
//
// The format and player client are pinned to the ones that resolved the
// stream, so yt-dlp does not re-run its own selection. Progress comes from
// `--newline` output lines.

use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{NetworkConfig, ProgressEvent};
use crate::downloader::traits::ProgressEmitter;

lazy_static::lazy_static! {
    static ref PROGRESS_RE: Regex = Regex::new(
        r"\[download\]\s+(\d+(?:\.\d+)?)%(?:\s+of\s+~?\s*\S+)?(?:\s+in\s+\S+)?(?:\s+at\s+(\S+/s))?(?:\s+ETA\s+(\S+))?"
    ).unwrap();
}

/// Parse one `[download]` progress line
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let caps = PROGRESS_RE.captures(line)?;
    let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
    let speed = caps.get(2).map(|m| m.as_str().to_string());
    let eta = caps
        .get(3)
        .map(|m| m.as_str().to_string())
        .filter(|e| e != "Unknown");

    Some(ProgressEvent::Percent {
        percent: percent.clamp(0.0, 100.0),
        speed,
        eta,
    })
}

pub struct DelegatedTransfer {
    ytdlp_path: String,
    network: NetworkConfig,
}

impl DelegatedTransfer {
    pub fn new(ytdlp_path: impl Into<String>, network: NetworkConfig) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            network,
        }
    }

    pub fn build_args(
        &self,
        format_id: &str,
        player_client: &str,
        page_url: &str,
        dest: &Path,
    ) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            format_id.to_string(),
            "--extractor-args".to_string(),
            format!("youtube:player_client={}", player_client),
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--no-mtime".to_string(),
            "--no-part".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.network.metadata_timeout.as_secs().max(1).to_string(),
            "-o".to_string(),
            dest.to_string_lossy().to_string(),
        ];

        if let Some(path) = &self.network.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.clone());
        }

        if let Some(proxy) = &self.network.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(page_url.to_string());
        args
    }

    /// Run yt-dlp until it exits, returning the size of the written file
    pub async fn fetch(
        &self,
        format_id: &str,
        player_client: &str,
        page_url: &str,
        dest: &Path,
        progress: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let args = self.build_args(format_id, player_client, page_url, dest);
        debug!("Running: {} {}", self.ytdlp_path, args.join(" "));

        let mut child = TokioCommand::new(&self.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloadError::Transport(format!("Failed to start yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Transport("yt-dlp stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Transport("yt-dlp stderr not captured".to_string()))?;

        let emitter = progress.clone();
        let line_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(event) = parse_progress_line(&line) {
                    emitter.emit(event).await;
                }
            }
        });
        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| DownloadError::Transport(format!("yt-dlp process failed: {}", e)))?,
            _ = cancel.cancelled() => {
                info!(page_url, "Cancelling delegated download");
                let _ = child.kill().await;
                line_reader.abort();
                stderr_reader.abort();
                return Err(DownloadError::Cancelled);
            }
        };

        let _ = line_reader.await;
        let stderr_content = stderr_reader.await.unwrap_or_default();

        if !status.success() {
            return Err(DownloadError::classify(&stderr_content));
        }

        let size = tokio::fs::metadata(dest)
            .await
            .map(|m| m.len())
            .map_err(|_| DownloadError::Storage("yt-dlp reported success but wrote no file".to_string()))?;
        if size == 0 {
            return Err(DownloadError::Storage("yt-dlp produced an empty file".to_string()));
        }

        Ok(size)
    }
}
