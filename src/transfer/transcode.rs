// Audio transcoding through an external ffmpeg process

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::downloader::errors::DownloadError;
use crate::downloader::utils::run_output_with_timeout;

/// Target codec for the transcode step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Mp3,
}

impl AudioCodec {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
        }
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert `input` to `codec` at `bitrate_kbps`, returning the new file.
    /// The input file is left in place.
    async fn transcode(
        &self,
        input: &Path,
        codec: AudioCodec,
        bitrate_kbps: u32,
        timeout: Duration,
    ) -> Result<PathBuf, DownloadError>;
}

pub struct FfmpegTranscoder {
    ffmpeg_path: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// `foo.webm` -> `foo.mp3`; an input already carrying the target extension gets a suffix
    pub fn output_path(input: &Path, codec: AudioCodec) -> PathBuf {
        let target = input.with_extension(codec.extension());
        if target == input {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            input.with_file_name(format!("{}.transcoded.{}", stem, codec.extension()))
        } else {
            target
        }
    }

    pub fn build_args(input: &Path, output: &Path, bitrate_kbps: u32) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-ar".to_string(),
            "44100".to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-b:a".to_string(),
            format!("{}k", bitrate_kbps),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        codec: AudioCodec,
        bitrate_kbps: u32,
        timeout: Duration,
    ) -> Result<PathBuf, DownloadError> {
        let output = Self::output_path(input, codec);
        let args = Self::build_args(input, &output, bitrate_kbps);
        debug!("Running: {} {}", self.ffmpeg_path, args.join(" "));

        let result = run_output_with_timeout(&self.ffmpeg_path, args, timeout.as_secs().max(1)).await;

        let failure = match result {
            Ok(out) if out.status.success() => None,
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                let detail = stderr
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or("ffmpeg exited with an error")
                    .trim()
                    .to_string();
                Some(format!("ffmpeg exited with {}: {}", out.status, detail))
            }
            Err(e) => Some(format!("ffmpeg: {}", e)),
        };

        if let Some(message) = failure {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(DownloadError::TranscodeFailed(message));
        }

        match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => {
                info!(output = %output.display(), bitrate_kbps, "Transcode finished");
                Ok(output)
            }
            _ => {
                let _ = tokio::fs::remove_file(&output).await;
                Err(DownloadError::TranscodeFailed(
                    "ffmpeg produced no output".to_string(),
                ))
            }
        }
    }
}
