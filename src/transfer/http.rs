// Streamed HTTP fetch with range resume
//
// Bytes are appended to the destination as they arrive. When the connection
// drops (or the body ends short of Content-Length) the fetch reopens with
// `Range: bytes=<written>-`. A host that ignores the range and answers 200,
// or refuses it while the file is still short, gets a restart from byte 0.

use futures_util::StreamExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{NetworkConfig, ProgressEvent};
use crate::downloader::traits::ProgressEmitter;
use crate::downloader::utils::{build_http_client, format_duration, format_size};

const DEFAULT_MAX_RESUMES: u32 = 3;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

pub struct HttpTransfer {
    client: reqwest::Client,
    max_resumes: u32,
    resume_backoff: Duration,
}

enum Attempt {
    Complete,
    /// Connection lost mid-body; resume from what is on disk
    Interrupted(String),
}

impl HttpTransfer {
    pub fn new(network: &NetworkConfig) -> Result<Self, DownloadError> {
        // No whole-request timeout: the executor bounds the transfer as a whole
        let client = build_http_client(network.proxy.as_deref(), network.metadata_timeout, None)?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_resumes: DEFAULT_MAX_RESUMES,
            resume_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_max_resumes(mut self, max_resumes: u32, backoff: Duration) -> Self {
        self.max_resumes = max_resumes;
        self.resume_backoff = backoff;
        self
    }

    /// Fetch `url` into `dest`, returning the number of bytes on disk.
    /// An existing file at `dest` is treated as a previous partial transfer.
    pub async fn fetch(
        &self,
        url: &str,
        headers: &[(String, String)],
        dest: &Path,
        progress: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dest)
            .await?;
        let mut written = file.seek(SeekFrom::End(0)).await?;
        let mut total: Option<u64> = None;
        let mut resumes = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            match self
                .attempt(url, headers, &mut file, &mut written, &mut total, progress, cancel)
                .await?
            {
                Attempt::Complete => break,
                Attempt::Interrupted(reason) if resumes < self.max_resumes => {
                    resumes += 1;
                    warn!(url, written, resumes, %reason, "Transfer interrupted, resuming");
                    tokio::time::sleep(self.resume_backoff).await;
                }
                Attempt::Interrupted(reason) => {
                    return Err(DownloadError::Transport(format!(
                        "transfer interrupted after {} resumes: {}",
                        resumes, reason
                    )));
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        progress
            .emit(ProgressEvent::Bytes {
                downloaded: written,
                total,
                speed: None,
                eta: None,
            })
            .await;

        Ok(written)
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        url: &str,
        headers: &[(String, String)],
        file: &mut File,
        written: &mut u64,
        total: &mut Option<u64>,
        progress: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<Attempt, DownloadError> {
        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if *written > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", written));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                return Ok(Attempt::Interrupted(e.to_string()))
            }
            Err(e) => return Err(DownloadError::from_reqwest(e)),
        };

        let status = response.status();

        if status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE && *written > 0 {
            // `Content-Range: bytes */<size>` states the real length
            if let Some(full) = response
                .headers()
                .get(reqwest::header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)
            {
                *total = Some(full);
            }

            match *total {
                Some(expected) if *written < expected => {
                    warn!(url, written = *written, expected, "Range refused on a short file, restarting from byte 0");
                    file.set_len(0).await?;
                    file.seek(SeekFrom::Start(0)).await?;
                    *written = 0;
                    return Ok(Attempt::Interrupted(format!(
                        "range refused at {} of {} bytes",
                        written, expected
                    )));
                }
                _ => {
                    debug!(url, written = *written, "Range not satisfiable, treating as complete");
                    return Ok(Attempt::Complete);
                }
            }
        }

        if !status.is_success() {
            return Err(DownloadError::from_status(status.as_u16(), url));
        }

        if *written > 0 && status != reqwest::StatusCode::PARTIAL_CONTENT {
            warn!(url, discarded = *written, "Host ignored range request, restarting from byte 0");
            file.set_len(0).await?;
            file.seek(SeekFrom::Start(0)).await?;
            *written = 0;
        }

        if status == reqwest::StatusCode::PARTIAL_CONTENT {
            let content_range = response
                .headers()
                .get(reqwest::header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok());
            if let Some(full) = content_range.and_then(parse_content_range_total) {
                *total = Some(full);
            }
        } else if let Some(length) = response.content_length() {
            *total = Some(length);
        }

        let session_start = Instant::now();
        let session_offset = *written;
        let mut last_emit: Option<Instant> = None;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Ok(Attempt::Interrupted(e.to_string())),
                None => break,
            };

            file.write_all(&chunk).await?;
            *written += chunk.len() as u64;

            if last_emit.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL) {
                last_emit = Some(Instant::now());
                let (speed, eta) = telemetry(*written - session_offset, session_start.elapsed(), *written, *total);
                progress
                    .emit(ProgressEvent::Bytes {
                        downloaded: *written,
                        total: *total,
                        speed,
                        eta,
                    })
                    .await;
            }
        }

        match *total {
            Some(expected) if *written < expected => Ok(Attempt::Interrupted(format!(
                "body ended at {} of {} bytes",
                written, expected
            ))),
            _ => Ok(Attempt::Complete),
        }
    }
}

/// `bytes 100-199/1000` -> 1000; unknown length (`*`) -> None
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().strip_prefix("bytes")?.trim().split_once('/')?;
    total.trim().parse().ok()
}

fn telemetry(
    session_bytes: u64,
    elapsed: Duration,
    written: u64,
    total: Option<u64>,
) -> (Option<String>, Option<String>) {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 || session_bytes == 0 {
        return (None, None);
    }

    let rate = session_bytes as f64 / secs;
    let speed = Some(format!("{}/s", format_size(rate as u64)));
    let eta = total
        .filter(|t| *t >= written)
        .map(|t| format_duration(((t - written) as f64 / rate) as u64));
    (speed, eta)
}
