// Error types for the resolution engine, transfers and the task pipeline

use serde::Serialize;
use thiserror::Error;

use super::diagnostics::diagnose_error;

/// Classified error kind, exposed to polling clients instead of raw messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    InvalidRequest,
    NotFound,
    NoMatchingFormat,
    Blocked,
    Transport,
    AllBackendsFailed,
    TranscodeFailed,
    Storage,
    TaskNotFound,
    ArtifactNotReady,
    ArtifactMissing,
    Cancelled,
    TimedOut,
    ServiceBusy,
}

/// One adapter's failure inside an `AllBackendsFailed` chain
#[derive(Debug, Clone)]
pub struct BackendFailure {
    pub backend: String,
    pub error: DownloadError,
}

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// URL is not a YouTube video URL, or no video id could be extracted
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Malformed submission (missing url, unknown kind, bad quality hint)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Video does not exist, is private or was deleted
    #[error("Video not found: {0}")]
    NotFound(String),

    /// Video exists but no stream matches the requested kind and quality
    #[error("No matching format: {0}")]
    NoMatchingFormat(String),

    /// Bot detection, rate limiting or sign-in required
    #[error("Blocked by YouTube: {0}")]
    Blocked(String),

    /// Network failure or timeout
    #[error("Network error: {0}")]
    Transport(String),

    /// Every configured backend failed; failures are kept in attempt order
    #[error("All backends failed: {}", format_failures(.0))]
    AllBackendsFailed(Vec<BackendFailure>),

    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("File is not ready yet (current status: {status})")]
    ArtifactNotReady { status: String },

    /// Task completed but its output file has since been removed
    #[error("File no longer available: {0}")]
    ArtifactMissing(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Timed out after {0}s")]
    TimedOut(u64),

    #[error("Too many downloads in progress, try again later")]
    ServiceBusy,
}

fn format_failures(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "no backends configured".to_string();
    }
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.backend, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_) => ErrorKind::InvalidUrl,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NoMatchingFormat(_) => ErrorKind::NoMatchingFormat,
            Self::Blocked(_) => ErrorKind::Blocked,
            Self::Transport(_) => ErrorKind::Transport,
            Self::AllBackendsFailed(_) => ErrorKind::AllBackendsFailed,
            Self::TranscodeFailed(_) => ErrorKind::TranscodeFailed,
            Self::Storage(_) => ErrorKind::Storage,
            Self::TaskNotFound(_) => ErrorKind::TaskNotFound,
            Self::ArtifactNotReady { .. } => ErrorKind::ArtifactNotReady,
            Self::ArtifactMissing(_) => ErrorKind::ArtifactMissing,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TimedOut(_) => ErrorKind::TimedOut,
            Self::ServiceBusy => ErrorKind::ServiceBusy,
        }
    }

    /// Whether the resolution engine should move on to the next backend.
    /// `NotFound` is final: no other backend can produce a deleted video.
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, Self::NotFound(_) | Self::Cancelled | Self::InvalidUrl(_))
    }

    /// Classify raw tool output (yt-dlp stderr, API error bodies)
    pub fn classify(message: &str) -> Self {
        let summary = summarize(message);
        match diagnose_error(message) {
            Some(reason) => reason.into_error(summary),
            None => Self::Transport(summary),
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_timeout() {
            return Self::Transport(format!("request timed out: {}", err));
        }
        Self::Transport(err.to_string())
    }

    /// Map an HTTP status returned by a backend or media host
    pub fn from_status(status: u16, context: &str) -> Self {
        match status {
            404 | 410 => Self::NotFound(format!("HTTP {}: {}", status, context)),
            401 | 403 | 429 => Self::Blocked(format!("HTTP {}: {}", status, context)),
            _ => Self::Transport(format!("HTTP {}: {}", status, context)),
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

// Keep the first meaningful line of multi-line tool output
fn summarize(message: &str) -> String {
    let trimmed = message.trim();
    let line = trimmed
        .lines()
        .find(|l| l.trim_start().to_lowercase().starts_with("error"))
        .or_else(|| trimmed.lines().last())
        .unwrap_or(trimmed)
        .trim();
    line.chars().take(300).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_unavailable_is_not_found() {
        let err = DownloadError::classify("WARNING: foo\nERROR: [youtube] abc: Video unavailable");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("Video unavailable"));
    }

    #[test]
    fn test_classify_bot_is_blocked() {
        let err = DownloadError::classify("ERROR: Sign in to confirm you're not a bot");
        assert_eq!(err.kind(), ErrorKind::Blocked);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(DownloadError::from_status(404, "x").kind(), ErrorKind::NotFound);
        assert_eq!(DownloadError::from_status(429, "x").kind(), ErrorKind::Blocked);
        assert_eq!(DownloadError::from_status(502, "x").kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_all_backends_failed_lists_chain() {
        let err = DownloadError::AllBackendsFailed(vec![
            BackendFailure {
                backend: "invidious".to_string(),
                error: DownloadError::Transport("timeout".to_string()),
            },
            BackendFailure {
                backend: "yt-dlp".to_string(),
                error: DownloadError::Blocked("HTTP 403".to_string()),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("[invidious] Network error: timeout"));
        assert!(text.contains("[yt-dlp] Blocked by YouTube: HTTP 403"));
        assert!(text.find("invidious") < text.find("yt-dlp"));
    }

    #[test]
    fn test_fallback_policy() {
        assert!(!DownloadError::NotFound("gone".into()).allows_fallback());
        assert!(DownloadError::Blocked("bot".into()).allows_fallback());
        assert!(DownloadError::Transport("reset".into()).allows_fallback());
        assert!(DownloadError::NoMatchingFormat("720p".into()).allows_fallback());
    }
}
