// Common data models for the resolution engine and transfers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::errors::DownloadError;

/// What the client asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "video" => Ok(Self::Video),
            "audio" | "mp3" => Ok(Self::Audio),
            other => Err(DownloadError::InvalidRequest(format!(
                "unknown kind '{}', expected 'video' or 'audio'",
                other
            ))),
        }
    }
}

/// Audio bitrates accepted for MP3 output, in kbps
pub const MIN_AUDIO_BITRATE: u32 = 32;
pub const MAX_AUDIO_BITRATE: u32 = 320;

/// Requested quality: "best", a resolution label for video, a bitrate for audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityHint {
    Best,
    /// Target height in pixels ("720p")
    Height(u32),
    /// Target MP3 bitrate in kbps ("192k")
    Bitrate(u32),
}

impl QualityHint {
    /// Parse and validate a hint for the given kind
    pub fn parse(kind: MediaKind, raw: &str) -> Result<Self, DownloadError> {
        let value = raw.trim().to_lowercase();
        if matches!(value.as_str(), "" | "best" | "highest") {
            return Ok(Self::Best);
        }

        match kind {
            MediaKind::Video => {
                let digits = value.strip_suffix('p').unwrap_or(&value);
                match digits.parse::<u32>() {
                    Ok(height) if height > 0 && height <= 4320 => Ok(Self::Height(height)),
                    _ => Err(DownloadError::InvalidRequest(format!(
                        "invalid video quality '{}', expected 'best' or e.g. '720p'",
                        raw
                    ))),
                }
            }
            MediaKind::Audio => {
                let bitrate = value
                    .strip_suffix('k')
                    .and_then(|d| d.parse::<u32>().ok())
                    .ok_or_else(|| {
                        DownloadError::InvalidRequest(format!(
                            "invalid bitrate '{}', expected e.g. '192k'",
                            raw
                        ))
                    })?;
                if !(MIN_AUDIO_BITRATE..=MAX_AUDIO_BITRATE).contains(&bitrate) {
                    return Err(DownloadError::InvalidRequest(format!(
                        "bitrate must be between {}k and {}k: {}",
                        MIN_AUDIO_BITRATE, MAX_AUDIO_BITRATE, raw
                    )));
                }
                Ok(Self::Bitrate(bitrate))
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Best => "best".to_string(),
            Self::Height(h) => format!("{}p", h),
            Self::Bitrate(b) => format!("{}k", b),
        }
    }
}

impl fmt::Display for QualityHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// One stream offered by a backend, normalized across backends
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFormat {
    /// Backend-specific id (itag or yt-dlp format_id)
    pub format_id: String,
    /// Direct byte source, when the backend exposes one
    pub url: Option<String>,
    /// Container extension (mp4, webm, m4a)
    pub ext: String,
    pub height: Option<u32>,
    /// Audio bitrate in kbps
    pub audio_bitrate: Option<u32>,
    pub has_video: bool,
    pub has_audio: bool,
    pub filesize: Option<u64>,
}

impl StreamFormat {
    /// Single file with pre-muxed audio and video
    pub fn is_progressive(&self) -> bool {
        self.has_video && self.has_audio
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }
}

/// Where the bytes of a resolved stream come from
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSource {
    /// Plain HTTP(S) URL, fetched by the transfer executor
    Direct {
        url: String,
        headers: Vec<(String, String)>,
    },
    /// Download handed to yt-dlp, pinned to the format and client that resolved it
    Delegated {
        format_id: String,
        player_client: String,
        page_url: String,
    },
}

/// Result of a successful resolution
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub source: StreamSource,
    pub ext: String,
    pub title: String,
    pub uploader: String,
    pub filesize: Option<u64>,
    /// Name of the backend that produced this descriptor
    pub backend: String,
}

impl StreamDescriptor {
    /// Reject descriptors that would leave the task without a source, container or title
    pub fn validate(self) -> Result<Self, DownloadError> {
        let source_ok = match &self.source {
            StreamSource::Direct { url, .. } => !url.trim().is_empty(),
            StreamSource::Delegated { format_id, page_url, .. } => {
                !format_id.trim().is_empty() && !page_url.trim().is_empty()
            }
        };
        if !source_ok {
            return Err(DownloadError::NoMatchingFormat(format!(
                "{} returned a stream without a source",
                self.backend
            )));
        }
        if self.ext.trim().is_empty() {
            return Err(DownloadError::NoMatchingFormat(format!(
                "{} returned a stream without a container",
                self.backend
            )));
        }
        if self.title.trim().is_empty() {
            return Err(DownloadError::NoMatchingFormat(format!(
                "{} returned a stream without a title",
                self.backend
            )));
        }
        Ok(self)
    }
}

/// Video information for the info endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration: u64,
    pub thumbnail: String,
    /// Progressive resolutions, highest first ("720p")
    pub resolutions: Vec<String>,
    /// Best pure-audio bitrate in kbps
    pub audio_bitrate: Option<u32>,
}

/// Progress reported by a transfer
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Byte counts from a direct fetch; `total` is absent when the host omits it
    Bytes {
        downloaded: u64,
        total: Option<u64>,
        speed: Option<String>,
        eta: Option<String>,
    },
    /// Percentage reported by a delegated downloader
    Percent {
        percent: f32,
        speed: Option<String>,
        eta: Option<String>,
    },
}

/// Network configuration shared by backends and transfers
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// SOCKS5/HTTP proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,

    /// Connect/read timeout for metadata calls
    pub metadata_timeout: Duration,

    /// Upper bound for a whole media transfer
    pub transfer_timeout: Duration,

    /// Netscape cookie file handed to yt-dlp, opaque to the engine
    pub cookies_path: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            metadata_timeout: Duration::from_secs(15),
            transfer_timeout: Duration::from_secs(600),
            cookies_path: None,
        }
    }
}
