// YouTube URL validation and normalization
//
// Every submission is reduced to a canonical video id before a task is
// created; playlist, timestamp and tracking parameters are dropped.

use regex::Regex;
use std::fmt;
use url::Url;

use super::errors::DownloadError;

const MAX_URL_LENGTH: usize = 2048;

const ALLOWED_HOSTS: [&str; 5] = [
    "www.youtube.com",
    "youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
];

const DANGEROUS_CHARS: [char; 5] = ['<', '>', '"', '\'', '`'];

lazy_static::lazy_static! {
    static ref VIDEO_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap();
}

/// Canonical YouTube video identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoId(String);

impl VideoId {
    pub fn parse(raw: &str) -> Result<Self, DownloadError> {
        let id = raw.trim();
        if VIDEO_ID_RE.is_match(id) {
            Ok(Self(id.to_string()))
        } else {
            Err(DownloadError::InvalidUrl(format!("invalid video id '{}'", id)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `https://www.youtube.com/watch?v=<id>`
    pub fn canonical_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a raw URL and extract its video id
pub fn normalize(raw_url: &str) -> Result<VideoId, DownloadError> {
    let raw = raw_url.trim();
    if raw.is_empty() {
        return Err(DownloadError::InvalidUrl("URL is empty".to_string()));
    }
    if raw.len() > MAX_URL_LENGTH {
        return Err(DownloadError::InvalidUrl("URL is too long".to_string()));
    }
    if raw.contains(&DANGEROUS_CHARS[..]) {
        return Err(DownloadError::InvalidUrl(
            "URL contains unsafe characters".to_string(),
        ));
    }

    let parsed = Url::parse(raw)
        .map_err(|e| DownloadError::InvalidUrl(format!("cannot parse '{}': {}", raw, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DownloadError::InvalidUrl(
            "URL must use http or https".to_string(),
        ));
    }

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    if !ALLOWED_HOSTS.contains(&host.as_str()) {
        return Err(DownloadError::InvalidUrl(format!(
            "only YouTube URLs are supported, got host '{}'",
            host
        )));
    }

    let candidate = if host == "youtu.be" {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .map(str::to_string)
    } else {
        extract_from_youtube_path(&parsed)
    };

    match candidate {
        Some(id) if !id.is_empty() => VideoId::parse(&id),
        _ => Err(DownloadError::InvalidUrl(format!(
            "no video id found in '{}'",
            raw
        ))),
    }
}

fn extract_from_youtube_path(parsed: &Url) -> Option<String> {
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        ["watch"] => parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned()),
        ["shorts", id, ..] | ["embed", id, ..] | ["live", id, ..] | ["v", id, ..] => {
            Some(id.to_string())
        }
        _ => None,
    }
}
