// Blocking diagnostics
//
// yt-dlp stderr and metadata API error bodies are free text. Video ids and
// URLs are blanked out, then the rest is matched against an ordered pattern
// table; the first hit names the reason, and each reason maps onto an
// adapter error class.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::DownloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingReason {
    /// Premium, Music or Movies content behind DRM
    DrmProtected,
    MembersOnly,
    /// Format selector matched nothing
    FormatUnavailable,
    /// SABR streaming hides formats from the client
    SabrStreaming,
    PoTokenRequired,
    AgeRestricted,
    PrivateVideo,
    /// Deleted, removed or never existed
    VideoUnavailable,
    GeoBlocked,
    RateLimited,
    BotDetection,
    Forbidden,
    /// Soft IP block shows up as connect/read timeouts
    NetworkTimeout,
    Unknown,
}

// Most specific first: "members only" bodies often also say 403
const PATTERNS: &[(BlockingReason, &str)] = &[
    (
        BlockingReason::DrmProtected,
        r"\b(drm|widevine|playready|fairplay|rental)\b|encrypted media|youtube premium|requires purchase",
    ),
    (
        BlockingReason::MembersOnly,
        r"members[ -]only|join this channel|available to members",
    ),
    (
        BlockingReason::FormatUnavailable,
        r"requested format is not available|no video formats found|no matching format",
    ),
    (BlockingReason::SabrStreaming, r"\bsabr\b"),
    (BlockingReason::PoTokenRequired, r"\bpo token|proof of origin"),
    (
        BlockingReason::AgeRestricted,
        r"age-restricted|confirm your age|inappropriate for some users",
    ),
    (
        BlockingReason::PrivateVideo,
        r"private video|video is private|granted access",
    ),
    (
        BlockingReason::VideoUnavailable,
        r"video (is )?unavailable|has been removed|no longer available|does not exist|incomplete youtube id",
    ),
    (
        BlockingReason::GeoBlocked,
        r"(not available|blocked) in your country|\bgeo[ -]?restrict",
    ),
    (BlockingReason::RateLimited, r"\b429\b|rate[ -]?limit|too many requests"),
    (
        BlockingReason::BotDetection,
        r"not a bot|captcha|unusual traffic|\bautomated\b",
    ),
    (BlockingReason::Forbidden, r"\b403\b|\bforbidden\b"),
    (
        BlockingReason::NetworkTimeout,
        r"timeout|timed out|connection refused|network unreachable",
    ),
];

lazy_static::lazy_static! {
    static ref MATCHERS: Vec<(BlockingReason, Regex)> = PATTERNS
        .iter()
        .map(|(reason, pattern)| (*reason, Regex::new(pattern).unwrap()))
        .collect();

    // `[youtube] <id>:` prefixes and URLs carry ids and query strings, not reasons
    static ref NOISE_RE: Regex = Regex::new(r"\[[\w:.-]+\]\s*[\w-]*:|https?://\S+").unwrap();
}

impl BlockingReason {
    pub fn into_error(self, detail: String) -> DownloadError {
        match self {
            Self::VideoUnavailable | Self::PrivateVideo => DownloadError::NotFound(detail),
            // The video exists, there is just nothing we can fetch
            Self::FormatUnavailable | Self::DrmProtected => DownloadError::NoMatchingFormat(detail),
            Self::NetworkTimeout | Self::Unknown => DownloadError::Transport(detail),
            Self::Forbidden
            | Self::SabrStreaming
            | Self::PoTokenRequired
            | Self::AgeRestricted
            | Self::GeoBlocked
            | Self::RateLimited
            | Self::BotDetection
            | Self::MembersOnly => DownloadError::Blocked(detail),
        }
    }
}

/// Classify an error message; `None` for blank input
pub fn diagnose_error(message: &str) -> Option<BlockingReason> {
    if message.trim().is_empty() {
        return None;
    }

    let lower = message.to_lowercase();
    let text = NOISE_RE.replace_all(&lower, " ");
    let reason = MATCHERS
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map(|(reason, _)| *reason)
        .unwrap_or(BlockingReason::Unknown);

    Some(reason)
}
