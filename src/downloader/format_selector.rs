// FormatSelector - picks one stream out of a backend's format list
//
// Rules:
// - Video "best": highest-resolution progressive (pre-muxed) stream
// - Video "<N>p": highest progressive stream with height <= N; when every
//   stream is taller than N, the lowest one above N
// - Audio: highest-bitrate audio-only stream, whatever the hint says
//   (the hint only drives the MP3 transcode bitrate)

use super::errors::DownloadError;
use super::models::{MediaKind, QualityHint, StreamFormat};

pub struct FormatSelector;

impl FormatSelector {
    pub fn select<'a>(
        formats: &'a [StreamFormat],
        kind: MediaKind,
        hint: QualityHint,
    ) -> Result<&'a StreamFormat, DownloadError> {
        match kind {
            MediaKind::Video => Self::select_video(formats, hint),
            MediaKind::Audio => Self::select_audio(formats),
        }
    }

    fn select_video(
        formats: &[StreamFormat],
        hint: QualityHint,
    ) -> Result<&StreamFormat, DownloadError> {
        let progressive: Vec<&StreamFormat> = formats
            .iter()
            .filter(|f| f.is_progressive() && f.height.is_some())
            .collect();

        if progressive.is_empty() {
            return Err(DownloadError::NoMatchingFormat(
                "no progressive video stream available".to_string(),
            ));
        }

        let chosen = match hint {
            QualityHint::Height(target) => Self::best_at_or_below(&progressive, target)
                .or_else(|| Self::lowest_above(&progressive, target)),
            QualityHint::Best | QualityHint::Bitrate(_) => Self::highest(&progressive),
        };

        chosen.ok_or_else(|| {
            DownloadError::NoMatchingFormat(format!("no video stream for {}", hint))
        })
    }

    fn select_audio(formats: &[StreamFormat]) -> Result<&StreamFormat, DownloadError> {
        formats
            .iter()
            .filter(|f| f.is_audio_only())
            .max_by_key(|f| (f.audio_bitrate.unwrap_or(0), Self::prefers_mp4(f), f.filesize.unwrap_or(0)))
            .ok_or_else(|| {
                DownloadError::NoMatchingFormat("no audio-only stream available".to_string())
            })
    }

    fn highest<'a>(formats: &[&'a StreamFormat]) -> Option<&'a StreamFormat> {
        formats
            .iter()
            .max_by_key(|f| Self::video_rank(f))
            .copied()
    }

    fn best_at_or_below<'a>(formats: &[&'a StreamFormat], target: u32) -> Option<&'a StreamFormat> {
        formats
            .iter()
            .filter(|f| f.height.is_some_and(|h| h <= target))
            .max_by_key(|f| Self::video_rank(f))
            .copied()
    }

    fn lowest_above<'a>(formats: &[&'a StreamFormat], target: u32) -> Option<&'a StreamFormat> {
        formats
            .iter()
            .filter(|f| f.height.is_some_and(|h| h > target))
            .min_by_key(|f| (f.height.unwrap_or(u32::MAX), !Self::prefers_mp4(f)))
            .copied()
    }

    // Height first, then mp4 (widest player support), then size as a bitrate proxy
    fn video_rank(format: &StreamFormat) -> (u32, bool, u64) {
        (
            format.height.unwrap_or(0),
            Self::prefers_mp4(format),
            format.filesize.unwrap_or(0),
        )
    }

    fn prefers_mp4(format: &StreamFormat) -> bool {
        matches!(format.ext.as_str(), "mp4" | "m4a")
    }

    /// Distinct progressive resolutions, highest first
    pub fn resolutions(formats: &[StreamFormat]) -> Vec<String> {
        let mut heights: Vec<u32> = formats
            .iter()
            .filter(|f| f.is_progressive())
            .filter_map(|f| f.height)
            .collect();
        heights.sort_unstable_by(|a, b| b.cmp(a));
        heights.dedup();
        heights.into_iter().map(|h| format!("{}p", h)).collect()
    }

    pub fn best_audio_bitrate(formats: &[StreamFormat]) -> Option<u32> {
        formats
            .iter()
            .filter(|f| f.is_audio_only())
            .filter_map(|f| f.audio_bitrate)
            .max()
    }
}
