// Invidious backend - public mirror API adapter
//
// GET {instance}/api/v1/videos/{id} returns metadata plus direct stream URLs:
// `formatStreams` are progressive (muxed) streams, `adaptiveFormats` are
// split audio/video. Each configured instance is its own adapter so the
// resolver can fall back from one mirror to the next.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::downloader::errors::DownloadError;
use crate::downloader::format_selector::FormatSelector;
use crate::downloader::models::{
    MediaKind, NetworkConfig, QualityHint, StreamDescriptor, StreamFormat, StreamSource, VideoInfo,
};
use crate::downloader::traits::BackendAdapter;
use crate::downloader::utils::build_http_client;
use crate::downloader::youtube_url::VideoId;

/// Mirrors tried when none are configured
pub const DEFAULT_INSTANCES: &[&str] = &[
    "https://inv.nadeko.net",
    "https://invidious.nerdvpn.de",
    "https://yewtu.be",
];

#[derive(Debug, Clone)]
struct InvidiousVideo {
    title: String,
    author: String,
    length_seconds: u64,
    thumbnail: String,
    formats: Vec<StreamFormat>,
}

pub struct InvidiousBackend {
    name: String,
    instance: String,
    client: reqwest::Client,
}

impl InvidiousBackend {
    pub fn new(instance: &str, network: &NetworkConfig) -> Result<Self, DownloadError> {
        let instance = instance.trim().trim_end_matches('/').to_string();
        let host = url::Url::parse(&instance)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| {
                DownloadError::InvalidRequest(format!("invalid Invidious instance URL: {}", instance))
            })?;

        let client = build_http_client(
            network.proxy.as_deref(),
            network.metadata_timeout,
            Some(network.metadata_timeout),
        )?;

        Ok(Self {
            name: format!("invidious:{}", host),
            instance,
            client,
        })
    }

    async fn fetch_video(&self, video_id: &VideoId) -> Result<InvidiousVideo, DownloadError> {
        let endpoint = format!("{}/api/v1/videos/{}", self.instance, video_id);
        debug!(backend = %self.name, %endpoint, "Requesting video metadata");

        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(DownloadError::from_reqwest)?;

        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) if status.is_success() => {
                return Err(DownloadError::Transport(format!(
                    "{} returned an unreadable body: {}",
                    self.name, e
                )))
            }
            Err(_) => Value::Null,
        };

        // Instances report extractor failures as {"error": "..."}, often with a 500.
        // Only that text can say the video itself is gone.
        if let Some(message) = body["error"].as_str() {
            return Err(DownloadError::classify(message));
        }

        if !status.is_success() {
            return Err(match status.as_u16() {
                // Disabled API or a proxy page in front of the instance
                404 | 410 => DownloadError::Transport(format!(
                    "{} answered HTTP {} without an error body",
                    self.name,
                    status.as_u16()
                )),
                code => DownloadError::from_status(code, &endpoint),
            });
        }

        Ok(Self::parse_video(&body, video_id))
    }

    fn parse_video(body: &Value, video_id: &VideoId) -> InvidiousVideo {
        let mut formats = Vec::new();

        if let Some(streams) = body["formatStreams"].as_array() {
            formats.extend(streams.iter().filter_map(Self::parse_progressive));
        }
        if let Some(streams) = body["adaptiveFormats"].as_array() {
            formats.extend(streams.iter().filter_map(Self::parse_adaptive_audio));
        }

        let thumbnail = body["videoThumbnails"]
            .as_array()
            .and_then(|thumbs| thumbs.first())
            .and_then(|t| t["url"].as_str())
            .unwrap_or("")
            .to_string();

        InvidiousVideo {
            title: body["title"]
                .as_str()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(video_id.as_str())
                .to_string(),
            author: body["author"].as_str().unwrap_or("Unknown").to_string(),
            length_seconds: body["lengthSeconds"].as_u64().unwrap_or(0),
            thumbnail,
            formats,
        }
    }

    fn parse_progressive(stream: &Value) -> Option<StreamFormat> {
        let url = stream["url"].as_str()?.to_string();
        let height = stream["resolution"]
            .as_str()
            .or_else(|| stream["qualityLabel"].as_str())
            .and_then(parse_height);

        Some(StreamFormat {
            format_id: number_or_string(&stream["itag"]).map(|i| i.to_string()).unwrap_or_default(),
            url: Some(url),
            ext: stream["container"]
                .as_str()
                .map(|c| c.to_string())
                .unwrap_or_else(|| ext_from_mime(stream["type"].as_str().unwrap_or(""))),
            height,
            audio_bitrate: None,
            has_video: true,
            has_audio: true,
            filesize: number_or_string(&stream["clen"]),
        })
    }

    fn parse_adaptive_audio(stream: &Value) -> Option<StreamFormat> {
        let mime = stream["type"].as_str()?;
        if !mime.starts_with("audio/") {
            return None;
        }

        Some(StreamFormat {
            format_id: number_or_string(&stream["itag"]).map(|i| i.to_string()).unwrap_or_default(),
            url: Some(stream["url"].as_str()?.to_string()),
            ext: stream["container"]
                .as_str()
                .map(|c| c.to_string())
                .unwrap_or_else(|| ext_from_mime(mime)),
            height: None,
            // bits per second -> kbps
            audio_bitrate: number_or_string(&stream["bitrate"]).map(|b| (b / 1000) as u32),
            has_video: false,
            has_audio: true,
            filesize: number_or_string(&stream["clen"]),
        })
    }
}

#[async_trait]
impl BackendAdapter for InvidiousBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(
        &self,
        video_id: &VideoId,
        kind: MediaKind,
        quality: QualityHint,
    ) -> Result<StreamDescriptor, DownloadError> {
        let video = self.fetch_video(video_id).await?;
        let format = FormatSelector::select(&video.formats, kind, quality)?;

        StreamDescriptor {
            source: StreamSource::Direct {
                url: format.url.clone().unwrap_or_default(),
                headers: Vec::new(),
            },
            ext: format.ext.clone(),
            title: video.title.clone(),
            uploader: video.author.clone(),
            filesize: format.filesize,
            backend: self.name.clone(),
        }
        .validate()
    }

    async fn get_video_info(&self, video_id: &VideoId) -> Result<VideoInfo, DownloadError> {
        let video = self.fetch_video(video_id).await?;

        Ok(VideoInfo {
            id: video_id.to_string(),
            resolutions: FormatSelector::resolutions(&video.formats),
            audio_bitrate: FormatSelector::best_audio_bitrate(&video.formats),
            title: video.title,
            uploader: video.author,
            duration: video.length_seconds,
            thumbnail: video.thumbnail,
        })
    }
}

// "720p" / "720p60" -> 720
fn parse_height(label: &str) -> Option<u32> {
    let digits: String = label.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok().filter(|h| *h > 0)
}

// Invidious serializes numbers as strings in some fields and versions
fn number_or_string(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn ext_from_mime(mime: &str) -> String {
    let essence = mime.split(';').next().unwrap_or("").trim();
    match essence {
        "audio/mp4" => "m4a",
        "audio/webm" | "video/webm" => "webm",
        "video/mp4" => "mp4",
        "video/3gpp" => "3gp",
        _ => "",
    }
    .to_string()
}
