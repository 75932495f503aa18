// yt-dlp backend - extractor-library adapter
//
// Runs `yt-dlp --dump-json` once per player client (ios, android, web, ...)
// until one returns a usable format list. The resolved stream is handed back
// as a delegated source so the actual download runs through yt-dlp with the
// same client that resolved it.

use async_trait::async_trait;
use tracing::debug;

use crate::downloader::clients::{ClientIdentity, ClientRotation};
use crate::downloader::errors::DownloadError;
use crate::downloader::format_selector::FormatSelector;
use crate::downloader::models::{
    MediaKind, NetworkConfig, QualityHint, StreamDescriptor, StreamFormat, StreamSource, VideoInfo,
};
use crate::downloader::traits::BackendAdapter;
use crate::downloader::utils::run_output_with_timeout;
use crate::downloader::youtube_url::VideoId;

/// Parsed `--dump-json` output
#[derive(Debug, Clone)]
pub struct ExtractedVideo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration_seconds: u64,
    pub thumbnail: String,
    pub formats: Vec<StreamFormat>,
}

pub struct YtDlpBackend {
    ytdlp_path: String,
    clients: ClientRotation,
    network: NetworkConfig,
}

impl YtDlpBackend {
    pub fn new(ytdlp_path: impl Into<String>, clients: ClientRotation, network: NetworkConfig) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            clients,
            network,
        }
    }

    /// Build command arguments for one client identity
    pub fn build_args(&self, url: &str, identity: &ClientIdentity) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.network.metadata_timeout.as_secs().max(1).to_string(),
            "--retries".to_string(),
            "0".to_string(),
            "--user-agent".to_string(),
            identity.user_agent.clone(),
            "--extractor-args".to_string(),
            format!("youtube:player_client={}", identity.name),
        ];

        for (key, value) in &identity.headers {
            args.push("--add-headers".to_string());
            args.push(format!("{}:{}", key, value));
        }

        if let Some(path) = &self.network.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.clone());
        }

        if let Some(proxy) = &self.network.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(url.to_string());
        args
    }

    // yt-dlp makes several requests per extraction, so the process gets
    // more time than a single socket operation
    fn process_timeout_secs(&self) -> u64 {
        self.network.metadata_timeout.as_secs().max(1) * 4
    }

    async fn dump_json(
        &self,
        url: &str,
        identity: &ClientIdentity,
    ) -> Result<ExtractedVideo, DownloadError> {
        let args = self.build_args(url, identity);
        debug!(client = %identity.name, "Running: {} {}", self.ytdlp_path, args.join(" "));

        let output = run_output_with_timeout(&self.ytdlp_path, args, self.process_timeout_secs())
            .await
            .map_err(|e| DownloadError::Transport(format!("yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DownloadError::classify(&stderr));
        }

        Self::parse_json(&output.stdout)
    }

    /// Parse JSON output into ExtractedVideo
    pub fn parse_json(stdout: &[u8]) -> Result<ExtractedVideo, DownloadError> {
        let json: serde_json::Value = serde_json::from_slice(stdout)
            .map_err(|e| DownloadError::Transport(format!("yt-dlp returned invalid JSON: {}", e)))?;

        let id = json["id"].as_str().unwrap_or_default().to_string();
        let title = json["title"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&id)
            .to_string();

        Ok(ExtractedVideo {
            title,
            uploader: json["uploader"]
                .as_str()
                .or_else(|| json["channel"].as_str())
                .unwrap_or("Unknown")
                .to_string(),
            duration_seconds: json["duration"].as_f64().unwrap_or(0.0) as u64,
            thumbnail: json["thumbnail"].as_str().unwrap_or("").to_string(),
            formats: Self::parse_formats(&json),
            id,
        })
    }

    fn parse_formats(json: &serde_json::Value) -> Vec<StreamFormat> {
        let Some(formats_array) = json["formats"].as_array() else {
            return Vec::new();
        };

        formats_array
            .iter()
            .filter_map(|f| {
                let format_id = f["format_id"].as_str()?.to_string();
                let has_codec = |key: &str| f[key].as_str().is_some_and(|c| c != "none" && !c.is_empty());

                Some(StreamFormat {
                    format_id,
                    url: f["url"].as_str().map(|s| s.to_string()),
                    ext: f["ext"].as_str().unwrap_or("").to_string(),
                    height: f["height"].as_u64().map(|h| h as u32),
                    audio_bitrate: f["abr"].as_f64().map(|a| a.round() as u32),
                    has_video: has_codec("vcodec"),
                    has_audio: has_codec("acodec"),
                    filesize: f["filesize"].as_u64().or_else(|| f["filesize_approx"].as_u64()),
                })
            })
            .collect()
    }
}

#[async_trait]
impl BackendAdapter for YtDlpBackend {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn resolve(
        &self,
        video_id: &VideoId,
        kind: MediaKind,
        quality: QualityHint,
    ) -> Result<StreamDescriptor, DownloadError> {
        let url = video_id.canonical_url();

        // Format selection happens per client: another client may expose
        // the progressive stream this one hides
        let ((video, format), identity) = self
            .clients
            .run(self.name(), |identity| {
                let url = url.clone();
                async move {
                    let video = self.dump_json(&url, &identity).await?;
                    let format = FormatSelector::select(&video.formats, kind, quality)?.clone();
                    Ok((video, format))
                }
            })
            .await?;

        StreamDescriptor {
            source: StreamSource::Delegated {
                format_id: format.format_id.clone(),
                player_client: identity.name,
                page_url: url,
            },
            ext: format.ext.clone(),
            title: video.title,
            uploader: video.uploader,
            filesize: format.filesize,
            backend: self.name().to_string(),
        }
        .validate()
    }

    async fn get_video_info(&self, video_id: &VideoId) -> Result<VideoInfo, DownloadError> {
        let url = video_id.canonical_url();
        let (video, _) = self
            .clients
            .run(self.name(), |identity| {
                let url = url.clone();
                async move { self.dump_json(&url, &identity).await }
            })
            .await?;

        Ok(VideoInfo {
            id: if video.id.is_empty() { video_id.to_string() } else { video.id },
            resolutions: FormatSelector::resolutions(&video.formats),
            audio_bitrate: FormatSelector::best_audio_bitrate(&video.formats),
            title: video.title,
            uploader: video.uploader,
            duration: video.duration_seconds,
            thumbnail: video.thumbnail,
        })
    }
}
