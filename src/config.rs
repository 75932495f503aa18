// Service configuration, read from the environment (and `.env` via dotenvy)

use std::path::PathBuf;
use std::time::Duration;

use crate::downloader::backends::DEFAULT_INSTANCES;
use crate::downloader::models::{MediaKind, NetworkConfig, QualityHint};
use crate::tasks::worker::WorkerConfig;

const DEFAULT_BITRATE_KBPS: u32 = 192;

/// Resolution backends that can be listed in `BACKENDS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Invidious,
    YtDlp,
}

impl BackendKind {
    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "invidious" => Some(Self::Invidious),
            "ytdlp" | "yt-dlp" | "yt_dlp" => Some(Self::YtDlp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub download_folder: PathBuf,
    pub max_concurrent_downloads: usize,
    pub max_queued_downloads: usize,
    pub task_timeout: Duration,
    pub ffmpeg_timeout: Duration,
    /// kbps, from `MP3_DEFAULT_BITRATE` ("192k")
    pub default_bitrate_kbps: u32,
    pub file_ttl: Duration,
    pub task_ttl: Duration,
    pub cleanup_interval: Duration,
    pub backends: Vec<BackendKind>,
    pub invidious_instances: Vec<String>,
    pub player_clients: Vec<String>,
    pub ytdlp_path: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub cookies_file: Option<String>,
    pub proxy: Option<String>,
    pub metadata_timeout: Duration,
    pub transfer_timeout: Duration,
    pub cors_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str, default: u64| -> u64 {
            get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let list = |key: &str| -> Option<Vec<String>> {
            get(key).map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
        };

        let default_bitrate_kbps = get("MP3_DEFAULT_BITRATE")
            .and_then(|v| QualityHint::parse(MediaKind::Audio, &v).ok())
            .and_then(|hint| match hint {
                QualityHint::Bitrate(kbps) => Some(kbps),
                _ => None,
            })
            .unwrap_or(DEFAULT_BITRATE_KBPS);

        let backends: Vec<BackendKind> = list("BACKENDS")
            .map(|names| names.iter().filter_map(|n| BackendKind::parse(n)).collect())
            .filter(|b: &Vec<BackendKind>| !b.is_empty())
            .unwrap_or_else(|| vec![BackendKind::Invidious, BackendKind::YtDlp]);

        Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: get("PORT").and_then(|v| v.parse().ok()).unwrap_or(5000),
            download_folder: PathBuf::from(get("DOWNLOAD_FOLDER").unwrap_or_else(|| "./downloads".to_string())),
            max_concurrent_downloads: number("MAX_CONCURRENT_DOWNLOADS", 3).max(1) as usize,
            max_queued_downloads: number("MAX_QUEUED_DOWNLOADS", 16) as usize,
            task_timeout: Duration::from_secs(number("TASK_TIMEOUT", 600)),
            ffmpeg_timeout: Duration::from_secs(number("FFMPEG_TIMEOUT", 300)),
            default_bitrate_kbps,
            file_ttl: Duration::from_secs(number("FILE_CLEANUP_HOURS", 1) * 3600),
            task_ttl: Duration::from_secs(number("TASK_RETENTION_HOURS", 24) * 3600),
            cleanup_interval: Duration::from_secs(number("CLEANUP_INTERVAL_SECONDS", 3600).max(1)),
            backends,
            invidious_instances: list("INVIDIOUS_INSTANCES")
                .unwrap_or_else(|| DEFAULT_INSTANCES.iter().map(|s| s.to_string()).collect()),
            player_clients: list("PLAYER_CLIENTS")
                .unwrap_or_else(|| vec!["ios".to_string(), "android".to_string(), "web".to_string()]),
            ytdlp_path: get("YTDLP_PATH"),
            ffmpeg_path: get("FFMPEG_PATH"),
            cookies_file: get("YTDL_COOKIES_FILE"),
            proxy: get("PROXY"),
            metadata_timeout: Duration::from_secs(number("METADATA_TIMEOUT", 15).max(1)),
            transfer_timeout: Duration::from_secs(number("TRANSFER_TIMEOUT", 600).max(1)),
            cors_origins: list("CORS_ORIGINS").unwrap_or_else(|| vec!["*".to_string()]),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            proxy: self.proxy.clone(),
            metadata_timeout: self.metadata_timeout,
            transfer_timeout: self.transfer_timeout,
            cookies_path: self.cookies_file.clone(),
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            max_concurrent: self.max_concurrent_downloads,
            max_queued: self.max_queued_downloads,
            task_timeout: self.task_timeout,
            default_bitrate_kbps: self.default_bitrate_kbps,
        }
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}
