// Application state - shared handles and service wiring from configuration

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AppConfig, BackendKind};
use crate::downloader::backends::{InvidiousBackend, YtDlpBackend};
use crate::downloader::clients::ClientRotation;
use crate::downloader::errors::DownloadError;
use crate::downloader::orchestrator::Resolver;
use crate::downloader::utils::find_executable;
use crate::tasks::registry::{InMemoryTaskRegistry, TaskRegistry};
use crate::tasks::worker::DownloadManager;
use crate::transfer::{DelegatedTransfer, FfmpegTranscoder, HttpTransfer, TransferExecutor};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub manager: DownloadManager,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
}

impl AppState {
    pub fn new(config: AppConfig, manager: DownloadManager) -> Self {
        let ytdlp_path = find_executable("yt-dlp", config.ytdlp_path.as_deref());
        let ffmpeg_path = find_executable("ffmpeg", config.ffmpeg_path.as_deref());
        Self {
            config: Arc::new(config),
            manager,
            ytdlp_path,
            ffmpeg_path,
        }
    }

    /// Build the whole pipeline from configuration
    pub fn from_config(config: AppConfig) -> Result<Self, DownloadError> {
        let manager = build_manager(&config, Arc::new(InMemoryTaskRegistry::new()))?;
        Ok(Self::new(config, manager))
    }

    pub fn registry(&self) -> &Arc<dyn TaskRegistry> {
        self.manager.registry()
    }
}

/// Backends in configured order; Invidious expands to one adapter per instance
pub fn build_resolver(config: &AppConfig) -> Resolver {
    let network = config.network();
    let mut resolver = Resolver::new();

    for kind in &config.backends {
        match kind {
            BackendKind::Invidious => {
                for instance in &config.invidious_instances {
                    match InvidiousBackend::new(instance, &network) {
                        Ok(backend) => resolver.add_backend(Arc::new(backend)),
                        Err(e) => warn!(instance = %instance, error = %e, "Skipping Invidious instance"),
                    }
                }
            }
            BackendKind::YtDlp => {
                let path = find_executable("yt-dlp", config.ytdlp_path.as_deref());
                let clients = ClientRotation::from_names(&config.player_clients);
                resolver.add_backend(Arc::new(YtDlpBackend::new(path, clients, network.clone())));
            }
        }
    }

    info!(backends = ?resolver.backend_names(), "Resolution backends configured");
    resolver
}

pub fn build_manager(
    config: &AppConfig,
    registry: Arc<dyn TaskRegistry>,
) -> Result<DownloadManager, DownloadError> {
    let network = config.network();
    let ytdlp_path = find_executable("yt-dlp", config.ytdlp_path.as_deref());
    let ffmpeg_path = find_executable("ffmpeg", config.ffmpeg_path.as_deref());

    let executor = TransferExecutor::new(
        &config.download_folder,
        HttpTransfer::new(&network)?,
        DelegatedTransfer::new(ytdlp_path, network.clone()),
        Arc::new(FfmpegTranscoder::new(ffmpeg_path)),
        config.transfer_timeout,
        config.ffmpeg_timeout,
    );

    Ok(DownloadManager::new(
        registry,
        Arc::new(build_resolver(config)),
        Arc::new(executor),
        config.worker(),
    ))
}
