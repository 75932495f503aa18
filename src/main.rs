// HTTP server binary

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use youtube_downloader_server::{create_router, AppConfig, AppState, RetentionSweeper};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("youtube_downloader_server=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting youtube-downloader-server v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env();
    info!(
        host = %config.host,
        port = config.port,
        download_folder = %config.download_folder.display(),
        max_concurrent = config.max_concurrent_downloads,
        "Loaded configuration"
    );

    if let Err(e) = tokio::fs::create_dir_all(&config.download_folder).await {
        error!("Failed to create download folder: {}", e);
        std::process::exit(1);
    }

    let state = match AppState::from_config(config.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create application state: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let sweeper = RetentionSweeper::new(
        &config.download_folder,
        std::sync::Arc::clone(state.registry()),
        config.file_ttl,
        config.task_ttl,
        config.cleanup_interval,
    );
    let sweeper_shutdown = shutdown.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweeper_shutdown).await;
    });

    let app = create_router(state);

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    shutdown.cancel();
    let _ = sweeper_handle.await;
    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Received shutdown signal");
}
