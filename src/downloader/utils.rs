// Helper functions shared by backends, transfers and the HTTP layer

use std::process::Stdio;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration};

use super::errors::DownloadError;

const MAX_FILENAME_LENGTH: usize = 200;

/// Run a command to completion, capturing stdout and stderr.
/// On timeout the pending output future is dropped, which kills the child.
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, String> {
    let child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to start {}: {}", program, e))?;

    match timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await {
        Ok(output) => output.map_err(|e| format!("Failed to wait for {}: {}", program, e)),
        Err(_) => Err(format!("Timed out after {}s", timeout_secs)),
    }
}

/// HTTP client honoring the configured proxy.
/// `request_timeout` bounds a whole request; `None` leaves streaming bodies unbounded.
pub fn build_http_client(
    proxy: Option<&str>,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
) -> Result<reqwest::Client, DownloadError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("youtube-downloader-server/", env!("CARGO_PKG_VERSION")));

    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = proxy.filter(|p| !p.trim().is_empty()) {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| DownloadError::InvalidRequest(format!("invalid proxy URL {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| DownloadError::Transport(format!("failed to build HTTP client: {}", e)))
}

/// Locate a binary: explicit override, common install paths, then `PATH`
pub fn find_executable(name: &str, override_path: Option<&str>) -> String {
    if let Some(custom) = override_path.filter(|p| !p.trim().is_empty()) {
        return custom.to_string();
    }

    let common_paths = [
        format!("/opt/homebrew/bin/{}", name),
        format!("/usr/local/bin/{}", name),
        format!("/usr/bin/{}", name),
    ];

    for path in common_paths {
        if std::path::Path::new(&path).exists() {
            return path;
        }
    }

    name.to_string()
}

/// Check that a tool starts and reports a version
pub async fn tool_available(program: &str, version_arg: &str) -> bool {
    match run_output_with_timeout(program, vec![version_arg.to_string()], 5).await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// Replace characters that are unsafe in file names and cap the length
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim().trim_matches('.').trim();
    let capped: String = trimmed.chars().take(MAX_FILENAME_LENGTH).collect();

    if capped.is_empty() {
        "download".to_string()
    } else {
        capped
    }
}

/// Human-readable byte count
pub fn format_size(bytes: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < units.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, units[unit])
}

/// `MM:SS` or `HH:MM:SS`
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}
