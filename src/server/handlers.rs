// HTTP handlers

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_util::io::ReaderStream;
use tracing::info;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::VideoInfo;
use crate::downloader::utils::tool_available;
use crate::downloader::youtube_url::normalize;
use crate::tasks::model::{TaskStatus, TaskView};
use crate::tasks::worker::SubmitRequest;

#[derive(Serialize)]
pub struct SubmitResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub url: String,
    pub message: String,
}

/// POST /api/download
pub async fn submit_download(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let task = state.manager.submit(request)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id: task.id,
            status: task.status,
            url: task.source_url,
            message: "Download started".to_string(),
        }),
    ))
}

/// GET /api/progress/:task_id
pub async fn get_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskView>> {
    let task = state
        .registry()
        .get(&task_id)
        .ok_or(DownloadError::TaskNotFound(task_id))?;
    Ok(Json(task.view()))
}

#[derive(Serialize)]
pub struct TaskList {
    pub tasks: Vec<TaskView>,
    pub in_flight: usize,
}

/// GET /api/tasks
pub async fn list_tasks(State(state): State<AppState>) -> Json<TaskList> {
    let tasks = state.registry().list().iter().map(|t| t.view()).collect();
    Json(TaskList {
        tasks,
        in_flight: state.manager.in_flight(),
    })
}

/// DELETE /api/tasks/:task_id
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskView>> {
    let task = state.manager.cancel(&task_id)?;
    Ok(Json(task.view()))
}

/// GET /api/download/:task_id and /api/file/:task_id
pub async fn get_artifact(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Response> {
    let task = state
        .registry()
        .get(&task_id)
        .ok_or_else(|| DownloadError::TaskNotFound(task_id.clone()))?;

    if task.status != TaskStatus::Completed {
        return Err(DownloadError::ArtifactNotReady {
            status: task.status.to_string(),
        }
        .into());
    }

    let filename = task
        .output_filename
        .ok_or_else(|| DownloadError::ArtifactMissing(task_id.clone()))?;
    let path = state.manager.executor().artifact_path(&filename)?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DownloadError::ArtifactMissing(filename).into());
        }
        Err(e) => return Err(DownloadError::from(e).into()),
    };
    let length = file.metadata().await.map_err(DownloadError::from)?.len();

    info!(task_id = %task_id, file = %filename, bytes = length, "Serving file");

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(&filename)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    #[serde(default)]
    pub url: String,
}

/// POST /api/info
pub async fn get_video_info(
    State(state): State<AppState>,
    body: Result<Json<InfoRequest>, JsonRejection>,
) -> ApiResult<Json<VideoInfo>> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if request.url.trim().is_empty() {
        return Err(ApiError::bad_request("url is required"));
    }

    let video_id = normalize(&request.url)?;
    let info = state.manager.resolver().video_info(&video_id).await?;
    Ok(Json(info))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub ffmpeg: bool,
    pub ytdlp: bool,
    pub backends: Vec<String>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (ffmpeg, ytdlp) = tokio::join!(
        tool_available(&state.ffmpeg_path, "-version"),
        tool_available(&state.ytdlp_path, "--version"),
    );

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        ffmpeg,
        ytdlp,
        backends: state.manager.resolver().backend_names(),
    })
}

fn content_type(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or_default().to_lowercase();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "webm" => "video/webm",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

// ASCII fallback plus an RFC 5987 encoded name for non-ASCII titles
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' { c } else { '_' })
        .collect();

    let mut encoded = String::with_capacity(filename.len());
    for byte in filename.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", fallback, encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type("a_b.mp3"), "audio/mpeg");
        assert_eq!(content_type("a_b.MP4"), "video/mp4");
        assert_eq!(content_type("noext"), "application/octet-stream");
    }

    #[test]
    fn test_content_disposition_non_ascii() {
        let value = content_disposition("id_Café.mp3");
        assert!(value.starts_with("attachment; filename=\"id_Caf_.mp3\""));
        assert!(value.ends_with("filename*=UTF-8''id_Caf%C3%A9.mp3"));
        assert!(HeaderValue::from_str(&value).is_ok());
    }
}
