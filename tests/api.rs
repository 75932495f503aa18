// HTTP API tests: the router driven in-process with a fake backend and a
// copying transcoder, so neither YouTube nor ffmpeg is needed

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use youtube_downloader_server::downloader::models::{
    MediaKind, NetworkConfig, QualityHint, StreamDescriptor, StreamSource, VideoInfo,
};
use youtube_downloader_server::downloader::{BackendAdapter, DownloadError, Resolver, VideoId};
use youtube_downloader_server::tasks::{DownloadManager, InMemoryTaskRegistry, WorkerConfig};
use youtube_downloader_server::transfer::{
    AudioCodec, DelegatedTransfer, FfmpegTranscoder, HttpTransfer, Transcoder, TransferExecutor,
};
use youtube_downloader_server::{create_router, AppConfig, AppState};

struct FakeBackend {
    media_url: String,
    delay: Duration,
}

#[async_trait]
impl BackendAdapter for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn resolve(
        &self,
        _video_id: &VideoId,
        kind: MediaKind,
        _quality: QualityHint,
    ) -> Result<StreamDescriptor, DownloadError> {
        tokio::time::sleep(self.delay).await;
        Ok(StreamDescriptor {
            source: StreamSource::Direct {
                url: self.media_url.clone(),
                headers: Vec::new(),
            },
            ext: if kind == MediaKind::Audio { "m4a" } else { "mp4" }.to_string(),
            title: "Test Song".to_string(),
            uploader: "Test Artist".to_string(),
            filesize: None,
            backend: "fake".to_string(),
        })
    }

    async fn get_video_info(&self, video_id: &VideoId) -> Result<VideoInfo, DownloadError> {
        Ok(VideoInfo {
            id: video_id.to_string(),
            title: "Test Song".to_string(),
            uploader: "Test Artist".to_string(),
            duration: 212,
            thumbnail: "https://i.ytimg.com/vi/ABC123/hqdefault.jpg".to_string(),
            resolutions: vec!["720p".to_string(), "360p".to_string()],
            audio_bitrate: Some(128),
        })
    }
}

struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        codec: AudioCodec,
        _bitrate_kbps: u32,
        _timeout: Duration,
    ) -> Result<PathBuf, DownloadError> {
        let output = FfmpegTranscoder::output_path(input, codec);
        tokio::fs::copy(input, &output).await?;
        Ok(output)
    }
}

async fn media_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![42u8; 8192]))
        .mount(&server)
        .await;
    server
}

fn app(dir: &Path, media_url: String, delay: Duration) -> Router {
    app_with_origins(dir, media_url, delay, vec!["*".to_string()])
}

fn app_with_origins(dir: &Path, media_url: String, delay: Duration, cors_origins: Vec<String>) -> Router {
    let executor = TransferExecutor::new(
        dir,
        HttpTransfer::with_client(reqwest::Client::new()),
        DelegatedTransfer::new("/nonexistent/yt-dlp", NetworkConfig::default()),
        Arc::new(CopyTranscoder),
        Duration::from_secs(10),
        Duration::from_secs(10),
    );
    let backend = FakeBackend { media_url, delay };
    let manager = DownloadManager::new(
        Arc::new(InMemoryTaskRegistry::new()),
        Arc::new(Resolver::with_backends(vec![Arc::new(backend)])),
        Arc::new(executor),
        WorkerConfig::default(),
    );

    let config = AppConfig {
        download_folder: dir.to_path_buf(),
        ytdlp_path: Some("/nonexistent/yt-dlp".to_string()),
        ffmpeg_path: Some("/nonexistent/ffmpeg".to_string()),
        cors_origins,
        ..AppConfig::default()
    };
    create_router(AppState::new(config, manager))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn wait_for_status(app: &Router, task_id: &str, wanted: &[&str]) -> Value {
    for _ in 0..200 {
        let (status, body) = send_json(app, get(&format!("/api/progress/{}", task_id))).await;
        assert_eq!(status, StatusCode::OK);
        if wanted.iter().any(|w| body["status"] == *w) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("task {} never reached {:?}", task_id, wanted);
}

#[tokio::test]
async fn audio_download_flow_serves_mp3() {
    let server = media_server().await;
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), server.uri(), Duration::ZERO);

    let (status, body) = send_json(
        &app,
        post_json(
            "/api/download",
            json!({
                "url": "https://www.youtube.com/watch?v=ABC123&list=PL1",
                "type": "audio",
                "quality": "192k"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "preparing");
    assert_eq!(body["url"], "https://www.youtube.com/watch?v=ABC123");
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let done = wait_for_status(&app, &task_id, &["completed", "error"]).await;
    assert_eq!(done["status"], "completed", "task failed: {}", done);
    assert_eq!(done["progress"], 100);
    assert_eq!(done["title"], "Test Song");
    assert!(done["filename"].as_str().unwrap().ends_with(".mp3"));

    let (status, headers, bytes) = send(&app, get(&format!("/api/file/{}", task_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment;"));
    assert!(disposition.contains(".mp3"));
    assert_eq!(bytes.len(), 8192);
}

#[tokio::test]
async fn submission_validation_errors() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), "http://127.0.0.1:9/".to_string(), Duration::ZERO);

    let (status, body) = send_json(&app, post_json("/api/download", json!({ "url": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");

    let (status, body) = send_json(&app, post_json("/api/download", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");

    let (status, body) = send_json(
        &app,
        post_json("/api/download", json!({ "url": "https://example.com/watch?v=ABC123" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_url");

    let malformed = Request::builder()
        .method("POST")
        .uri("/api/download")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send_json(&app, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_task_is_not_found_but_pending_task_is_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), "http://127.0.0.1:9/".to_string(), Duration::from_secs(30));

    let (status, body) = send_json(&app, get("/api/file/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "task_not_found");

    let (status, body) = send_json(&app, get("/api/progress/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "task_not_found");

    let (_, body) = send_json(
        &app,
        post_json("/api/download", json!({ "url": "https://youtu.be/ABC123", "type": "video" })),
    )
    .await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let (status, body) = send_json(&app, get(&format!("/api/download/{}", task_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "artifact_not_ready");
    assert_eq!(body["status"], "preparing");

    let cancel = Request::builder()
        .method("DELETE")
        .uri(format!("/api/tasks/{}", task_id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send_json(&app, cancel).await;
    assert_eq!(status, StatusCode::OK);

    let done = wait_for_status(&app, &task_id, &["error"]).await;
    assert_eq!(done["error_kind"], "cancelled");
}

#[tokio::test]
async fn swept_file_is_reported_missing() {
    let server = media_server().await;
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), server.uri(), Duration::ZERO);

    let (_, body) = send_json(
        &app,
        post_json(
            "/api/download",
            json!({ "url": "https://www.youtube.com/watch?v=ABC123", "type": "video", "quality": "720p" }),
        ),
    )
    .await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let done = wait_for_status(&app, &task_id, &["completed", "error"]).await;
    assert_eq!(done["status"], "completed", "task failed: {}", done);
    let filename = done["filename"].as_str().unwrap();
    assert!(filename.ends_with(".mp4"));

    std::fs::remove_file(dir.path().join(filename)).unwrap();

    let (status, body) = send_json(&app, get(&format!("/api/download/{}", task_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "artifact_missing");
}

#[tokio::test]
async fn info_and_health_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), "http://127.0.0.1:9/".to_string(), Duration::ZERO);

    let (status, body) = send_json(
        &app,
        post_json("/api/info", json!({ "url": "https://youtu.be/ABC123?si=tracking" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "ABC123");
    assert_eq!(body["resolutions"], json!(["720p", "360p"]));

    let (status, body) = send_json(&app, post_json("/api/info", json!({ "url": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");

    let (status, body) = send_json(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["ffmpeg"], false);
    assert_eq!(body["backends"], json!(["fake"]));

    let (status, body) = send_json(&app, get("/api/tasks")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tasks"], json!([]));
}

#[tokio::test]
async fn cors_allows_only_configured_origins() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with_origins(
        dir.path(),
        "http://127.0.0.1:9/".to_string(),
        Duration::ZERO,
        vec!["https://app.example".to_string()],
    );

    let from = |origin: &str| {
        Request::builder()
            .uri("/api/tasks")
            .header(header::ORIGIN, origin)
            .body(Body::empty())
            .unwrap()
    };

    let (status, headers, _) = send(&app, from("https://app.example")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example");

    let (_, headers, _) = send(&app, from("https://elsewhere.example")).await;
    assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}
