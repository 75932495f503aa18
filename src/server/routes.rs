// API routes

use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::handlers::{
    cancel_task, get_artifact, get_progress, get_video_info, health, list_tasks, submit_download,
};
use super::state::AppState;
use crate::config::AppConfig;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/download", post(submit_download))
        .route("/download/:task_id", get(get_artifact))
        .route("/file/:task_id", get(get_artifact))
        .route("/progress/:task_id", get(get_progress))
        .route("/info", post(get_video_info))
        .route("/tasks", get(list_tasks))
        .route("/tasks/:task_id", delete(cancel_task));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
        .expose_headers([header::CONTENT_LENGTH, header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    if config.allows_any_origin() {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    base.allow_origin(allowed)
}
