// API error type - maps pipeline errors onto HTTP statuses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::downloader::errors::{DownloadError, ErrorKind};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Download(e) => e.kind(),
            ApiError::BadRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidUrl | ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::TaskNotFound | ErrorKind::ArtifactMissing | ErrorKind::NotFound => {
                StatusCode::NOT_FOUND
            }
            ErrorKind::ArtifactNotReady => StatusCode::CONFLICT,
            ErrorKind::ServiceBusy => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::NoMatchingFormat
            | ErrorKind::Blocked
            | ErrorKind::Transport
            | ErrorKind::AllBackendsFailed => StatusCode::BAD_GATEWAY,
            ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::TranscodeFailed | ErrorKind::Storage | ErrorKind::Cancelled => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let status = match &self {
            ApiError::Download(DownloadError::ArtifactNotReady { status }) => Some(status.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
            status,
        };

        (code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (DownloadError::InvalidUrl("x".to_string()), StatusCode::BAD_REQUEST),
            (DownloadError::TaskNotFound("x".to_string()), StatusCode::NOT_FOUND),
            (DownloadError::ArtifactMissing("x".to_string()), StatusCode::NOT_FOUND),
            (
                DownloadError::ArtifactNotReady { status: "downloading".to_string() },
                StatusCode::CONFLICT,
            ),
            (DownloadError::ServiceBusy, StatusCode::TOO_MANY_REQUESTS),
            (DownloadError::Blocked("bot".to_string()), StatusCode::BAD_GATEWAY),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status_code(), expected);
        }
        assert_eq!(ApiError::bad_request("no body").status_code(), StatusCode::BAD_REQUEST);
    }
}
