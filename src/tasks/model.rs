// Task record and its state machine
//
// preparing -> downloading -> processing -> completed
//      \______________\______________\____> error
//
// `completed` and `error` are terminal: every later event is a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::downloader::errors::{DownloadError, ErrorKind};
use crate::downloader::models::{MediaKind, ProgressEvent, QualityHint};
use crate::downloader::youtube_url::VideoId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Preparing,
    Downloading,
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to a task; the worker is the only producer
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Resolved {
        title: String,
        uploader: String,
        backend: String,
    },
    Progress(ProgressEvent),
    /// Transfer done, transcode running
    Processing,
    Completed {
        filename: String,
    },
    Failed(DownloadError),
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    /// Canonical `watch?v=` URL
    pub source_url: String,
    pub video_id: String,
    pub kind: MediaKind,
    pub quality: QualityHint,
    pub status: TaskStatus,
    pub progress_percent: u8,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub title: String,
    pub uploader: String,
    pub backend: Option<String>,
    pub output_filename: Option<String>,
    pub error_detail: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Task {
    pub fn new(id: impl Into<String>, video_id: &VideoId, kind: MediaKind, quality: QualityHint) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            source_url: video_id.canonical_url(),
            video_id: video_id.to_string(),
            kind,
            quality,
            status: TaskStatus::Preparing,
            progress_percent: 0,
            speed: None,
            eta: None,
            title: String::new(),
            uploader: String::new(),
            backend: None,
            output_filename: None,
            error_detail: None,
            error_kind: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an event; returns false when it was ignored
    pub fn apply(&mut self, event: TaskEvent) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        let changed = match event {
            TaskEvent::Resolved { title, uploader, backend } => {
                if self.status != TaskStatus::Preparing {
                    return false;
                }
                self.status = TaskStatus::Downloading;
                self.title = title;
                self.uploader = uploader;
                self.backend = Some(backend);
                true
            }
            TaskEvent::Progress(progress) => {
                if self.status != TaskStatus::Downloading {
                    return false;
                }
                self.apply_progress(progress);
                true
            }
            TaskEvent::Processing => {
                if self.status != TaskStatus::Downloading {
                    return false;
                }
                self.status = TaskStatus::Processing;
                self.progress_percent = 100;
                self.clear_telemetry();
                true
            }
            TaskEvent::Completed { filename } => {
                if !matches!(self.status, TaskStatus::Downloading | TaskStatus::Processing) {
                    return false;
                }
                self.status = TaskStatus::Completed;
                self.progress_percent = 100;
                self.output_filename = Some(filename);
                self.clear_telemetry();
                true
            }
            TaskEvent::Failed(error) => {
                self.status = TaskStatus::Error;
                self.error_kind = Some(error.kind());
                self.error_detail = Some(error.to_string());
                self.clear_telemetry();
                true
            }
        };

        if changed {
            self.updated_at = OffsetDateTime::now_utc();
        }
        changed
    }

    fn apply_progress(&mut self, progress: ProgressEvent) {
        let (percent, speed, eta) = match progress {
            ProgressEvent::Bytes { downloaded, total, speed, eta } => {
                // No denominator, no percentage
                let percent = total
                    .filter(|t| *t > 0)
                    .map(|t| (downloaded.saturating_mul(100) / t).min(100) as u8);
                (percent, speed, eta)
            }
            ProgressEvent::Percent { percent, speed, eta } => {
                (Some(percent.clamp(0.0, 100.0).floor() as u8), speed, eta)
            }
        };

        if let Some(percent) = percent {
            self.progress_percent = self.progress_percent.max(percent);
        }
        if speed.is_some() {
            self.speed = speed;
        }
        if eta.is_some() {
            self.eta = eta;
        }
    }

    fn clear_telemetry(&mut self) {
        self.speed = None;
        self.eta = None;
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            task_id: self.id.clone(),
            status: self.status,
            progress: self.progress_percent,
            speed: self.speed.clone(),
            eta: self.eta.clone(),
            title: self.title.clone(),
            uploader: self.uploader.clone(),
            kind: self.kind,
            quality: self.quality.label(),
            url: self.source_url.clone(),
            backend: self.backend.clone(),
            filename: self.output_filename.clone(),
            error: self.error_detail.clone(),
            error_kind: self.error_kind,
            created_at: self.created_at.format(&Rfc3339).unwrap_or_default(),
        }
    }
}

/// Public JSON shape of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub title: String,
    pub uploader: String,
    pub kind: MediaKind,
    pub quality: String,
    pub url: String,
    pub backend: Option<String>,
    pub filename: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: String,
}
