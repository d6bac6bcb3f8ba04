use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;
use uuid::Uuid;

use crate::jobs::JobStatus;

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize, Clone)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Acknowledgement for a summary submission: the job id, the state the
/// job is in right now, and where to poll for progress.
#[derive(Debug, Serialize, Clone)]
pub struct JobSubmission {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub status_url: String,
}

impl JobSubmission {
    pub fn new(job_id: Uuid, status: JobStatus, status_url: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            status_url: status_url.into(),
        }
    }
}

/// Helper for handlers that return `(StatusCode, Json<ApiMessage>)`.
pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ApiMessage>) {
    (status, Json(ApiMessage::new(message)))
}
