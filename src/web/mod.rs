mod responses;
mod state;

pub use responses::{ApiMessage, JobSubmission, json_error};
pub use state::AppState;

use std::path::Path as FilePath;

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
};
use sanitize_filename::sanitize;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::{
    cache::{self, CacheEntry},
    jobs::{self, JobStatus, SubmitOutcome},
    registry::{self, NewDocument},
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/documents", post(upload_document))
        .route(
            "/documents/:id/summary",
            post(submit_summary).get(summary_status),
        )
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    document_id: Uuid,
    delete_at: String,
}

/// Stores the uploaded blob and registers the document. Summarization is
/// never started here; it has to be requested explicitly.
async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), (StatusCode, Json<ApiMessage>)> {
    let mut owner_id: Option<Uuid> = None;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        json_error(
            StatusCode::BAD_REQUEST,
            format!("invalid multipart payload: {err}"),
        )
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("owner_id") => {
                let value = field.text().await.map_err(|err| {
                    json_error(StatusCode::BAD_REQUEST, format!("invalid owner_id: {err}"))
                })?;
                owner_id = Some(Uuid::parse_str(value.trim()).map_err(|_| {
                    json_error(StatusCode::BAD_REQUEST, "owner_id must be a UUID.")
                })?);
            }
            Some("file") => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let bytes = field.bytes().await.map_err(|err| {
                    json_error(StatusCode::BAD_REQUEST, format!("failed to read upload: {err}"))
                })?;
                upload = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let owner_id = owner_id
        .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "An owner_id field is required."))?;
    let (filename, bytes) =
        upload.ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "A file field is required."))?;

    if bytes.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "The uploaded file is empty.",
        ));
    }

    let extension = FilePath::new(&filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    let blob = state
        .blob()
        .store(&bytes, &extension)
        .await
        .map_err(internal_error)?;

    let document = registry::register(
        &state.pool(),
        NewDocument {
            owner_id,
            original_filename: sanitize(&filename),
            storage_ref: blob.reference,
            byte_size: bytes.len() as i64,
            extension,
        },
        state.settings().retention_hours,
    )
    .await
    .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            document_id: document.id,
            delete_at: document.delete_at.to_rfc3339(),
        }),
    ))
}

/// Enqueues a summary job for the document. Idempotent: resubmitting
/// while a job exists reports the existing job instead of starting a new
/// one.
async fn submit_summary(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobSubmission>), (StatusCode, Json<ApiMessage>)> {
    let outcome = state
        .queue()
        .submit(document_id)
        .await
        .map_err(internal_error)?;

    let status_url = format!("/documents/{document_id}/summary");

    match outcome {
        SubmitOutcome::Accepted => Ok((
            StatusCode::ACCEPTED,
            Json(JobSubmission::new(document_id, JobStatus::Pending, status_url)),
        )),
        SubmitOutcome::AlreadyActive(status) => Ok((
            StatusCode::OK,
            Json(JobSubmission::new(document_id, status, status_url)),
        )),
        SubmitOutcome::NotFound => Err(json_error(
            StatusCode::NOT_FOUND,
            "No document found for that id.",
        )),
    }
}

/// Polling endpoint. Reads the cache, falls back to durable storage on a
/// miss and repopulates the cache. Never triggers any summarization work.
async fn summary_status(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<CacheEntry>, (StatusCode, Json<ApiMessage>)> {
    if let Some(entry) = cache::load_entry(state.cache(), document_id).await {
        return Ok(Json(entry));
    }

    let record = jobs::fetch_job(&state.pool(), document_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            json_error(
                StatusCode::NOT_FOUND,
                "No summary job found for that document.",
            )
        })?;

    let entry = jobs::entry_for_record(&record);
    cache::store_entry(state.cache(), &entry).await;

    Ok(Json(entry))
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ApiMessage>) {
    error!(?err, "internal error in document pipeline");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
}
