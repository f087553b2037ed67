use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries::{self, StoreError};
use crate::models::api::{AnalyzeRequest, AnalyzeResponse, JobStatusResponse, UploadResponse};

/// POST /api/v1/uploads — store a food photo and hand back its key.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, StatusCode> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        if field.name() == Some("image") {
            let filename = field.file_name().unwrap_or("upload.bin").to_string();
            let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;

            // Reject anything the image crate cannot even identify.
            image::guess_format(&data).map_err(|_| StatusCode::UNSUPPORTED_MEDIA_TYPE)?;

            upload = Some((filename, data.to_vec()));
        }
    }

    let (filename, data) = upload.ok_or(StatusCode::BAD_REQUEST)?;
    let key = state.images.save_bytes(&filename, &data).await.map_err(|e| {
        tracing::error!(error = %e, "failed to store upload");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    tracing::info!(key = %key, bytes = data.len(), "image uploaded");
    Ok(Json(UploadResponse { key }))
}

/// POST /api/v1/analyze — enqueue an analysis job for an uploaded image.
pub async fn submit_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<AnalyzeResponse>), StatusCode> {
    request.validate().map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    // The image must exist before a job is queued for it; a dangling key
    // would otherwise surface minutes later as a failed job.
    if let Err(e) = state.images.read_bytes(&request.key).await {
        tracing::warn!(key = %request.key, error = %e, "analysis rejected for missing image");
        return Err(StatusCode::NOT_FOUND);
    }

    let job = queries::create_job(&state.db, &request.key).await.map_err(|e| {
        tracing::error!(error = %e, "failed to create job");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    metrics::counter!("analysis_jobs_submitted").increment(1);

    tracing::info!(job_id = %job.id, key = %request.key, "analysis job queued");
    Ok((StatusCode::ACCEPTED, Json(AnalyzeResponse { job_id: job.id, status: job.status })))
}

/// GET /api/v1/jobs/{job_id} — snapshot of a job; never blocks on the worker.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    match queries::get_job(&state.db, job_id).await {
        Ok(job) => Ok(Json(JobStatusResponse::from_job(job))),
        Err(StoreError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "failed to load job");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/v1/jobs/{job_id}/events — live status snapshots over SSE, ending
/// with the first terminal one.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, StatusCode> {
    // Fail fast with a proper status instead of an empty stream.
    match queries::get_job(&state.db, job_id).await {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "failed to load job");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    let stream = state.events.subscribe(job_id).map(|item| {
        let event = match item {
            Ok(job) => {
                let snapshot = JobStatusResponse::from_job(job);
                Event::default().event("status").json_data(&snapshot)
            }
            Err(e) => Ok(Event::default().event("error").data(e.to_string())),
        };
        // Serialization of our own response type cannot fail in practice;
        // degrade to a bare event rather than killing the stream.
        Ok(event.unwrap_or_else(|_| Event::default().event("error").data("serialization error")))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
