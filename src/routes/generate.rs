use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::generation::{GenerateRequest, GenerateResponse, JobStatusResponse};
use crate::models::job::JobStatus;
use crate::services::runner::SubmitError;

/// POST /api/v1/generate — Start an image-generation job.
pub async fn submit_generation(
    State(state): State<AppState>,
    Json(body): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<GenerateResponse>), StatusCode> {
    if let Err(report) = body.validate() {
        tracing::debug!(caller_id = %body.caller_id, errors = %report, "Rejected generation request");
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let job_id = state
        .orchestrator
        .submit_job(body.caller_id, body.request)
        .map_err(|e| match e {
            SubmitError::Registry(e) => {
                tracing::warn!(error = %e, "Refusing generation job");
                StatusCode::SERVICE_UNAVAILABLE
            }
            SubmitError::Closed => {
                tracing::error!("Job dispatcher is not running");
                StatusCode::SERVICE_UNAVAILABLE
            }
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            job_id,
            status: JobStatus::Processing,
        }),
    ))
}

/// GET /api/v1/generate/{job_id} — Check generation job status.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    state
        .orchestrator
        .get_job_status(&job_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
