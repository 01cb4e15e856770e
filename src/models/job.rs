use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::generation::{GenerationRequest, JobStatusResponse};

/// Caller-visible status of a generation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// Why a job ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("all {tried} rendering credentials are out of balance, retry after restock")]
    AllCredentialsExhausted { tried: usize },

    #[error("no rendering credentials are configured")]
    NoCredentialsAvailable,

    #[error("rendering service rejected the request: {message}")]
    SubmissionRejected { message: String },

    #[error("rendering service reported failure: {message}")]
    GenerationFailed { message: String },

    #[error("generation completed but the result URL is missing")]
    ResultMissing,

    #[error("generation timeout")]
    GenerationTimeout,
}

impl GenerationError {
    /// Stable machine-readable code for API consumers and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            GenerationError::AllCredentialsExhausted { .. } => "credentials_exhausted",
            GenerationError::NoCredentialsAvailable => "no_credentials_available",
            GenerationError::SubmissionRejected { .. } => "submission_rejected",
            GenerationError::GenerationFailed { .. } => "generation_failed",
            GenerationError::ResultMissing => "result_missing",
            GenerationError::GenerationTimeout => "generation_timeout",
        }
    }
}

/// The orchestrator's record of one generation job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub caller_id: String,
    pub request: GenerationRequest,
    pub status: JobStatus,
    /// 0-100, never decreases while the job is processing.
    pub progress: u8,
    pub credential: Option<String>,
    pub task_id: Option<i64>,
    pub queue_id: Option<i64>,
    pub result_url: Option<String>,
    pub error: Option<GenerationError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(caller_id: String, request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            caller_id,
            request,
            status: JobStatus::Processing,
            progress: 0,
            credential: None,
            task_id: None,
            queue_id: None,
            result_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            result_url: job.result_url.clone(),
            error: job.error.as_ref().map(ToString::to_string),
            error_code: job.error.as_ref().map(|e| e.code().to_string()),
            created_at: job.created_at,
        }
    }
}
