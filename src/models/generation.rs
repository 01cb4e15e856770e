use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobStatus;

/// Parameters of one rendering request.
///
/// Serializes to the exact body the rendering service's create endpoint
/// expects, so the same value is validated at the edge and sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerationRequest {
    #[garde(length(chars, min = 1, max = 2000))]
    pub prompt: String,

    #[garde(skip)]
    pub model_id: i64,

    /// Number of images to render.
    #[garde(range(min = 1, max = 4))]
    pub gnum: u8,

    #[garde(range(min = 64, max = 2048))]
    pub width: u32,

    #[garde(range(min = 64, max = 2048))]
    pub height: u32,

    #[garde(skip)]
    pub size_id: i64,

    #[serde(default)]
    #[garde(length(chars, max = 2000))]
    pub negative_prompt: String,

    #[garde(skip)]
    pub style_id: i64,

    #[serde(rename = "type", default = "default_kind")]
    #[garde(length(min = 1, max = 32))]
    pub kind: String,
}

fn default_kind() -> String {
    "normal".to_string()
}

/// Body of `POST /api/v1/generate`.
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateRequest {
    #[garde(length(min = 1, max = 128))]
    pub caller_id: String,

    #[serde(flatten)]
    #[garde(dive)]
    pub request: GenerationRequest,
}

/// Response after a job has been accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
}
