use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;

#[derive(Debug, Deserialize)]
pub struct AppendCredentialsRequest {
    pub tokens: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AppendCredentialsResponse {
    pub added: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct CredentialCountResponse {
    pub count: usize,
}

/// POST /api/v1/credentials — Restock the credential pool.
pub async fn append_credentials(
    State(state): State<AppState>,
    Json(body): Json<AppendCredentialsRequest>,
) -> Result<Json<AppendCredentialsResponse>, StatusCode> {
    let pool = state.orchestrator.pool();

    let added = pool.append(&body.tokens).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to append credentials");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let total = pool
        .load()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .len();

    Ok(Json(AppendCredentialsResponse { added, total }))
}

/// GET /api/v1/credentials — Number of usable credentials.
pub async fn count_credentials(
    State(state): State<AppState>,
) -> Result<Json<CredentialCountResponse>, StatusCode> {
    let count = state
        .orchestrator
        .pool()
        .load()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to read credential pool");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .len();

    Ok(Json(CredentialCountResponse { count }))
}
