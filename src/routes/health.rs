use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub credentials: ComponentHealth,
    pub registry: RegistryHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub available: Option<usize>,
}

#[derive(Serialize)]
pub struct RegistryHealth {
    pub jobs: usize,
    pub capacity: usize,
    pub free_worker_slots: usize,
}

/// GET /health — credential pool and job registry status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let orchestrator = &state.orchestrator;

    // An empty pool is reported as degraded: every new job would fail.
    let credentials = match orchestrator.pool().load().await {
        Ok(list) if !list.is_empty() => ComponentHealth {
            status: "ok".to_string(),
            available: Some(list.len()),
        },
        Ok(_) => ComponentHealth {
            status: "empty".to_string(),
            available: Some(0),
        },
        Err(_) => ComponentHealth {
            status: "error".to_string(),
            available: None,
        },
    };

    let healthy = credentials.status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            credentials,
            registry: RegistryHealth {
                jobs: orchestrator.registry().len(),
                capacity: orchestrator.registry().capacity(),
                free_worker_slots: orchestrator.available_slots(),
            },
        },
    };

    (status_code, Json(response))
}
