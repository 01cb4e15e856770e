use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use render_relay::app_state::AppState;
use render_relay::config::AppConfig;
use render_relay::routes;
use render_relay::services::runner::Orchestrator;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing render-relay server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "generation_jobs_submitted",
        "Total generation jobs accepted"
    );
    metrics::describe_counter!(
        "generation_jobs_completed",
        "Total generation jobs that produced an image URL"
    );
    metrics::describe_counter!(
        "generation_jobs_failed",
        "Total generation jobs that failed, by reason"
    );
    metrics::describe_counter!(
        "render_credentials_exhausted",
        "Credentials removed after the rendering service reported no balance"
    );
    metrics::describe_gauge!(
        "generation_jobs_running",
        "Jobs currently holding a worker slot"
    );
    metrics::describe_histogram!(
        "generation_duration_seconds",
        "Time from acquiring a worker slot to a terminal job state"
    );

    let orchestrator =
        Orchestrator::from_config(&config).expect("Failed to initialize rendering client");

    match orchestrator.pool().load().await {
        Ok(credentials) => tracing::info!(
            path = %orchestrator.pool().path().display(),
            count = credentials.len(),
            "Loaded credential pool"
        ),
        Err(e) => tracing::warn!(error = %e, "Credential pool is unreadable"),
    }

    let state = AppState::new(orchestrator);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/generate",
            axum::routing::post(routes::generate::submit_generation),
        )
        .route(
            "/api/v1/generate/{job_id}",
            get(routes::generate::get_job_status),
        )
        .route(
            "/api/v1/credentials",
            get(routes::credentials::count_credentials)
                .post(routes::credentials::append_credentials),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    tracing::info!("Starting render-relay on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
