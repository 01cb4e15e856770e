use serde::Deserialize;
use std::time::Duration;

use crate::services::render::DEFAULT_EXHAUSTION_MARKERS;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Rendering service API prefix, e.g. "https://render.example.com/api/v1".
    pub render_base_url: String,

    /// Flat file holding one bearer credential per line.
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,

    /// Number of jobs allowed to talk to the rendering service at once.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wall-clock budget for the polling phase of a single job.
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,

    /// Per-request HTTP timeout for calls to the rendering service.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Upper bound on jobs kept in the in-memory registry.
    #[serde(default = "default_registry_capacity")]
    pub registry_capacity: usize,

    /// Case-insensitive substrings that mark a credential as out of balance.
    #[serde(default = "default_exhaustion_markers")]
    pub exhaustion_markers: Vec<String>,

    /// Response `code` values that mark a credential as out of balance.
    #[serde(default)]
    pub exhaustion_codes: Vec<i64>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_credentials_path() -> String {
    "credentials.txt".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_generation_timeout_ms() -> u64 {
    300_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_registry_capacity() -> usize {
    10_000
}

fn default_exhaustion_markers() -> Vec<String> {
    DEFAULT_EXHAUSTION_MARKERS
        .iter()
        .map(|m| m.to_string())
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
