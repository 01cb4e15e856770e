//! Image-generation job orchestrator
//!
//! Submits rendering requests to an external, quota-limited generation
//! service through a rotating pool of bearer credentials, fails over when a
//! credential runs out of balance, and polls the service's queue until each
//! job yields an image URL or times out.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
