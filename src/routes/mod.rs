pub mod credentials;
pub mod generate;
pub mod health;
pub mod metrics;
