pub mod credentials;
pub mod extractor;
pub mod failover;
pub mod poller;
pub mod registry;
pub mod render;
pub mod runner;
