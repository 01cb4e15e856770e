pub mod generation;
pub mod job;
pub mod task;
