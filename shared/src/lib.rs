//! Shared data structures for the dynamic executor allocation controller
//!
//! This crate contains the configuration types, the resource profile
//! registry, and the scheduler event schema consumed by the controller crate.

pub mod config;
pub mod defaults;
pub mod events;
pub mod profile;

// Re-export commonly used types for convenience
pub use config::{AllocationConfig, ScenarioConfig, StageSpec};
pub use events::{EventKind, SchedulerEvent, TaskEndReason};
pub use profile::{ResourceProfile, ResourceProfileRegistry, DEFAULT_RESOURCE_PROFILE_ID};

/// Result type alias used throughout the workspace
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the allocation controller
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cluster manager error: {0}")]
    Cluster(String),

    #[error("Event error: {0}")]
    Event(String),
}

#[cfg(test)]
mod tests;
