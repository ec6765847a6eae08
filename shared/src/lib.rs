//! Shared data structures and utilities for the task-scheduling control plane
//!
//! This crate contains the common domain model, wire types, configuration
//! structures, and utilities used by both the `master` and `worker` binaries.

pub mod api;
pub mod config;
pub mod defaults;
pub mod model;
pub mod telemetry;
pub mod utils;

pub use api::ApiResponse;
pub use model::{Assignment, ResourceVector, RtsParams, Task, TaskStatus, TaskType, Worker};

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Common error kinds for the scheduling control plane, following the
/// propagation rule: data-plane errors (RPC, persistence) are recovered
/// locally by the caller; these variants just name the kind for logging and
/// HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("params error: {0}")]
    Params(String),
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {
        // Smoke test to ensure all modules can be imported
        let _ = crate::model::TaskType::CpuLight;
        let _ = crate::config::MasterConfig::default();
    }
}
