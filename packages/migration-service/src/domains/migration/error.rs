use thiserror::Error;

use super::state::State;
use crate::common::TaskId;

/// Errors raised by the migration orchestration core.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: State, to: State },

    #[error("Unknown state: {0}")]
    UnknownState(String),

    #[error("No executor registered for type: {0}")]
    NoExecutorForType(String),

    #[error("Unsupported state for execution: {0}")]
    UnsupportedState(State),

    #[error("Execution failed: {0}")]
    Execution(#[source] anyhow::Error),

    #[error("No failure state defined for state: {0}")]
    NoFailureStateDefined(State),

    #[error("State of {0} changed concurrently, giving up")]
    Conflict(String),

    #[error("Timed out waiting for in-flight migrations to finish")]
    ShutdownTimedOut,

    #[error("An active job (number {job_number}) already exists for source {source_id} and target {target_id}")]
    JobAlreadyActive {
        job_number: i64,
        source_id: String,
        target_id: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl MigrationError {
    /// Whether the error reports a missing job or task.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MigrationError::JobNotFound(_) | MigrationError::TaskNotFound(_)
        )
    }
}

pub type Result<T, E = MigrationError> = std::result::Result<T, E>;
