//! Failure handling for jobs and tasks.
//!
//! An executor error moves the unit from its in-progress state to the
//! matching failure state. A failed task also fails its owning job; a
//! failed job leaves its tasks alone.

use std::sync::Arc;

use tracing::{debug, warn};

use super::error::{MigrationError, Result};
use super::events;
use super::models::{Job, JobAction, Task};
use super::state::{is_failure_state, validate_transition, State};
use crate::kernel::BaseMigrationStore;

/// Attempts at the compare-and-set write before reporting a conflict.
const MAX_ATTEMPTS: usize = 3;

/// Failure state for `state`, or `None` if it is already a failure state.
fn failure_target(state: State) -> Result<Option<State>> {
    if is_failure_state(state) {
        return Ok(None);
    }
    let target = state
        .failure_state()
        .ok_or(MigrationError::NoFailureStateDefined(state))?;
    validate_transition(state, target)?;
    Ok(Some(target))
}

pub struct FailureHandler {
    store: Arc<dyn BaseMigrationStore>,
}

impl FailureHandler {
    pub fn new(store: Arc<dyn BaseMigrationStore>) -> Self {
        Self { store }
    }

    /// Move a job to the failure state for its current state.
    ///
    /// `job` may be stale; the current state is re-read when the write
    /// finds the job has moved on. Failing an already failed job is a no-op.
    pub async fn fail_job(&self, job: &Job) -> Result<Job> {
        let mut current = job.clone();

        for _ in 0..MAX_ATTEMPTS {
            let Some(target) = failure_target(current.state)? else {
                debug!(
                    job_number = current.job_number,
                    state = %current.state,
                    "job already failed"
                );
                return Ok(current);
            };

            if let Some(failed) = self
                .store
                .update_job_state(current.id, current.state, target)
                .await?
            {
                warn!(
                    job_number = failed.job_number,
                    from = %current.state,
                    to = %failed.state,
                    "job failed"
                );
                events::record(
                    self.store.as_ref(),
                    failed.job_number,
                    JobAction::Failed,
                    Some(current.state),
                    failed.state,
                )
                .await;
                return Ok(failed);
            }

            current = self.store.get_job(current.id).await?;
        }

        Err(MigrationError::Conflict(format!("job {}", job.job_number)))
    }

    /// Fail a job looked up by its number.
    pub async fn fail_job_by_id(&self, job_number: i64) -> Result<Job> {
        let job = self.store.get_job_by_number(job_number).await?;
        self.fail_job(&job).await
    }

    /// Fail a task, then fail its owning job.
    ///
    /// The job is failed even when the task was already in a failure state,
    /// so retrying after a partial failure completes the cascade.
    pub async fn fail_task(&self, task: &Task) -> Result<Task> {
        let failed = self.fail_task_only(task).await?;
        self.fail_job_by_id(failed.job_number).await?;
        Ok(failed)
    }

    async fn fail_task_only(&self, task: &Task) -> Result<Task> {
        let mut current = task.clone();

        for _ in 0..MAX_ATTEMPTS {
            let Some(target) = failure_target(current.state)? else {
                debug!(task_id = %current.id, state = %current.state, "task already failed");
                return Ok(current);
            };

            if let Some(failed) = self
                .store
                .update_task_state(current.id, current.state, target)
                .await?
            {
                warn!(
                    task_id = %failed.id,
                    job_number = failed.job_number,
                    from = %current.state,
                    to = %failed.state,
                    "task failed"
                );
                return Ok(failed);
            }

            current = self.store.get_task(current.id).await?;
        }

        Err(MigrationError::Conflict(format!("task {}", task.id)))
    }
}
