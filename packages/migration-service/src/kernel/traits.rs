// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no orchestration logic.
// Claiming, promotion and failure policy live in the domain and the migrator,
// which talk to storage through these traits.
//
// Naming convention: Base* for trait names (e.g., BaseMigrationStore)

use async_trait::async_trait;

use crate::common::{JobId, TaskId};
use crate::domains::migration::error::Result;
use crate::domains::migration::models::{Job, JobConfig, JobEvent, Task, TaskMetadata};
use crate::domains::migration::state::State;

// =============================================================================
// Migration Store Trait (Infrastructure - jobs, tasks, events)
// =============================================================================

/// Persistence for jobs, tasks and job events.
///
/// Lookups by key report `JobNotFound` / `TaskNotFound` rather than a
/// generic storage error. State writes are either an atomic claim or a
/// compare-and-set on the expected current state; no operation spans more
/// than one record.
#[async_trait]
pub trait BaseMigrationStore: Send + Sync {
    // ---------------------------------------------------------------------
    // Jobs
    // ---------------------------------------------------------------------

    /// Allocate the next human-readable job number.
    async fn next_job_number(&self) -> Result<i64>;

    /// Insert a new job exactly as given.
    ///
    /// Fails with `JobAlreadyActive` when another active job has the same
    /// source, target and type, even if `find_active_job` missed it.
    async fn insert_job(&self, job: &Job) -> Result<Job>;

    async fn get_job(&self, id: JobId) -> Result<Job>;

    async fn get_job_by_number(&self, job_number: i64) -> Result<Job>;

    /// Find a job for the same source, target and type that is still active
    /// (neither completed nor cancelled).
    async fn find_active_job(&self, config: &JobConfig) -> Result<Option<Job>>;

    /// Atomically claim the oldest job in `pending`, moving it to `claimed`.
    ///
    /// Returns `None` when no job is waiting. Two callers never receive the
    /// same job.
    async fn claim_job(&self, pending: State, claimed: State) -> Result<Option<Job>>;

    /// Move a job from `from` to `to` if it is still in `from`.
    ///
    /// Returns `None` when the job has already left `from`.
    async fn update_job_state(&self, id: JobId, from: State, to: State) -> Result<Option<Job>>;

    // ---------------------------------------------------------------------
    // Tasks
    // ---------------------------------------------------------------------

    async fn insert_task(&self, task: &Task) -> Result<Task>;

    async fn get_task(&self, id: TaskId) -> Result<Task>;

    /// All tasks of a job, oldest first.
    async fn get_job_tasks(&self, job_number: i64) -> Result<Vec<Task>>;

    /// Atomically claim the oldest task in `pending`, moving it to `claimed`.
    async fn claim_task(&self, pending: State, claimed: State) -> Result<Option<Task>>;

    /// Move a task from `from` to `to` if it is still in `from`.
    async fn update_task_state(&self, id: TaskId, from: State, to: State)
        -> Result<Option<Task>>;

    /// Record destination identifiers allocated for a task.
    async fn update_task_target(&self, id: TaskId, target: &TaskMetadata) -> Result<Task>;

    async fn count_tasks_in_state(&self, job_number: i64, state: State) -> Result<i64>;

    /// Number of tasks under a job, whatever their state.
    async fn count_tasks(&self, job_number: i64) -> Result<i64>;

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    async fn insert_job_event(&self, event: &JobEvent) -> Result<()>;

    /// Events of a job, oldest first.
    async fn list_job_events(&self, job_number: i64) -> Result<Vec<JobEvent>>;
}
