//! Application service for creating and reading jobs and tasks.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::error::{MigrationError, Result};
use super::events;
use super::models::{Job, JobAction, JobConfig, JobEvent, NewTask, Task, TaskMetadata};
use super::state::State;
use crate::common::{JobId, TaskId};
use crate::kernel::BaseMigrationStore;

pub struct MigrationService {
    store: Arc<dyn BaseMigrationStore>,
    api_url: String,
}

impl MigrationService {
    pub fn new(store: Arc<dyn BaseMigrationStore>, api_url: impl Into<String>) -> Self {
        Self {
            store,
            api_url: api_url.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn BaseMigrationStore> {
        &self.store
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Create a job in `submitted`.
    ///
    /// Fails with `JobAlreadyActive` when a job for the same source, target
    /// and type has not yet completed or been cancelled.
    pub async fn create_job(&self, config: JobConfig, label: impl Into<String>) -> Result<Job> {
        if let Some(existing) = self.store.find_active_job(&config).await? {
            return Err(MigrationError::JobAlreadyActive {
                job_number: existing.job_number,
                source_id: config.source_id,
                target_id: config.target_id,
            });
        }

        let job_number = self.store.next_job_number().await?;
        let job = Job::new(config, job_number, label, &self.api_url);
        let job = self.store.insert_job(&job).await?;

        info!(
            job_number = job.job_number,
            job_id = %job.id,
            job_type = %job.job_type(),
            source_id = %job.config.source_id,
            target_id = %job.config.target_id,
            "job created"
        );
        events::record(
            self.store.as_ref(),
            job.job_number,
            JobAction::Created,
            None,
            job.state,
        )
        .await;

        Ok(job)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        self.store.get_job(id).await
    }

    pub async fn get_job_by_number(&self, job_number: i64) -> Result<Job> {
        self.store.get_job_by_number(job_number).await
    }

    /// Tasks of an existing job, oldest first.
    pub async fn get_job_tasks(&self, job_number: i64) -> Result<Vec<Task>> {
        self.store.get_job_by_number(job_number).await?;
        self.store.get_job_tasks(job_number).await
    }

    /// Create a task in `submitted` under an existing job.
    pub async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        self.store.get_job_by_number(new_task.job_number).await?;

        let task = Task::new(new_task, &self.api_url);
        let task = self.store.insert_task(&task).await?;

        info!(
            task_id = %task.id,
            job_number = task.job_number,
            task_type = %task.task_type,
            "task created"
        );
        Ok(task)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task> {
        self.store.get_task(id).await
    }

    /// Record destination identifiers as they are allocated.
    pub async fn update_task_target(&self, id: TaskId, target: TaskMetadata) -> Result<Task> {
        self.store.update_task_target(id, &target).await
    }

    /// Number of tasks per state for an existing job. States with no tasks
    /// are left out.
    pub async fn get_job_task_counts(&self, job_number: i64) -> Result<BTreeMap<State, i64>> {
        let tasks = self.get_job_tasks(job_number).await?;
        let mut counts = BTreeMap::new();
        for task in tasks {
            *counts.entry(task.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// State history of an existing job, oldest first.
    pub async fn list_job_events(&self, job_number: i64) -> Result<Vec<JobEvent>> {
        self.store.get_job_by_number(job_number).await?;
        self.store.list_job_events(job_number).await
    }
}
