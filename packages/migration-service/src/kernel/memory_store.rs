//! In-memory migration store for tests.
//!
//! Every operation runs inside one mutex-guarded critical section, which is
//! what makes claims exclusive here.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;

use crate::common::{JobId, TaskId};
use crate::domains::migration::error::{MigrationError, Result};
use crate::domains::migration::models::{Job, JobConfig, JobEvent, Task, TaskMetadata};
use crate::domains::migration::state::State;
use crate::kernel::BaseMigrationStore;

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    tasks: HashMap<TaskId, Task>,
    events: Vec<JobEvent>,
    last_job_number: i64,
}

impl Inner {
    fn job_by_number(&self, job_number: i64) -> Option<&Job> {
        self.jobs.values().find(|j| j.job_number == job_number)
    }
}

/// Store that keeps jobs, tasks and events in process memory.
#[derive(Default)]
pub struct InMemoryMigrationStore {
    inner: Mutex<Inner>,
}

impl InMemoryMigrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All jobs, ordered by job number.
    pub fn jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut jobs: Vec<Job> = inner.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.job_number);
        jobs
    }

    /// All tasks, oldest first.
    pub fn tasks(&self) -> Vec<Task> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| (t.last_updated, t.id.into_uuid()));
        tasks
    }
}

#[async_trait]
impl BaseMigrationStore for InMemoryMigrationStore {
    async fn next_job_number(&self) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.last_job_number += 1;
        Ok(inner.last_job_number)
    }

    async fn insert_job(&self, job: &Job) -> Result<Job> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if job.state.is_active() {
            if let Some(existing) = inner
                .jobs
                .values()
                .find(|j| j.config == job.config && j.state.is_active())
            {
                return Err(MigrationError::JobAlreadyActive {
                    job_number: existing.job_number,
                    source_id: job.config.source_id.clone(),
                    target_id: job.config.target_id.clone(),
                });
            }
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn get_job(&self, id: JobId) -> Result<Job> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| MigrationError::JobNotFound(id.to_string()))
    }

    async fn get_job_by_number(&self, job_number: i64) -> Result<Job> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .job_by_number(job_number)
            .cloned()
            .ok_or_else(|| MigrationError::JobNotFound(format!("number {}", job_number)))
    }

    async fn find_active_job(&self, config: &JobConfig) -> Result<Option<Job>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .jobs
            .values()
            .filter(|j| &j.config == config && j.state.is_active())
            .min_by_key(|j| j.last_updated)
            .cloned())
    }

    async fn claim_job(&self, pending: State, claimed: State) -> Result<Option<Job>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let oldest = inner
            .jobs
            .values()
            .filter(|j| j.state == pending)
            .min_by_key(|j| (j.last_updated, j.id.into_uuid()))
            .map(|j| j.id);

        Ok(oldest.and_then(|id| {
            inner.jobs.get_mut(&id).map(|job| {
                job.state = claimed;
                job.last_updated = Utc::now();
                job.clone()
            })
        }))
    }

    async fn update_job_state(&self, id: JobId, from: State, to: State) -> Result<Option<Job>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| MigrationError::JobNotFound(id.to_string()))?;

        if job.state != from {
            return Ok(None);
        }
        job.state = to;
        job.last_updated = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn insert_task(&self, task: &Task) -> Result<Task> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.job_by_number(task.job_number).is_none() {
            return Err(MigrationError::JobNotFound(format!(
                "number {}",
                task.job_number
            )));
        }
        inner.tasks.insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn get_task(&self, id: TaskId) -> Result<Task> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .tasks
            .get(&id)
            .cloned()
            .ok_or(MigrationError::TaskNotFound(id))
    }

    async fn get_job_tasks(&self, job_number: i64) -> Result<Vec<Task>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.job_number == job_number)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.last_updated, t.id.into_uuid()));
        Ok(tasks)
    }

    async fn claim_task(&self, pending: State, claimed: State) -> Result<Option<Task>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let oldest = inner
            .tasks
            .values()
            .filter(|t| t.state == pending)
            .min_by_key(|t| (t.last_updated, t.id.into_uuid()))
            .map(|t| t.id);

        Ok(oldest.and_then(|id| {
            inner.tasks.get_mut(&id).map(|task| {
                task.state = claimed;
                task.last_updated = Utc::now();
                task.clone()
            })
        }))
    }

    async fn update_task_state(
        &self,
        id: TaskId,
        from: State,
        to: State,
    ) -> Result<Option<Task>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(MigrationError::TaskNotFound(id))?;

        if task.state != from {
            return Ok(None);
        }
        task.state = to;
        task.last_updated = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn update_task_target(&self, id: TaskId, target: &TaskMetadata) -> Result<Task> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(MigrationError::TaskNotFound(id))?;
        task.target = Some(Json(target.clone()));
        task.last_updated = Utc::now();
        Ok(task.clone())
    }

    async fn count_tasks_in_state(&self, job_number: i64, state: State) -> Result<i64> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.job_number == job_number && t.state == state)
            .count() as i64)
    }

    async fn count_tasks(&self, job_number: i64) -> Result<i64> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.job_number == job_number)
            .count() as i64)
    }

    async fn insert_job_event(&self, event: &JobEvent) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.events.push(event.clone());
        Ok(())
    }

    async fn list_job_events(&self, job_number: i64) -> Result<Vec<JobEvent>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .events
            .iter()
            .filter(|e| e.job_number == job_number)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::domains::migration::models::{NewTask, TaskType};

    async fn seed_job(store: &InMemoryMigrationStore, source: &str) -> Job {
        let number = store.next_job_number().await.unwrap();
        let config = JobConfig::builder()
            .source_id(source)
            .target_id(format!("{}-target", source))
            .build();
        store
            .insert_job(&Job::new(config, number, source, "http://api"))
            .await
            .unwrap()
    }

    async fn seed_task(store: &InMemoryMigrationStore, job_number: i64) -> Task {
        let task = Task::new(
            NewTask::builder()
                .job_number(job_number)
                .task_type(TaskType::DatasetSeries)
                .source(TaskMetadata::builder().id("series").build())
                .build(),
            "http://api",
        );
        store.insert_task(&task).await.unwrap()
    }

    #[tokio::test]
    async fn test_claim_returns_none_when_nothing_pending() {
        let store = InMemoryMigrationStore::new();
        assert!(store
            .claim_job(State::Submitted, State::Migrating)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_claim_takes_oldest_first() {
        let store = InMemoryMigrationStore::new();
        let first = seed_job(&store, "a").await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = seed_job(&store, "b").await;

        let claimed = store
            .claim_job(State::Submitted, State::Migrating)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.state, State::Migrating);

        let claimed = store
            .claim_job(State::Submitted, State::Migrating)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, second.id);
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_exclusive() {
        let store = Arc::new(InMemoryMigrationStore::new());
        let job = seed_job(&store, "a").await;
        for _ in 0..20 {
            seed_task(&store, job.job_number).await;
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(task) = store
                    .claim_task(State::Submitted, State::Migrating)
                    .await
                    .unwrap()
                {
                    claimed.push(task.id);
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "task {} claimed twice", id);
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[tokio::test]
    async fn test_update_state_is_compare_and_set() {
        let store = InMemoryMigrationStore::new();
        let job = seed_job(&store, "a").await;

        let moved = store
            .update_job_state(job.id, State::Submitted, State::Cancelled)
            .await
            .unwrap();
        assert_eq!(moved.map(|j| j.state), Some(State::Cancelled));

        let stale = store
            .update_job_state(job.id, State::Submitted, State::Migrating)
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn test_missing_records_are_not_found() {
        let store = InMemoryMigrationStore::new();

        let err = store.get_job(JobId::new()).await.unwrap_err();
        assert!(matches!(err, MigrationError::JobNotFound(_)));

        let err = store.get_task(TaskId::new()).await.unwrap_err();
        assert!(matches!(err, MigrationError::TaskNotFound(_)));

        let err = store
            .update_task_state(TaskId::new(), State::Migrating, State::InReview)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_second_active_job_for_same_config_is_rejected() {
        let store = InMemoryMigrationStore::new();
        let first = seed_job(&store, "a").await;

        let number = store.next_job_number().await.unwrap();
        let duplicate = Job::new(first.config.clone(), number, "again", "http://api");
        let err = store.insert_job(&duplicate).await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::JobAlreadyActive { job_number, .. } if job_number == first.job_number
        ));

        store
            .update_job_state(first.id, State::Submitted, State::Cancelled)
            .await
            .unwrap();
        assert!(store.insert_job(&duplicate).await.is_ok());
    }

    #[tokio::test]
    async fn test_task_requires_existing_job() {
        let store = InMemoryMigrationStore::new();
        let task = Task::new(
            NewTask::builder()
                .job_number(99)
                .task_type(TaskType::DatasetVersion)
                .source(TaskMetadata::builder().id("v1").build())
                .build(),
            "http://api",
        );

        let err = store.insert_task(&task).await.unwrap_err();
        assert!(matches!(err, MigrationError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_counts_by_state() {
        let store = InMemoryMigrationStore::new();
        let job = seed_job(&store, "a").await;
        let t1 = seed_task(&store, job.job_number).await;
        seed_task(&store, job.job_number).await;

        store
            .update_task_state(t1.id, State::Submitted, State::Migrating)
            .await
            .unwrap();

        assert_eq!(store.count_tasks(job.job_number).await.unwrap(), 2);
        assert_eq!(
            store
                .count_tasks_in_state(job.job_number, State::Migrating)
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.count_tasks(job.job_number + 1).await.unwrap(), 0);
    }
}
