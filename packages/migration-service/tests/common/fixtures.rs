//! Fixtures shared by the integration tests.

use std::time::Duration;

use migration_core::domains::migration::{Job, JobConfig, NewTask, Task, TaskMetadata, TaskType};
use migration_core::kernel::BaseMigrationStore;

pub const API_URL: &str = "http://localhost:30100";

pub fn job_config(source_id: &str) -> JobConfig {
    JobConfig::builder()
        .source_id(source_id)
        .target_id(format!("{}-new", source_id))
        .build()
}

/// Insert a submitted job directly through the store.
pub async fn insert_job(store: &dyn BaseMigrationStore, source_id: &str) -> Job {
    let number = store.next_job_number().await.unwrap();
    let job = Job::new(job_config(source_id), number, source_id, API_URL);
    store.insert_job(&job).await.unwrap()
}

/// Insert a submitted task under `job_number` directly through the store.
pub async fn insert_task(store: &dyn BaseMigrationStore, job_number: i64, id: &str) -> Task {
    let task = Task::new(
        NewTask::builder()
            .job_number(job_number)
            .task_type(TaskType::DatasetVersion)
            .source(TaskMetadata::builder().id(id).build())
            .build(),
        API_URL,
    );
    store.insert_task(&task).await.unwrap()
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
