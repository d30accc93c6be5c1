//! PostgreSQL-backed migration store.
//!
//! Claims use a single `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP
//! LOCKED) RETURNING` statement, so selecting the oldest pending record and
//! flipping its state happen atomically. Concurrent workers skip rows another
//! worker has locked instead of blocking on them.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::common::{JobId, TaskId};
use crate::domains::migration::error::{MigrationError, Result};
use crate::domains::migration::models::{Job, JobConfig, JobEvent, Task, TaskMetadata};
use crate::domains::migration::state::State;
use crate::kernel::BaseMigrationStore;

const JOB_COLUMNS: &str =
    "id, job_number, source_id, target_id, job_type, state, label, links, last_updated";

const TASK_COLUMNS: &str =
    "id, job_number, task_type, state, source, target, links, last_updated";

/// Partial unique index allowing one active job per source, target and type.
const ACTIVE_JOB_CONSTRAINT: &str = "uq_migration_jobs_active_config";

/// Migration store on a Postgres pool.
#[derive(Clone)]
pub struct PostgresMigrationStore {
    pool: PgPool,
}

impl PostgresMigrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BaseMigrationStore for PostgresMigrationStore {
    async fn next_job_number(&self) -> Result<i64> {
        let (number,): (i64,) = sqlx::query_as("SELECT nextval('migration_job_number_seq')")
            .fetch_one(&self.pool)
            .await?;
        Ok(number)
    }

    async fn insert_job(&self, job: &Job) -> Result<Job> {
        let sql = format!(
            r#"
            INSERT INTO migration_jobs (id, job_number, source_id, target_id, job_type, state, label, links, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, Job>(&sql)
            .bind(job.id)
            .bind(job.job_number)
            .bind(&job.config.source_id)
            .bind(&job.config.target_id)
            .bind(job.config.job_type)
            .bind(job.state)
            .bind(&job.label)
            .bind(&job.links)
            .bind(job.last_updated)
            .fetch_one(&self.pool)
            .await;

        match inserted {
            Ok(inserted) => Ok(inserted),
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some(ACTIVE_JOB_CONSTRAINT) =>
            {
                // A concurrent create won the race for this source and target.
                let existing = self.find_active_job(&job.config).await?;
                Err(MigrationError::JobAlreadyActive {
                    job_number: existing.map_or(job.job_number, |j| j.job_number),
                    source_id: job.config.source_id.clone(),
                    target_id: job.config.target_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_job(&self, id: JobId) -> Result<Job> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM migration_jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MigrationError::JobNotFound(id.to_string()))
    }

    async fn get_job_by_number(&self, job_number: i64) -> Result<Job> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM migration_jobs WHERE job_number = $1");
        sqlx::query_as::<_, Job>(&sql)
            .bind(job_number)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MigrationError::JobNotFound(format!("number {}", job_number)))
    }

    async fn find_active_job(&self, config: &JobConfig) -> Result<Option<Job>> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM migration_jobs
            WHERE source_id = $1
              AND target_id = $2
              AND job_type = $3
              AND state NOT IN ('completed', 'cancelled')
            ORDER BY last_updated
            LIMIT 1
            "#
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(&config.source_id)
            .bind(&config.target_id)
            .bind(config.job_type)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn claim_job(&self, pending: State, claimed: State) -> Result<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE migration_jobs
            SET state = $2,
                last_updated = NOW()
            WHERE id = (
                SELECT id
                FROM migration_jobs
                WHERE state = $1
                ORDER BY last_updated, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(pending)
            .bind(claimed)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn update_job_state(&self, id: JobId, from: State, to: State) -> Result<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE migration_jobs
            SET state = $3,
                last_updated = NOW()
            WHERE id = $1 AND state = $2
            RETURNING {JOB_COLUMNS}
            "#
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .bind(from)
            .bind(to)
            .fetch_optional(&self.pool)
            .await?;

        if job.is_none() {
            // Distinguish "moved on" from "never existed".
            self.get_job(id).await?;
        }
        Ok(job)
    }

    async fn insert_task(&self, task: &Task) -> Result<Task> {
        let sql = format!(
            r#"
            INSERT INTO migration_tasks (id, job_number, task_type, state, source, target, links, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TASK_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, Task>(&sql)
            .bind(task.id)
            .bind(task.job_number)
            .bind(task.task_type)
            .bind(task.state)
            .bind(&task.source)
            .bind(&task.target)
            .bind(&task.links)
            .bind(task.last_updated)
            .fetch_one(&self.pool)
            .await?;
        Ok(inserted)
    }

    async fn get_task(&self, id: TaskId) -> Result<Task> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM migration_tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(MigrationError::TaskNotFound(id))
    }

    async fn get_job_tasks(&self, job_number: i64) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM migration_tasks WHERE job_number = $1 ORDER BY last_updated, id"
        );
        let tasks = sqlx::query_as::<_, Task>(&sql)
            .bind(job_number)
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    async fn claim_task(&self, pending: State, claimed: State) -> Result<Option<Task>> {
        let sql = format!(
            r#"
            UPDATE migration_tasks
            SET state = $2,
                last_updated = NOW()
            WHERE id = (
                SELECT id
                FROM migration_tasks
                WHERE state = $1
                ORDER BY last_updated, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        );
        let task = sqlx::query_as::<_, Task>(&sql)
            .bind(pending)
            .bind(claimed)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn update_task_state(
        &self,
        id: TaskId,
        from: State,
        to: State,
    ) -> Result<Option<Task>> {
        let sql = format!(
            r#"
            UPDATE migration_tasks
            SET state = $3,
                last_updated = NOW()
            WHERE id = $1 AND state = $2
            RETURNING {TASK_COLUMNS}
            "#
        );
        let task = sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .bind(from)
            .bind(to)
            .fetch_optional(&self.pool)
            .await?;

        if task.is_none() {
            self.get_task(id).await?;
        }
        Ok(task)
    }

    async fn update_task_target(&self, id: TaskId, target: &TaskMetadata) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE migration_tasks
            SET target = $2,
                last_updated = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .bind(Json(target))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(MigrationError::TaskNotFound(id))
    }

    async fn count_tasks_in_state(&self, job_number: i64, state: State) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM migration_tasks WHERE job_number = $1 AND state = $2",
        )
        .bind(job_number)
        .bind(state)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_tasks(&self, job_number: i64) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM migration_tasks WHERE job_number = $1")
                .bind(job_number)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn insert_job_event(&self, event: &JobEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_job_events (id, job_number, action, from_state, to_state, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.job_number)
        .bind(event.action)
        .bind(event.from_state)
        .bind(event.to_state)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_job_events(&self, job_number: i64) -> Result<Vec<JobEvent>> {
        let events = sqlx::query_as::<_, JobEvent>(
            r#"
            SELECT id, job_number, action, from_state, to_state, created_at
            FROM migration_job_events
            WHERE job_number = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(job_number)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}
