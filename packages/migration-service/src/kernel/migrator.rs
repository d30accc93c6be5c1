//! Migrator: the worker pool that drives jobs and tasks through migration.
//!
//! Two poll loops run side by side, one for jobs and one for tasks. Each
//! loop:
//! - takes an admission permit (bounded by `max_concurrent_executions`)
//! - claims the oldest `submitted` item, moving it to `migrating`
//! - runs the item's executor on the shutdown tracker
//! - routes errors to the failure handler and successes to the rule engine
//!
//! # Architecture
//!
//! ```text
//! Migrator
//!     │
//!     ├─► permit (Semaphore)
//!     ├─► claim (BaseMigrationStore::claim_job / claim_task)
//!     ├─► dispatch (ExecutorRegistry → Executor::migrate)
//!     └─► result
//!             ├─► Ok  → RuleEngine::trigger_job_state_transitions
//!             └─► Err → FailureHandler::fail_job / fail_task
//! ```
//!
//! The permit is taken before claiming so that a claimed item never waits
//! for a slot; once the loop stops nothing is left claimed but unstarted.
//!
//! While a job's own executor is running, its tasks do not evaluate the
//! promotion rules. The job executor may still be creating tasks or about to
//! fail, so the job is evaluated once it returns instead.
//!
//! # Example
//!
//! ```ignore
//! let migrator_config = MigratorConfig::from(&config);
//! let migrator = Migrator::new(service, job_executors, task_executors, migrator_config);
//! migrator.start();
//!
//! tokio::signal::ctrl_c().await?;
//! migrator.shutdown(config.shutdown_timeout).await?;
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use super::executors::{ExecutorContext, JobExecutorRegistry, TaskExecutorRegistry};
use crate::config::Config;
use crate::domains::migration::error::{MigrationError, Result};
use crate::domains::migration::events;
use crate::domains::migration::failure::FailureHandler;
use crate::domains::migration::models::{Job, JobAction, Task};
use crate::domains::migration::rules::RuleEngine;
use crate::domains::migration::service::MigrationService;
use crate::domains::migration::state::{validate_transition, State};

/// Configuration for the migrator.
#[derive(Debug, Clone, TypedBuilder)]
pub struct MigratorConfig {
    /// How long a loop sleeps when nothing is waiting to be claimed
    #[builder(default = Duration::from_secs(1))]
    pub poll_interval: Duration,
    /// Executions allowed at once, across jobs and tasks
    #[builder(default = 10)]
    pub max_concurrent_executions: usize,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&Config> for MigratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_concurrent_executions: config.max_concurrent_executions,
        }
    }
}

struct MigratorCore {
    service: Arc<MigrationService>,
    ctx: ExecutorContext,
    job_executors: JobExecutorRegistry,
    task_executors: TaskExecutorRegistry,
    rules: RuleEngine,
    failures: FailureHandler,
    permits: Arc<Semaphore>,
    max_concurrent_executions: usize,
    poll_interval: Duration,
    /// Job numbers whose job executor is in flight
    running_jobs: Mutex<HashSet<i64>>,
}

/// Marks a job executor as in flight until dropped.
struct RunningJob<'a> {
    running_jobs: &'a Mutex<HashSet<i64>>,
    job_number: i64,
}

impl<'a> RunningJob<'a> {
    fn enter(running_jobs: &'a Mutex<HashSet<i64>>, job_number: i64) -> Self {
        running_jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_number);
        Self {
            running_jobs,
            job_number,
        }
    }
}

impl Drop for RunningJob<'_> {
    fn drop(&mut self) {
        self.running_jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_number);
    }
}

pub struct Migrator {
    core: Arc<MigratorCore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl Migrator {
    /// Create a migrator with the built-in promotion rules.
    pub fn new(
        service: Arc<MigrationService>,
        job_executors: JobExecutorRegistry,
        task_executors: TaskExecutorRegistry,
        config: MigratorConfig,
    ) -> Self {
        let rules = RuleEngine::new(service.store().clone());
        Self::with_rules(service, job_executors, task_executors, rules, config)
    }

    /// Create a migrator with a custom rule engine.
    pub fn with_rules(
        service: Arc<MigrationService>,
        job_executors: JobExecutorRegistry,
        task_executors: TaskExecutorRegistry,
        rules: RuleEngine,
        config: MigratorConfig,
    ) -> Self {
        let store = service.store().clone();
        let max_concurrent_executions = config.max_concurrent_executions.max(1);
        let core = MigratorCore {
            ctx: ExecutorContext::new(service.clone()),
            service,
            job_executors,
            task_executors,
            rules,
            failures: FailureHandler::new(store),
            permits: Arc::new(Semaphore::new(max_concurrent_executions)),
            max_concurrent_executions,
            poll_interval: config.poll_interval,
            running_jobs: Mutex::new(HashSet::new()),
        };

        Self {
            core: Arc::new(core),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the job and task loops. Calling it again has no effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("migrator already started");
            return;
        }

        info!(
            poll_interval_ms = self.core.poll_interval.as_millis() as u64,
            max_concurrent_executions = self.core.max_concurrent_executions,
            job_types = ?self.core.job_executors.registered_types(),
            task_types = ?self.core.task_executors.registered_types(),
            "starting migrator"
        );

        self.tracker.spawn(run_job_loop(
            self.core.clone(),
            self.shutdown.clone(),
            self.tracker.clone(),
        ));
        self.tracker.spawn(run_task_loop(
            self.core.clone(),
            self.shutdown.clone(),
            self.tracker.clone(),
        ));
    }

    /// Number of executions currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.core
            .max_concurrent_executions
            .saturating_sub(self.core.permits.available_permits())
    }

    /// Stop claiming and wait for in-flight executions to finish.
    ///
    /// Executions are never aborted. If they are still running when
    /// `timeout` elapses, `ShutdownTimedOut` is returned and they carry on in
    /// the background.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        info!(timeout_secs = timeout.as_secs_f64(), "stopping migrator");
        self.shutdown.cancel();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("migrator stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    "timed out waiting for in-flight migrations"
                );
                Err(MigrationError::ShutdownTimedOut)
            }
        }
    }
}

/// Wait for a permit, or `None` once shutdown is requested.
async fn acquire_permit(
    permits: &Arc<Semaphore>,
    shutdown: &CancellationToken,
) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        permit = permits.clone().acquire_owned() => permit.ok(),
    }
}

/// Sleep for the poll interval; returns `false` if shutdown was requested.
async fn idle(poll_interval: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(poll_interval) => true,
    }
}

async fn run_job_loop(
    core: Arc<MigratorCore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    debug!("job loop started");

    while let Some(permit) = acquire_permit(&core.permits, &shutdown).await {
        match core.claim_job().await {
            Ok(Some(job)) => {
                let core = core.clone();
                tracker.spawn(async move {
                    core.execute_job(job).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                if !idle(core.poll_interval, &shutdown).await {
                    break;
                }
            }
            Err(e) => {
                drop(permit);
                error!(error = %e, "failed to claim job");
                if !idle(core.poll_interval, &shutdown).await {
                    break;
                }
            }
        }
    }

    debug!("job loop stopped");
}

async fn run_task_loop(
    core: Arc<MigratorCore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    debug!("task loop started");

    while let Some(permit) = acquire_permit(&core.permits, &shutdown).await {
        match core.claim_task().await {
            Ok(Some(task)) => {
                let core = core.clone();
                tracker.spawn(async move {
                    core.execute_task(task).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                if !idle(core.poll_interval, &shutdown).await {
                    break;
                }
            }
            Err(e) => {
                drop(permit);
                error!(error = %e, "failed to claim task");
                if !idle(core.poll_interval, &shutdown).await {
                    break;
                }
            }
        }
    }

    debug!("task loop stopped");
}

impl MigratorCore {
    async fn claim_job(&self) -> Result<Option<Job>> {
        let store = self.service.store();
        let Some(job) = store.claim_job(State::Submitted, State::Migrating).await? else {
            return Ok(None);
        };

        info!(job_number = job.job_number, job_id = %job.id, "claimed job");
        events::record(
            store.as_ref(),
            job.job_number,
            JobAction::Claimed,
            Some(State::Submitted),
            job.state,
        )
        .await;
        Ok(Some(job))
    }

    async fn claim_task(&self) -> Result<Option<Task>> {
        let task = self
            .service
            .store()
            .claim_task(State::Submitted, State::Migrating)
            .await?;

        if let Some(task) = &task {
            info!(
                task_id = %task.id,
                job_number = task.job_number,
                task_type = %task.task_type,
                "claimed task"
            );
        }
        Ok(task)
    }

    async fn execute_job(&self, job: Job) {
        let job_number = job.job_number;
        let running = RunningJob::enter(&self.running_jobs, job_number);

        match self.job_executors.dispatch(&self.ctx, &job).await {
            Ok(()) => {
                debug!(job_number = job_number, "job executor finished");
                // Tasks finishing from here on evaluate the rules themselves.
                drop(running);
                self.trigger_rules(job_number).await;
            }
            Err(e) => {
                match &e {
                    MigrationError::NoExecutorForType(_) | MigrationError::UnsupportedState(_) => {
                        error!(
                            job_number = job_number,
                            job_type = %job.job_type(),
                            error = %e,
                            "no job executor can run this job, check executor registration"
                        );
                    }
                    _ => warn!(job_number = job_number, error = %e, "job migration failed"),
                }
                // The job stays marked running until it is failed, so no task
                // can promote it first.
                if let Err(e) = self.failures.fail_job(&job).await {
                    error!(job_number = job_number, error = %e, "failed to record job failure");
                }
                drop(running);
            }
        }
    }

    fn is_job_running(&self, job_number: i64) -> bool {
        self.running_jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&job_number)
    }

    async fn execute_task(&self, task: Task) {
        let task_id = task.id;
        let job_number = task.job_number;

        match self.task_executors.dispatch(&self.ctx, &task).await {
            Ok(()) => {
                debug!(task_id = %task_id, job_number = job_number, "task executor finished");
                if let Err(e) = self.advance_task(&task).await {
                    error!(task_id = %task_id, error = %e, "failed to advance task");
                }
                if self.is_job_running(job_number) {
                    debug!(job_number = job_number, "job executor still running, rules deferred");
                } else {
                    self.trigger_rules(job_number).await;
                }
            }
            Err(e) => {
                match &e {
                    MigrationError::NoExecutorForType(_) | MigrationError::UnsupportedState(_) => {
                        error!(
                            task_id = %task_id,
                            job_number = job_number,
                            task_type = %task.task_type,
                            error = %e,
                            "no task executor can run this task, check executor registration"
                        );
                    }
                    _ => warn!(
                        task_id = %task_id,
                        job_number = job_number,
                        error = %e,
                        "task migration failed"
                    ),
                }
                if let Err(e) = self.failures.fail_task(&task).await {
                    error!(task_id = %task_id, error = %e, "failed to record task failure");
                }
            }
        }
    }

    /// Move a successfully migrated task on to review, unless its executor
    /// already moved it.
    async fn advance_task(&self, task: &Task) -> Result<()> {
        validate_transition(State::Migrating, State::InReview)?;
        let advanced = self
            .service
            .store()
            .update_task_state(task.id, State::Migrating, State::InReview)
            .await?;

        if advanced.is_some() {
            debug!(task_id = %task.id, "task ready for review");
        }
        Ok(())
    }

    async fn trigger_rules(&self, job_number: i64) {
        if let Err(e) = self.rules.trigger_job_state_transitions(job_number).await {
            error!(job_number = job_number, error = %e, "failed to evaluate job rules");
        }
    }
}
