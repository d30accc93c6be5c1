//! Executor contract and type-keyed registries.
//!
//! The registries map a job or task type to the executor that carries out
//! its business logic. The migrator claims a work item, looks up the
//! executor for the item's type, and calls the operation matching the
//! item's claimed state.
//!
//! # Example
//!
//! ```ignore
//! let jobs = JobExecutorRegistry::new()
//!     .with(JobType::StaticDataset, StaticDatasetJobExecutor::new(zebedee));
//! let tasks = TaskExecutorRegistry::new()
//!     .with(TaskType::DatasetSeries, SeriesExecutor::new(dataset_api))
//!     .with(TaskType::DatasetEdition, EditionExecutor::new(dataset_api));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domains::migration::error::{MigrationError, Result};
use crate::domains::migration::models::{Job, JobType, Task, TaskType};
use crate::domains::migration::service::MigrationService;
use crate::domains::migration::state::State;

/// A unit the migrator can claim and hand to an executor.
pub trait WorkItem: Clone + fmt::Debug + Send + Sync + 'static {
    /// Closed type tag used to select the executor.
    type Kind: Copy + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;

    fn state(&self) -> State;

    /// Number of the job this item belongs to (its own number for a job).
    fn job_number(&self) -> i64;
}

impl WorkItem for Job {
    type Kind = JobType;

    fn kind(&self) -> JobType {
        self.job_type()
    }

    fn state(&self) -> State {
        self.state
    }

    fn job_number(&self) -> i64 {
        self.job_number
    }
}

impl WorkItem for Task {
    type Kind = TaskType;

    fn kind(&self) -> TaskType {
        self.task_type
    }

    fn state(&self) -> State {
        self.state
    }

    fn job_number(&self) -> i64 {
        self.job_number
    }
}

/// What an executor can reach while running.
///
/// Executors create child tasks and record allocated target identifiers
/// through the service.
#[derive(Clone)]
pub struct ExecutorContext {
    service: Arc<MigrationService>,
}

impl ExecutorContext {
    pub fn new(service: Arc<MigrationService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &MigrationService {
        &self.service
    }
}

/// Business logic for one job or task type.
///
/// Only `migrate` is required. The publish, post-publish and revert
/// phases default to succeeding without doing anything.
#[async_trait]
pub trait Executor<T: WorkItem>: Send + Sync {
    async fn migrate(&self, ctx: &ExecutorContext, item: &T) -> anyhow::Result<()>;

    async fn publish(&self, _ctx: &ExecutorContext, _item: &T) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_publish(&self, _ctx: &ExecutorContext, _item: &T) -> anyhow::Result<()> {
        Ok(())
    }

    async fn revert(&self, _ctx: &ExecutorContext, _item: &T) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Registry of executors keyed by the work item's type tag.
pub struct ExecutorRegistry<T: WorkItem> {
    executors: HashMap<T::Kind, Arc<dyn Executor<T>>>,
}

pub type JobExecutorRegistry = ExecutorRegistry<Job>;
pub type TaskExecutorRegistry = ExecutorRegistry<Task>;

impl<T: WorkItem> Default for ExecutorRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: WorkItem> ExecutorRegistry<T> {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor, replacing any previous one for the same type.
    pub fn register<E>(&mut self, kind: T::Kind, executor: E)
    where
        E: Executor<T> + 'static,
    {
        self.executors.insert(kind, Arc::new(executor));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<E>(mut self, kind: T::Kind, executor: E) -> Self
    where
        E: Executor<T> + 'static,
    {
        self.register(kind, executor);
        self
    }

    pub fn get(&self, kind: T::Kind) -> Result<Arc<dyn Executor<T>>> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or_else(|| MigrationError::NoExecutorForType(kind.to_string()))
    }

    pub fn is_registered(&self, kind: T::Kind) -> bool {
        self.executors.contains_key(&kind)
    }

    pub fn registered_types(&self) -> Vec<T::Kind> {
        self.executors.keys().copied().collect()
    }

    /// Run the operation matching the item's current state.
    ///
    /// Only `migrating` items are executed; anything else is reported as
    /// `UnsupportedState` so the caller can route it to failure handling.
    pub async fn dispatch(&self, ctx: &ExecutorContext, item: &T) -> Result<()> {
        let executor = self.get(item.kind())?;
        match item.state() {
            State::Migrating => executor
                .migrate(ctx, item)
                .await
                .map_err(MigrationError::Execution),
            other => Err(MigrationError::UnsupportedState(other)),
        }
    }
}
