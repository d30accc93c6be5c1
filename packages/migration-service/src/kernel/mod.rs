//! Kernel module - storage backends and the worker pool.

pub mod executors;
pub mod memory_store;
pub mod migrator;
pub mod postgres_store;
pub mod traits;

pub use executors::{
    Executor, ExecutorContext, ExecutorRegistry, JobExecutorRegistry, TaskExecutorRegistry,
    WorkItem,
};
pub use memory_store::InMemoryMigrationStore;
pub use migrator::{Migrator, MigratorConfig};
pub use postgres_store::PostgresMigrationStore;
pub use traits::*;
