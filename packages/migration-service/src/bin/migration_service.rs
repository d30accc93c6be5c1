//! Migration Service
//!
//! Runs the migrator against Postgres until Ctrl-C, then drains in-flight
//! work within the configured shutdown timeout.

use std::sync::Arc;

use anyhow::{Context, Result};
use migration_core::domains::migration::MigrationService;
use migration_core::kernel::{
    JobExecutorRegistry, Migrator, MigratorConfig, PostgresMigrationStore, TaskExecutorRegistry,
};
use migration_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,migration_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting migration service");

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database migrations applied");

    let store = Arc::new(PostgresMigrationStore::new(pool));
    let service = Arc::new(MigrationService::new(store, config.api_url.clone()));

    // Business executors are registered by the deployment that embeds this
    // crate; unregistered types fail with NoExecutorForType.
    let migrator = Migrator::new(
        service,
        JobExecutorRegistry::new(),
        TaskExecutorRegistry::new(),
        MigratorConfig::from(&config),
    );
    migrator.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    migrator
        .shutdown(config.shutdown_timeout)
        .await
        .context("Migrator did not shut down cleanly")?;

    tracing::info!("Migration service stopped");
    Ok(())
}
