//! JobHub worker daemon.
//!
//! Main entry point that wires the store, queue, handler registry,
//! scheduler, and worker pool together and runs until interrupted.

use std::sync::Arc;

use tokio::sync::watch;
use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_database::connection::DatabasePool;
use jobhub_database::{JobStore, PgJobStore};
use jobhub_worker::jobs::{RetentionSweepHandler, SendEmailHandler};
use jobhub_worker::{CronScheduler, JobExecutor, JobProducer, JobQueue, WorkerPool};

#[tokio::main]
async fn main() {
    let env = std::env::var("JOBHUB_ENV").unwrap_or_else(|_| "development".to_string());

    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Worker daemon error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main daemon run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting JobHub v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Database connection + migrations ─────────────────
    let db_pool = DatabasePool::connect(&config.database).await?;
    jobhub_database::migration::run_migrations(db_pool.pool()).await?;

    // ── Step 2: Store, queue, producer ───────────────────────────
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool.pool().clone()));
    let queue = Arc::new(JobQueue::new(Arc::clone(&store), config.queue.clone()));
    let producer = Arc::new(JobProducer::new(Arc::clone(&queue)));

    // ── Step 3: Handler registry ─────────────────────────────────
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(SendEmailHandler::new()));
    executor.register(Arc::new(RetentionSweepHandler::new(
        Arc::clone(&store),
        config.queue.retention.clone(),
    )));
    let executor = Arc::new(executor);
    tracing::info!(
        job_types = ?executor.registered_types(),
        "Handler registry initialized"
    );

    // ── Step 4: Cron scheduler ───────────────────────────────────
    let mut scheduler = CronScheduler::new(Arc::clone(&producer)).await?;
    scheduler
        .register_retention_sweep(&config.queue.retention)
        .await?;
    scheduler.start().await?;

    // ── Step 5: Worker pool ──────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool_handle = if config.worker.enabled {
        let pool = WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&executor),
            config.worker.clone(),
        );
        Some(tokio::spawn(async move {
            pool.run(shutdown_rx).await;
        }))
    } else {
        tracing::info!("Worker pool disabled by configuration");
        None
    };

    // ── Step 6: Wait for shutdown signal ─────────────────────────
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Failed to listen for shutdown signal: {e}")))?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Some(handle) = pool_handle {
        let _ = handle.await;
    }
    scheduler.shutdown().await?;
    db_pool.close().await;

    tracing::info!("JobHub stopped");
    Ok(())
}
