//! Conductor Worker
//!
//! Dedicated queue consumer for scaled deployments: a pool of consumers
//! claims tasks under leases, a reclaimer returns stale-leased tasks, and
//! ctrl-c drains in-flight executions through cancellation. Live events
//! emitted here reach streaming clients via the durable event table; the
//! API server's embedded pool is the default single-process setup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;

use conductor_common::{init_tracing, Settings};
use conductor_db::repo::{
    PgEventRepository, PgExecutionRepository, PgQueueRepository, PgResourceRepository,
};
use conductor_engine::executor::ExecutorRegistry;
use conductor_engine::runner::{RunnerConfig, WorkflowRunner};
use conductor_engine::{EventBus, QueueConsumer};
use conductor_providers::{build_registry, Resolver};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let settings = Settings::load().context("loading configuration")?;
    tracing::info!(pool_size = settings.worker.pool_size, "Starting Conductor worker");

    let pool = conductor_db::connect(&settings.database.url, settings.database.max_connections)
        .await
        .context("connecting to postgres")?;
    conductor_db::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let executions = Arc::new(PgExecutionRepository::new(pool.clone()));
    let resources = Arc::new(PgResourceRepository::new(pool.clone()));
    let queue = Arc::new(PgQueueRepository::new(pool.clone()));
    let events = Arc::new(PgEventRepository::new(pool.clone()));
    let bus = Arc::new(EventBus::new());

    let registry = Arc::new(
        build_registry(
            &settings.providers.paths,
            &settings.providers.git_sources,
            settings.providers.defaults.clone(),
        )
        .await
        .context("building provider registry")?,
    );
    let resolver = Arc::new(Resolver::new(registry, resources.clone()));

    // External provisioner executors register here next to the builtins.
    let executors = Arc::new(ExecutorRegistry::with_builtins());

    let runner = WorkflowRunner::new(
        executions,
        resources,
        Some(events.clone() as Arc<dyn conductor_db::repo::EventRepository>),
        Arc::clone(&bus),
        executors,
        RunnerConfig {
            max_step_concurrency: settings.worker.max_step_concurrency,
            default_step_timeout: Duration::from_secs(settings.worker.step_timeout_minutes * 60),
            execution_timeout: Duration::from_secs(settings.worker.execution_timeout_minutes * 60),
            ..RunnerConfig::default()
        },
    );

    let consumer = Arc::new(QueueConsumer::new(
        queue,
        runner,
        resolver,
        bus,
        Some(events as Arc<dyn conductor_db::repo::EventRepository>),
        chrono::Duration::seconds(settings.worker.lease_seconds),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::new();
    for worker_index in 0..settings.worker.pool_size {
        let consumer = Arc::clone(&consumer);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            tracing::debug!(worker_index, "worker started");
            consumer.run_worker(shutdown).await;
        }));
    }
    {
        let consumer = Arc::clone(&consumer);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            consumer.run_reclaimer(shutdown).await;
        }));
    }

    tracing::info!("Worker started. Waiting for tasks...");
    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    tracing::info!("Shutting down worker...");
    shutdown_tx.send(true).ok();

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
