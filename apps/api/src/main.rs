//! Conductor Server - Main entry point
//!
//! Serves the HTTP API and, by default, an embedded worker pool sharing
//! the in-process event bus so streaming clients observe executions live.
//! Deployments with dedicated workers disable the embedded pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use conductor_api::state::ProviderSources;
use conductor_api::{routes, AppState};
use conductor_auth::{hash_api_key, OidcVerifier, TokenVerifier};
use conductor_common::{init_tracing, Settings};
use conductor_db::repo::{
    PgApplicationRepository, PgEventRepository, PgExecutionRepository, PgQueueRepository,
    PgResourceRepository,
};
use conductor_engine::executor::ExecutorRegistry;
use conductor_engine::graph::GraphProjector;
use conductor_engine::runner::{RunnerConfig, WorkflowRunner};
use conductor_engine::{EventBus, QueueConsumer};
use conductor_providers::{build_registry, Resolver};

/// OpenAPI document served at /swagger-ui
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Conductor API",
        description = "Platform orchestration engine for Score specs"
    ),
    tags(
        (name = "specs", description = "Spec submission and applications"),
        (name = "workflows", description = "Workflow executions"),
        (name = "resources", description = "Provisioned resources"),
        (name = "providers", description = "Provider registry"),
        (name = "graph", description = "Application graph"),
        (name = "events", description = "Lifecycle event stream")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let settings = Settings::load().context("loading configuration")?;

    // Database and repositories
    let pool = conductor_db::connect(&settings.database.url, settings.database.max_connections)
        .await
        .context("connecting to postgres")?;
    conductor_db::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let apps = Arc::new(PgApplicationRepository::new(pool.clone()));
    let executions = Arc::new(PgExecutionRepository::new(pool.clone()));
    let resources = Arc::new(PgResourceRepository::new(pool.clone()));
    let queue = Arc::new(PgQueueRepository::new(pool.clone()));
    let events = Arc::new(PgEventRepository::new(pool.clone()));
    let bus = Arc::new(EventBus::new());

    // Provider registry from configured sources
    let registry = Arc::new(
        build_registry(
            &settings.providers.paths,
            &settings.providers.git_sources,
            settings.providers.defaults.clone(),
        )
        .await
        .context("building provider registry")?,
    );

    // Authentication
    let api_key_hash = settings
        .auth
        .api_key_hash
        .clone()
        .or_else(|| settings.auth.api_key.as_deref().map(hash_api_key));
    let oidc = match (&settings.auth.oidc_issuer, &settings.auth.oidc_secret) {
        (Some(issuer), Some(secret)) => Some(OidcVerifier::new(
            issuer,
            settings.auth.oidc_audience.as_deref(),
            secret,
        )),
        _ => None,
    };
    let verifier = Arc::new(TokenVerifier::new(api_key_hash, oidc));
    if !verifier.is_configured() {
        tracing::warn!("no API key or OIDC issuer configured; /api is unauthenticated");
    }

    let projector = Arc::new(GraphProjector::new(
        apps.clone(),
        executions.clone(),
        resources.clone(),
    ));

    let state = AppState {
        apps,
        executions: executions.clone(),
        resources: resources.clone(),
        queue: queue.clone(),
        bus: Arc::clone(&bus),
        registry: Arc::clone(&registry),
        provider_sources: ProviderSources {
            paths: settings.providers.paths.clone(),
            git_sources: settings.providers.git_sources.clone(),
        },
        projector,
        verifier,
        pool: Some(pool),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if settings.worker.embedded {
        spawn_embedded_workers(
            &settings,
            executions,
            resources,
            queue,
            events,
            bus,
            registry,
            shutdown_rx,
        );
    }

    // Build the application
    let app = routes::api_routes(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start the server
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("invalid server address")?;
    tracing::info!("Starting Conductor server on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        settings.server.port
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_tx.send(true).ok();
        })
        .await?;

    Ok(())
}

/// Queue consumers sharing this process's event bus.
#[allow(clippy::too_many_arguments)]
fn spawn_embedded_workers(
    settings: &Settings,
    executions: Arc<PgExecutionRepository>,
    resources: Arc<PgResourceRepository>,
    queue: Arc<PgQueueRepository>,
    events: Arc<PgEventRepository>,
    bus: Arc<EventBus>,
    registry: Arc<conductor_providers::ProviderRegistry>,
    shutdown: watch::Receiver<bool>,
) {
    let resolver = Arc::new(Resolver::new(registry, resources.clone()));
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

    for worker_index in 0..settings.worker.pool_size {
        let consumer = Arc::clone(&consumer);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tracing::debug!(worker_index, "embedded worker started");
            consumer.run_worker(shutdown).await;
        });
    }
    tokio::spawn(async move {
        consumer.run_reclaimer(shutdown).await;
    });
}
