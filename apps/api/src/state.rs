//! Shared application state

use std::sync::Arc;

use conductor_auth::TokenVerifier;
use conductor_db::repo::{
    ApplicationRepository, ExecutionRepository, QueueRepository, ResourceRepository,
};
use conductor_engine::graph::GraphProjector;
use conductor_engine::EventBus;
use conductor_providers::ProviderRegistry;

/// Where provider manifests are loaded from, kept for explicit reloads.
#[derive(Clone, Default)]
pub struct ProviderSources {
    pub paths: Vec<String>,
    pub git_sources: Vec<String>,
}

/// Everything the handlers need, cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub apps: Arc<dyn ApplicationRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub resources: Arc<dyn ResourceRepository>,
    pub queue: Arc<dyn QueueRepository>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<ProviderRegistry>,
    pub provider_sources: ProviderSources,
    pub projector: Arc<GraphProjector>,
    pub verifier: Arc<TokenVerifier>,
    /// Postgres pool for readiness probes; absent when running on the
    /// in-memory store
    pub pool: Option<sqlx::PgPool>,
}
