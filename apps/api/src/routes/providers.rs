//! Provider registry endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use conductor_providers::{load_sources, ProviderManifest};

use crate::state::AppState;
use crate::ApiError;

/// Summary view of a provider
#[derive(Debug, Serialize)]
pub struct ProviderSummary {
    pub name: String,
    pub version: Option<String>,
    pub category: Option<String>,
    pub resource_types: Vec<String>,
    pub workflows: Vec<String>,
}

impl From<&ProviderManifest> for ProviderSummary {
    fn from(manifest: &ProviderManifest) -> Self {
        Self {
            name: manifest.metadata.name.clone(),
            version: manifest.metadata.version.clone(),
            category: manifest.metadata.category.clone(),
            resource_types: manifest.capabilities.resource_types.clone(),
            workflows: manifest
                .workflows
                .iter()
                .map(|w| w.spec.name.clone())
                .collect(),
        }
    }
}

/// List loaded providers
async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderSummary>> {
    let providers = state.registry.providers().await;
    Json(providers.iter().map(|m| ProviderSummary::from(m.as_ref())).collect())
}

/// Reload provider manifests from the configured sources.
///
/// The swap is atomic: a failed load or validation leaves the current
/// registry serving and returns the error.
async fn reload_providers(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let manifests = load_sources(
        &state.provider_sources.paths,
        &state.provider_sources.git_sources,
    )
    .await
    .map_err(|e| ApiError::Validation(e.to_string()))?;

    let count = manifests.len();
    state.registry.reload(manifests).await?;
    Ok(Json(serde_json::json!({"reloaded": count})))
}

/// Full manifest for one provider
async fn get_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProviderManifest>, ApiError> {
    let manifest = state.registry.provider(&name).await?;
    Ok(Json(manifest.as_ref().clone()))
}

/// Build provider routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_providers))
        .route("/reload", post(reload_providers))
        .route("/{name}", get(get_provider))
}
