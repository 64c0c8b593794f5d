//! API route definitions

mod events;
mod graph;
mod health;
mod providers;
mod resources;
mod specs;
mod workflows;

use axum::{middleware::from_fn_with_state, Router};

use crate::middleware::auth_middleware;
use crate::state::AppState;
use crate::ws;

/// Build the full router: health endpoints are open, everything under
/// `/api` requires a bearer token.
pub fn api_routes(state: AppState) -> Router {
    let api = Router::new()
        .nest("/specs", specs::routes())
        .nest("/workflows", workflows::routes())
        .nest("/resources", resources::routes())
        .nest("/providers", providers::routes())
        .nest("/graph", graph::routes().merge(ws::routes()))
        .nest("/events", events::routes())
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(health::routes())
        .nest("/api", api)
        .with_state(state)
}
