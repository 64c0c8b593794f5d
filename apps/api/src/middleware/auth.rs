//! Authentication middleware
//!
//! Requires `Authorization: Bearer <token>` on every `/api/*` route. The
//! token is either the platform API key or an OIDC JWT. Health endpoints
//! are mounted outside this middleware.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use conductor_auth::Principal;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

/// Verify the bearer token and record the principal.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Without a configured key or issuer, requests pass as the platform
    // principal. Deployments are expected to configure at least one.
    if !state.verifier.is_configured() {
        request.extensions_mut().insert(CurrentPrincipal(Principal {
            subject: "anonymous".to_string(),
            method: conductor_auth::AuthMethod::ApiKey,
        }));
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let principal = state.verifier.verify(token).map_err(|e| {
        tracing::debug!(error = %e, "bearer token rejected");
        ApiError::Unauthorized
    })?;

    request
        .extensions_mut()
        .insert(CurrentPrincipal(principal));
    Ok(next.run(request).await)
}
