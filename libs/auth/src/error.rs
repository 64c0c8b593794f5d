//! Authentication error types.

/// Authentication result type alias.
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication errors covering token and configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No authentication token provided in request.
    #[error("authentication token missing")]
    MissingToken,

    /// Token is malformed or has an invalid signature.
    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },

    /// Token has expired (exp claim in the past).
    #[error("token has expired")]
    TokenExpired,

    /// No verification method is configured.
    #[error("no API key or OIDC issuer configured")]
    NotConfigured,
}
