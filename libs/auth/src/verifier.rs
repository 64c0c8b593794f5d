//! Combined bearer-token verification

use crate::api_key::verify_api_key;
use crate::error::{AuthError, AuthResult};
use crate::oidc::OidcVerifier;

/// How a request authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    Oidc,
}

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Stable subject: "platform" for the API key, the token sub otherwise
    pub subject: String,
    pub method: AuthMethod,
}

/// Verifies `Authorization: Bearer` tokens against the configured API key
/// hash and/or OIDC issuer.
pub struct TokenVerifier {
    api_key_hash: Option<String>,
    oidc: Option<OidcVerifier>,
}

impl TokenVerifier {
    /// Create a verifier; either method (or both) may be configured.
    #[must_use]
    pub fn new(api_key_hash: Option<String>, oidc: Option<OidcVerifier>) -> Self {
        Self { api_key_hash, oidc }
    }

    /// Whether any verification method is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key_hash.is_some() || self.oidc.is_some()
    }

    /// Verify a bearer token. API keys are checked first (a cheap hash
    /// compare), then OIDC.
    pub fn verify(&self, token: &str) -> AuthResult<Principal> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        if !self.is_configured() {
            return Err(AuthError::NotConfigured);
        }

        if let Some(hash) = &self.api_key_hash {
            if verify_api_key(token, hash) {
                return Ok(Principal {
                    subject: "platform".to_string(),
                    method: AuthMethod::ApiKey,
                });
            }
        }

        if let Some(oidc) = &self.oidc {
            let claims = oidc.verify(token)?;
            return Ok(Principal {
                subject: claims.email.unwrap_or(claims.sub),
                method: AuthMethod::Oidc,
            });
        }

        Err(AuthError::InvalidToken {
            reason: "token does not match the configured API key".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_key::generate_api_key;

    #[test]
    fn test_api_key_path() {
        let (key, hash) = generate_api_key();
        let verifier = TokenVerifier::new(Some(hash), None);

        let principal = verifier.verify(&key).unwrap();
        assert_eq!(principal.method, AuthMethod::ApiKey);
        assert_eq!(principal.subject, "platform");

        assert!(matches!(
            verifier.verify("cdk_nope").unwrap_err(),
            AuthError::InvalidToken { .. }
        ));
    }

    #[test]
    fn test_unconfigured_verifier_rejects() {
        let verifier = TokenVerifier::new(None, None);
        assert!(matches!(
            verifier.verify("anything").unwrap_err(),
            AuthError::NotConfigured
        ));
    }

    #[test]
    fn test_empty_token_is_missing() {
        let (_, hash) = generate_api_key();
        let verifier = TokenVerifier::new(Some(hash), None);
        assert!(matches!(
            verifier.verify("").unwrap_err(),
            AuthError::MissingToken
        ));
    }
}
