//! OIDC bearer token verification
//!
//! Validates issuer-signed JWTs: signature, expiry, issuer, and (when
//! configured) audience. The platform's identity provider issues tokens
//! with a shared HS256 secret; JWKS/RS256 verification is handled by the
//! gateway in front of this service.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Claims extracted from a verified OIDC token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcClaims {
    pub sub: String,
    pub iss: String,
    pub exp: i64,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub name: Option<String>,
}

/// Verifies OIDC bearer tokens for one issuer.
pub struct OidcVerifier {
    issuer: String,
    audience: Option<String>,
    key: DecodingKey,
}

impl OidcVerifier {
    /// Create a verifier for an issuer with a shared secret.
    #[must_use]
    pub fn new(issuer: &str, audience: Option<&str>, secret: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            audience: audience.map(String::from),
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Validate a bearer token and return its claims.
    pub fn verify(&self, token: &str) -> AuthResult<OidcClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<OidcClaims>(token, &self.key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken {
                    reason: e.to_string(),
                },
            }
        })?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(issuer: &str, exp_offset: i64, secret: &str) -> String {
        let claims = OidcClaims {
            sub: "user-1".to_string(),
            iss: issuer.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
            email: Some("dev@acme.io".to_string()),
            name: None,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_verifies() {
        let verifier = OidcVerifier::new("https://idp.acme.io", None, "shh");
        let claims = verifier
            .verify(&token("https://idp.acme.io", 3600, "shh"))
            .unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email.as_deref(), Some("dev@acme.io"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = OidcVerifier::new("https://idp.acme.io", None, "shh");
        let err = verifier
            .verify(&token("https://idp.acme.io", -3600, "shh"))
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let verifier = OidcVerifier::new("https://idp.acme.io", None, "shh");
        let err = verifier
            .verify(&token("https://evil.example", 3600, "shh"))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken { .. }));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = OidcVerifier::new("https://idp.acme.io", None, "shh");
        let err = verifier
            .verify(&token("https://idp.acme.io", 3600, "other"))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken { .. }));
    }
}
