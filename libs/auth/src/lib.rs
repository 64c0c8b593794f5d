//! Authentication library for Conductor
//!
//! Bearer-token verification for the HTTP API: platform-issued API keys
//! (compared against a stored SHA-256 hash) and OIDC bearer tokens.

pub mod api_key;
pub mod error;
pub mod oidc;
pub mod verifier;

pub use api_key::{generate_api_key, hash_api_key, verify_api_key};
pub use error::{AuthError, AuthResult};
pub use oidc::{OidcClaims, OidcVerifier};
pub use verifier::{AuthMethod, Principal, TokenVerifier};
