//! Platform API keys
//!
//! Keys are random 32-byte values, base64url-encoded with a recognizable
//! prefix. Only the SHA-256 hash is stored or configured; verification
//! re-hashes the presented key and compares in constant time.

use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Prefix identifying Conductor API keys
pub const KEY_PREFIX: &str = "cdk_";

/// Generate a fresh API key and its storage hash.
#[must_use]
pub fn generate_api_key() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = format!(
        "{KEY_PREFIX}{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    );
    let hash = hash_api_key(&key);
    (key, hash)
}

/// SHA-256 hash of a key, base64-encoded, as stored in configuration.
#[must_use]
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Compare a presented key against a stored hash in constant time.
#[must_use]
pub fn verify_api_key(presented: &str, stored_hash: &str) -> bool {
    let presented_hash = hash_api_key(presented);
    constant_time_eq(presented_hash.as_bytes(), stored_hash.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_verifies() {
        let (key, hash) = generate_api_key();
        assert!(key.starts_with(KEY_PREFIX));
        assert!(verify_api_key(&key, &hash));
        assert!(!verify_api_key("cdk_wrong", &hash));
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_api_key("abc"), hash_api_key("abc"));
        assert_ne!(hash_api_key("abc"), hash_api_key("abd"));
    }

    #[test]
    fn test_keys_are_unique() {
        let (a, _) = generate_api_key();
        let (b, _) = generate_api_key();
        assert_ne!(a, b);
    }
}
