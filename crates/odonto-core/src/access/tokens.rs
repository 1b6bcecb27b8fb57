//! One-time activation and reset tokens.
//!
//! The raw token is handed out once; only its SHA-256 digest is stored.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of a raw token.
pub fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// A fresh token and the digest to persist.
pub fn issue() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);
    let hash = digest(&token);
    (token, hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(
            digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_issue_pairs_token_with_digest() {
        let (token, hash) = issue();
        assert_eq!(token.len(), 64);
        assert_eq!(digest(&token), hash);
        assert_ne!(issue().0, token);
    }
}
