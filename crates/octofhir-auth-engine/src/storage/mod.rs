//! Token and session storage.
//!
//! The manager and the Bearer / Session strategies only depend on the
//! [`TokenStorage`] and [`SessionStorage`] traits. In-memory implementations
//! are provided for single-process deployments; durable backends plug in by
//! implementing the traits.

pub mod memory;
pub mod session;
pub mod token;

pub use memory::{InMemorySessionStorage, InMemoryTokenStorage};
pub use session::{SessionData, SessionStorage, SessionUpdate};
pub use token::{TokenRecord, TokenStorage};

use sha2::{Digest, Sha256};

/// Short, non-reversible fingerprint of a secret for log output.
#[must_use]
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = fingerprint("secret-token");
        assert_eq!(a, fingerprint("secret-token"));
        assert_eq!(a.len(), 12);
        assert_ne!(a, fingerprint("other-token"));
        assert!(!a.contains("secret"));
    }
}
