//! Token support.
//!
//! - [`jwks`] - remote signing-key cache used by the JWT strategy

pub mod jwks;

pub use jwks::{JwksCache, JwksCacheConfig, JwksError, ResolvedKey};
