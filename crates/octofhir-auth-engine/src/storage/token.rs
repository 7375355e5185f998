//! Opaque token storage.
//!
//! Maps issued tokens to the identity they were issued for. Expiry is
//! enforced at read time: an expired record is never returned, even if a
//! cleanup pass has not removed it yet.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::AuthenticatedUser;

/// A stored token and its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    /// Identity the token was issued for.
    pub user: AuthenticatedUser,

    /// When the token was stored.
    pub created_at: OffsetDateTime,

    /// Expiry. `None` means the token never expires.
    pub expires_at: Option<OffsetDateTime>,
}

impl TokenRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(user: AuthenticatedUser, expires_at: Option<OffsetDateTime>) -> Self {
        Self {
            user,
            created_at: OffsetDateTime::now_utc(),
            expires_at,
        }
    }

    /// Returns `true` if the record is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Storage for opaque tokens.
///
/// Production deployments back this with a durable store; the manager only
/// talks to the trait.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Stores a token. An existing record for the same token is replaced.
    async fn store(
        &self,
        token: &str,
        user: &AuthenticatedUser,
        expires_at: Option<OffsetDateTime>,
    ) -> AuthResult<()>;

    /// Returns the identity for a token.
    ///
    /// Returns `None` for unknown, revoked and expired tokens.
    async fn retrieve(&self, token: &str) -> AuthResult<Option<AuthenticatedUser>>;

    /// Revokes a token. Returns `true` if a record was removed.
    async fn revoke(&self, token: &str) -> AuthResult<bool>;

    /// Removes expired records and returns how many were removed.
    ///
    /// Idempotent; never touches unexpired records.
    async fn cleanup(&self) -> AuthResult<usize>;
}
