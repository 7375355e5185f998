//! In-memory storage implementations.
//!
//! Suitable for single-process deployments and tests. Records are lost on
//! restart.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::fingerprint;
use super::session::{SessionData, SessionStorage, SessionUpdate};
use super::token::{TokenRecord, TokenStorage};
use crate::AuthResult;
use crate::error::AuthError;
use crate::types::AuthenticatedUser;

/// Token storage backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct InMemoryTokenStorage {
    tokens: RwLock<HashMap<String, TokenRecord>>,
}

impl InMemoryTokenStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    /// Returns `true` if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStorage for InMemoryTokenStorage {
    async fn store(
        &self,
        token: &str,
        user: &AuthenticatedUser,
        expires_at: Option<OffsetDateTime>,
    ) -> AuthResult<()> {
        let mut tokens = self.tokens.write().await;
        tokens.insert(
            token.to_string(),
            TokenRecord::new(user.clone(), expires_at),
        );
        tracing::debug!(token = %fingerprint(token), user_id = %user.id, "Token stored");
        Ok(())
    }

    async fn retrieve(&self, token: &str) -> AuthResult<Option<AuthenticatedUser>> {
        let tokens = self.tokens.read().await;
        let now = OffsetDateTime::now_utc();
        Ok(tokens
            .get(token)
            .filter(|record| !record.is_expired_at(now))
            .map(|record| record.user.clone()))
    }

    async fn revoke(&self, token: &str) -> AuthResult<bool> {
        let removed = self.tokens.write().await.remove(token).is_some();
        if removed {
            tracing::debug!(token = %fingerprint(token), "Token revoked");
        }
        Ok(removed)
    }

    async fn cleanup(&self) -> AuthResult<usize> {
        let mut tokens = self.tokens.write().await;
        let now = OffsetDateTime::now_utc();
        let before = tokens.len();
        tokens.retain(|_, record| !record.is_expired_at(now));
        Ok(before - tokens.len())
    }
}

/// Session storage backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct InMemorySessionStorage {
    sessions: RwLock<HashMap<String, SessionData>>,
}

impl InMemorySessionStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn create(&self, session: &SessionData) -> AuthResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(AuthError::storage(format!(
                "Session already exists: {}",
                fingerprint(&session.id)
            )));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> AuthResult<Option<SessionData>> {
        let mut sessions = self.sessions.write().await;
        let now = OffsetDateTime::now_utc();
        match sessions.get_mut(id) {
            Some(session) if !session.is_expired_at(now) => {
                session.last_accessed_at = now;
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update(&self, id: &str, update: SessionUpdate) -> AuthResult<Option<SessionData>> {
        let mut sessions = self.sessions.write().await;
        let now = OffsetDateTime::now_utc();
        match sessions.get_mut(id) {
            Some(session) if !session.is_expired_at(now) => {
                update.apply(session);
                session.last_accessed_at = now;
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn destroy(&self, id: &str) -> AuthResult<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn cleanup(&self) -> AuthResult<usize> {
        let mut sessions = self.sessions.write().await;
        let now = OffsetDateTime::now_utc();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired_at(now));
        Ok(before - sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::Duration;
    use tokio_test::block_on;

    fn user() -> AuthenticatedUser {
        AuthenticatedUser::new("u1").with_username("alice")
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let storage = InMemoryTokenStorage::new();
        storage.store("tok-1", &user(), None).await.unwrap();

        let found = storage.retrieve("tok-1").await.unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert!(storage.retrieve("tok-2").await.unwrap().is_none());
    }

    #[test]
    fn test_store_overwrites_previous_record() {
        let storage = InMemoryTokenStorage::new();
        block_on(async {
            storage.store("tok-1", &user(), None).await.unwrap();
            storage
                .store("tok-1", &AuthenticatedUser::new("u2"), None)
                .await
                .unwrap();

            assert_eq!(storage.len().await, 1);
            let found = storage.retrieve("tok-1").await.unwrap().unwrap();
            assert_eq!(found.id, "u2");
        });
    }

    #[tokio::test]
    async fn test_expired_token_is_never_returned() {
        let storage = InMemoryTokenStorage::new();
        let past = OffsetDateTime::now_utc() - Duration::seconds(1);
        storage.store("tok-1", &user(), Some(past)).await.unwrap();

        assert!(storage.retrieve("tok-1").await.unwrap().is_none());
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_revoke() {
        let storage = InMemoryTokenStorage::new();
        storage.store("tok-1", &user(), None).await.unwrap();

        assert!(storage.revoke("tok-1").await.unwrap());
        assert!(storage.retrieve("tok-1").await.unwrap().is_none());
        assert!(!storage.revoke("tok-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_token_cleanup_removes_only_expired() {
        let storage = InMemoryTokenStorage::new();
        let now = OffsetDateTime::now_utc();
        storage
            .store("old", &user(), Some(now - Duration::minutes(5)))
            .await
            .unwrap();
        storage
            .store("fresh", &user(), Some(now + Duration::minutes(5)))
            .await
            .unwrap();
        storage.store("forever", &user(), None).await.unwrap();

        assert_eq!(storage.cleanup().await.unwrap(), 1);
        assert_eq!(storage.cleanup().await.unwrap(), 0);
        assert_eq!(storage.len().await, 2);
        assert!(storage.retrieve("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let storage = InMemorySessionStorage::new();
        let session = SessionData::new("s1", user(), None).with_data("cart", json!(3));
        storage.create(&session).await.unwrap();

        let first = storage.get("s1").await.unwrap().unwrap();
        assert_eq!(first.data.get("cart"), Some(&json!(3)));
        assert!(first.last_accessed_at >= session.last_accessed_at);

        let updated = storage
            .update("s1", SessionUpdate::default().set("cart", json!(4)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.data.get("cart"), Some(&json!(4)));

        assert!(storage.destroy("s1").await.unwrap());
        assert!(storage.get("s1").await.unwrap().is_none());
        assert!(!storage.destroy("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_session_is_rejected() {
        let storage = InMemorySessionStorage::new();
        let session = SessionData::new("s1", user(), None);
        storage.create(&session).await.unwrap();
        assert!(storage.create(&session).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_session() {
        let storage = InMemorySessionStorage::new();
        let now = OffsetDateTime::now_utc();
        storage
            .create(&SessionData::new("old", user(), Some(now - Duration::seconds(1))))
            .await
            .unwrap();
        storage
            .create(&SessionData::new("new", user(), Some(now + Duration::hours(1))))
            .await
            .unwrap();

        assert!(storage.get("old").await.unwrap().is_none());
        assert!(
            storage
                .update("old", SessionUpdate::default())
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(storage.cleanup().await.unwrap(), 1);
        assert_eq!(storage.len().await, 1);
    }
}
