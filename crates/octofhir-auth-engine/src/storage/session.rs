//! Session storage.
//!
//! Sessions bind an opaque id to an identity plus free-form data. Reads
//! refresh `last_accessed_at`; expired sessions are never returned.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::AuthenticatedUser;

/// A stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    /// Session id.
    pub id: String,

    /// Identity bound to the session.
    pub user: AuthenticatedUser,

    /// Free-form session attributes.
    #[serde(default)]
    pub data: HashMap<String, Value>,

    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Time of the last successful read.
    #[serde(with = "time::serde::rfc3339")]
    pub last_accessed_at: OffsetDateTime,

    /// Expiry. `None` means the session never expires.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl SessionData {
    /// Creates a session stamped with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        user: AuthenticatedUser,
        expires_at: Option<OffsetDateTime>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            user,
            data: HashMap::new(),
            created_at: now,
            last_accessed_at: now,
            expires_at,
        }
    }

    /// Adds a session attribute.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns `true` if the session is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Partial update applied to an existing session.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    /// Replacement identity.
    pub user: Option<AuthenticatedUser>,

    /// Attributes merged into the session data. `null` removes a key.
    pub data: HashMap<String, Value>,

    /// New expiry.
    pub expires_at: Option<OffsetDateTime>,
}

impl SessionUpdate {
    /// Replaces the identity.
    #[must_use]
    pub fn user(mut self, user: AuthenticatedUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Sets or removes (`null`) an attribute.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Moves the expiry.
    #[must_use]
    pub fn expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub(crate) fn apply(self, session: &mut SessionData) {
        if let Some(user) = self.user {
            session.user = user;
        }
        for (key, value) in self.data {
            if value.is_null() {
                session.data.remove(&key);
            } else {
                session.data.insert(key, value);
            }
        }
        if let Some(expires_at) = self.expires_at {
            session.expires_at = Some(expires_at);
        }
    }
}

/// Storage for sessions.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Stores a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if a session with the same id already exists.
    async fn create(&self, session: &SessionData) -> AuthResult<()>;

    /// Returns a live session and refreshes its `last_accessed_at`.
    async fn get(&self, id: &str) -> AuthResult<Option<SessionData>>;

    /// Applies a partial update. Returns the updated session, or `None` if
    /// the session does not exist or has expired.
    async fn update(&self, id: &str, update: SessionUpdate) -> AuthResult<Option<SessionData>>;

    /// Destroys a session. Returns `true` if a session was removed.
    async fn destroy(&self, id: &str) -> AuthResult<bool>;

    /// Removes expired sessions and returns how many were removed.
    async fn cleanup(&self) -> AuthResult<usize>;
}
