//! Session-id authentication.
//!
//! The session id comes from a cookie (default `fhir_session`) or a header
//! (default `X-Session-Id`) and is resolved through [`SessionStorage`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::CredentialStrategy;
use super::base::StrategyBase;
use crate::AuthResult;
use crate::config::{PermissionsConfig, SessionConfig};
use crate::error::AuthError;
use crate::policy::PermissionEvaluator;
use crate::storage::{SessionStorage, fingerprint};
use crate::types::{
    AuthRequest, AuthenticatedUser, ChallengeResponse, CredentialType, RequestContext, TokenInfo,
};

/// Strategy for server-side sessions.
pub struct SessionStrategy {
    base: StrategyBase,
    storage: Arc<dyn SessionStorage>,
    cookie_name: String,
    header_name: String,
}

impl SessionStrategy {
    /// Creates a strategy named `session` with priority 120.
    #[must_use]
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            base: StrategyBase::new("session", 120),
            storage,
            cookie_name: "fhir_session".to_string(),
            header_name: "X-Session-Id".to_string(),
        }
    }

    /// Builds the strategy from configuration.
    #[must_use]
    pub fn from_config(
        config: &SessionConfig,
        permissions: &PermissionsConfig,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        let base = StrategyBase::new("session", config.priority)
            .with_enabled(config.enabled)
            .with_permissions_config(permissions)
            .with_scope(&config.scope);
        Self {
            base,
            storage,
            cookie_name: config.cookie_name.clone(),
            header_name: config.header_name.clone(),
        }
    }

    /// Replaces the shared base.
    #[must_use]
    pub fn with_base(mut self, base: StrategyBase) -> Self {
        self.base = base;
        self
    }

    /// Checks permissions with a shared evaluator and its custom validators.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<PermissionEvaluator>) -> Self {
        self.base = self.base.with_evaluator(evaluator);
        self
    }

    /// Sets the cookie carrying the session id.
    #[must_use]
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Sets the header carrying the session id.
    #[must_use]
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// The shared base.
    #[must_use]
    pub fn base(&self) -> &StrategyBase {
        &self.base
    }

    fn session_id(&self, request: &AuthRequest) -> Option<String> {
        let from_cookie = (!self.cookie_name.is_empty())
            .then(|| request.cookie(&self.cookie_name))
            .flatten();
        from_cookie
            .or_else(|| {
                (!self.header_name.is_empty())
                    .then(|| request.header(&self.header_name).map(str::to_string))
                    .flatten()
            })
            .filter(|id| !id.trim().is_empty())
    }
}

#[async_trait]
impl CredentialStrategy for SessionStrategy {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn priority(&self) -> i32 {
        self.base.priority()
    }

    fn enabled(&self) -> bool {
        self.base.enabled()
    }

    fn has_permission(
        &self,
        user: &AuthenticatedUser,
        resource_type: &str,
        operation: &str,
        resource: Option<&Value>,
    ) -> bool {
        self.base
            .has_permission(user, resource_type, operation, resource)
    }

    fn can_handle(&self, request: &AuthRequest) -> bool {
        self.base.applies_to(request) && self.session_id(request).is_some()
    }

    async fn authenticate(
        &self,
        request: &AuthRequest,
        _context: &RequestContext,
    ) -> AuthResult<AuthenticatedUser> {
        let id = self
            .session_id(request)
            .ok_or_else(|| AuthError::unauthorized("No session provided"))?;

        let Some(session) = self.storage.get(&id).await? else {
            tracing::debug!(session = %fingerprint(&id), "Session not found or expired");
            return Err(AuthError::unauthorized("Invalid or expired session"));
        };

        let mut token_info = TokenInfo::new(CredentialType::Session, id.clone());
        token_info.issued_at = Some(session.created_at);
        token_info.expires_at = session.expires_at;

        let user = session
            .user
            .with_metadata("session_id", json!(id))
            .with_token_info(token_info);
        Ok(self.base.enrich(user))
    }

    fn challenge(&self, _request: &AuthRequest) -> ChallengeResponse {
        ChallengeResponse::new("Session", self.base.realm(), "Session required")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemorySessionStorage, SessionData};
    use time::{Duration, OffsetDateTime};

    async fn storage_with(session: SessionData) -> Arc<InMemorySessionStorage> {
        let storage = Arc::new(InMemorySessionStorage::new());
        storage.create(&session).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_cookie_session() {
        let storage =
            storage_with(SessionData::new("s-1", AuthenticatedUser::new("u1"), None)).await;
        let strategy = SessionStrategy::new(storage);
        let request =
            AuthRequest::new("GET", "/Patient").with_header("Cookie", "theme=dark; fhir_session=s-1");

        assert!(strategy.can_handle(&request));
        let user = strategy
            .authenticate(&request, &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.metadata.get("session_id"), Some(&json!("s-1")));
        assert_eq!(
            user.token_info.unwrap().credential_type,
            CredentialType::Session
        );
    }

    #[tokio::test]
    async fn test_header_session() {
        let storage =
            storage_with(SessionData::new("s-2", AuthenticatedUser::new("u2"), None)).await;
        let strategy = SessionStrategy::new(storage);
        let request = AuthRequest::new("GET", "/Patient").with_header("X-Session-Id", "s-2");

        let user = strategy
            .authenticate(&request, &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(user.id, "u2");
    }

    #[tokio::test]
    async fn test_expired_session_fails() {
        let storage = storage_with(SessionData::new(
            "s-3",
            AuthenticatedUser::new("u3"),
            Some(OffsetDateTime::now_utc() - Duration::seconds(1)),
        ))
        .await;
        let strategy = SessionStrategy::new(storage);
        let request = AuthRequest::new("GET", "/Patient").with_header("X-Session-Id", "s-3");

        let err = strategy
            .authenticate(&request, &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "Invalid or expired session");
    }

    #[test]
    fn test_cannot_handle_without_session() {
        let strategy = SessionStrategy::new(Arc::new(InMemorySessionStorage::new()));
        assert!(!strategy.can_handle(&AuthRequest::new("GET", "/")));
        assert!(!strategy.can_handle(&AuthRequest::new("GET", "/").with_header("Cookie", "a=b")));
    }
}
