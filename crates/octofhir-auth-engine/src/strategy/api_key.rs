//! API key authentication.
//!
//! The key is read from a header (default `X-API-Key`) or, when enabled, a
//! query parameter. Header values win over query values.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::CredentialStrategy;
use super::base::StrategyBase;
use super::basic::identity_user;
use crate::AuthResult;
use crate::config::{ApiKeyConfig, PermissionsConfig, StaticIdentity};
use crate::error::AuthError;
use crate::policy::PermissionEvaluator;
use crate::storage::fingerprint;
use crate::types::{
    AuthRequest, AuthenticatedUser, ChallengeResponse, CredentialType, PLAIN_JSON, RequestContext,
    TokenInfo,
};

/// Strategy for static API keys.
pub struct ApiKeyStrategy {
    base: StrategyBase,
    header_name: String,
    query_param: Option<String>,
    keys: HashMap<String, StaticIdentity>,
}

impl Default for ApiKeyStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiKeyStrategy {
    /// Creates a strategy named `api_key` with priority 150 reading
    /// `X-API-Key`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: StrategyBase::new("api_key", 150),
            header_name: "X-API-Key".to_string(),
            query_param: None,
            keys: HashMap::new(),
        }
    }

    /// Builds the strategy from configuration.
    #[must_use]
    pub fn from_config(config: &ApiKeyConfig, permissions: &PermissionsConfig) -> Self {
        let base = StrategyBase::new("api_key", config.priority)
            .with_enabled(config.enabled)
            .with_permissions_config(permissions)
            .with_scope(&config.scope);
        Self {
            base,
            header_name: config.header_name.clone(),
            query_param: config.query_param.clone(),
            keys: config.keys.clone(),
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

    /// Sets the header carrying the key.
    #[must_use]
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Accepts the key from a query parameter as well.
    #[must_use]
    pub fn with_query_param(mut self, name: impl Into<String>) -> Self {
        self.query_param = Some(name.into());
        self
    }

    /// Registers a key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>, identity: StaticIdentity) -> Self {
        self.keys.insert(key.into(), identity);
        self
    }

    /// The shared base.
    #[must_use]
    pub fn base(&self) -> &StrategyBase {
        &self.base
    }

    fn extract<'a>(&self, request: &'a AuthRequest) -> Option<&'a str> {
        request
            .header(&self.header_name)
            .or_else(|| {
                self.query_param
                    .as_deref()
                    .and_then(|param| request.query_param(param))
            })
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

#[async_trait]
impl CredentialStrategy for ApiKeyStrategy {
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
        self.base.applies_to(request) && self.extract(request).is_some()
    }

    async fn authenticate(
        &self,
        request: &AuthRequest,
        _context: &RequestContext,
    ) -> AuthResult<AuthenticatedUser> {
        let key = self
            .extract(request)
            .ok_or_else(|| AuthError::unauthorized("No API key provided"))?;

        let Some(identity) = self.keys.get(key) else {
            tracing::debug!(key = %fingerprint(key), "Unknown API key");
            return Err(AuthError::unauthorized("Invalid API key"));
        };

        let fallback_id = format!("api-key-{}", fingerprint(key));
        let user = identity_user(&fallback_id, identity)
            .with_token_info(TokenInfo::new(CredentialType::ApiKey, key));
        Ok(self.base.enrich(user))
    }

    fn challenge(&self, _request: &AuthRequest) -> ChallengeResponse {
        ChallengeResponse::new("ApiKey", self.base.realm(), "API key required")
            .with_content_type(PLAIN_JSON)
    }
}
