//! Opaque Bearer token authentication.
//!
//! Tokens are resolved through [`TokenStorage`]. Statically configured
//! tokens are checked first and never expire.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::CredentialStrategy;
use super::base::{StrategyBase, parse_bearer};
use super::basic::identity_user;
use crate::AuthResult;
use crate::config::{BearerConfig, PermissionsConfig, StaticIdentity};
use crate::error::{AuthError, TokenErrorCode};
use crate::policy::PermissionEvaluator;
use crate::storage::{TokenStorage, fingerprint};
use crate::types::{
    AuthRequest, AuthenticatedUser, ChallengeResponse, CredentialType, RequestContext, TokenInfo,
};

const INVALID_TOKEN: &str = "Invalid or expired token";

/// Strategy for opaque `Authorization: Bearer` tokens.
pub struct BearerStrategy {
    base: StrategyBase,
    storage: Arc<dyn TokenStorage>,
    static_tokens: HashMap<String, StaticIdentity>,
}

impl BearerStrategy {
    /// Creates a strategy named `bearer` with priority 200.
    #[must_use]
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            base: StrategyBase::new("bearer", 200),
            storage,
            static_tokens: HashMap::new(),
        }
    }

    /// Builds the strategy from configuration.
    #[must_use]
    pub fn from_config(
        config: &BearerConfig,
        permissions: &PermissionsConfig,
        storage: Arc<dyn TokenStorage>,
    ) -> Self {
        let base = StrategyBase::new("bearer", config.priority)
            .with_enabled(config.enabled)
            .with_permissions_config(permissions)
            .with_scope(&config.scope);
        Self {
            base,
            storage,
            static_tokens: config.static_tokens.clone(),
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

    /// Adds a static token.
    #[must_use]
    pub fn with_static_token(mut self, token: impl Into<String>, identity: StaticIdentity) -> Self {
        self.static_tokens.insert(token.into(), identity);
        self
    }

    /// The shared base.
    #[must_use]
    pub fn base(&self) -> &StrategyBase {
        &self.base
    }
}

#[async_trait]
impl CredentialStrategy for BearerStrategy {
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
        self.base.applies_to(request) && request.authorization().and_then(parse_bearer).is_some()
    }

    async fn authenticate(
        &self,
        request: &AuthRequest,
        _context: &RequestContext,
    ) -> AuthResult<AuthenticatedUser> {
        let token = request
            .authorization()
            .and_then(parse_bearer)
            .ok_or_else(|| AuthError::token(TokenErrorCode::Missing, "No token provided"))?;

        let user = match self.static_tokens.get(token) {
            Some(identity) => Some(identity_user(&identity_key(identity, token), identity)),
            None => self.storage.retrieve(token).await?,
        };

        let Some(mut user) = user else {
            tracing::debug!(token = %fingerprint(token), "Bearer token not found");
            return Err(AuthError::token(TokenErrorCode::Unknown, INVALID_TOKEN));
        };

        if user.token_info.is_none() {
            user.token_info = Some(TokenInfo::new(CredentialType::Bearer, token));
        }
        Ok(self.base.enrich(user))
    }

    fn challenge(&self, _request: &AuthRequest) -> ChallengeResponse {
        ChallengeResponse::new("Bearer", self.base.realm(), "Bearer token required")
    }
}

fn identity_key(identity: &StaticIdentity, token: &str) -> String {
    identity
        .id
        .clone()
        .unwrap_or_else(|| format!("token-{}", fingerprint(token)))
}
