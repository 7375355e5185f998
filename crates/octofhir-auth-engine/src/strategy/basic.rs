//! HTTP Basic authentication.
//!
//! Credentials are checked against configured users (plaintext or argon2
//! PHC hashes) and, failing that, an optional external validator.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use serde_json::Value;

use super::CredentialStrategy;
use super::base::{StrategyBase, has_scheme, parse_basic};
use crate::AuthResult;
use crate::config::{BasicConfig, BasicUser, PermissionsConfig, StaticIdentity};
use crate::error::AuthError;
use crate::policy::PermissionEvaluator;
use crate::types::{AuthRequest, AuthenticatedUser, ChallengeResponse, RequestContext};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// External username/password check, e.g. against a user store.
#[async_trait]
pub trait BasicCredentialValidator: Send + Sync {
    /// Returns the user for valid credentials, `None` otherwise.
    async fn validate(&self, username: &str, password: &str)
    -> AuthResult<Option<AuthenticatedUser>>;
}

/// Strategy for `Authorization: Basic` credentials.
pub struct BasicStrategy {
    base: StrategyBase,
    users: HashMap<String, BasicUser>,
    validator: Option<Arc<dyn BasicCredentialValidator>>,
}

impl Default for BasicStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicStrategy {
    /// Creates a strategy named `basic` with priority 100 and no users.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: StrategyBase::new("basic", 100),
            users: HashMap::new(),
            validator: None,
        }
    }

    /// Builds the strategy from configuration.
    #[must_use]
    pub fn from_config(config: &BasicConfig, permissions: &PermissionsConfig) -> Self {
        let base = StrategyBase::new("basic", config.priority)
            .with_enabled(config.enabled)
            .with_permissions_config(permissions)
            .with_scope(&config.scope);
        Self {
            base,
            users: config.users.clone(),
            validator: None,
        }
    }

    /// Replaces the shared base (name, priority, scope, floor).
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

    /// Adds a user with a plaintext password or argon2 hash.
    #[must_use]
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(
            username.into(),
            BasicUser {
                password: password.into(),
                identity: StaticIdentity::default(),
            },
        );
        self
    }

    /// Adds a user with identity details.
    #[must_use]
    pub fn with_user_entry(mut self, username: impl Into<String>, user: BasicUser) -> Self {
        self.users.insert(username.into(), user);
        self
    }

    /// Sets the external validator consulted for unknown users.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn BasicCredentialValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// The shared base.
    #[must_use]
    pub fn base(&self) -> &StrategyBase {
        &self.base
    }

    fn configured_user(&self, username: &str, password: &str) -> Option<AuthenticatedUser> {
        let entry = self.users.get(username)?;
        if !verify_password(&entry.password, password) {
            return None;
        }
        Some(identity_user(username, &entry.identity))
    }
}

/// Builds a user from a configured identity keyed by `key`.
pub(crate) fn identity_user(key: &str, identity: &StaticIdentity) -> AuthenticatedUser {
    let mut user = AuthenticatedUser::new(identity.id.clone().unwrap_or_else(|| key.to_string()))
        .with_roles(identity.roles.iter().cloned());
    user.username = identity
        .username
        .clone()
        .or_else(|| identity.id.is_none().then(|| key.to_string()));
    user.email = identity.email.clone();
    user.permissions = identity.permissions.clone();
    user
}

fn verify_password(stored: &str, presented: &str) -> bool {
    if stored.starts_with("$argon2") {
        return match PasswordHash::new(stored) {
            Ok(hash) => Argon2::default()
                .verify_password(presented.as_bytes(), &hash)
                .is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash is malformed");
                false
            }
        };
    }
    constant_time_eq(stored.as_bytes(), presented.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl CredentialStrategy for BasicStrategy {
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
        self.base.applies_to(request)
            && request
                .authorization()
                .is_some_and(|h| has_scheme(h, "Basic"))
    }

    async fn authenticate(
        &self,
        request: &AuthRequest,
        _context: &RequestContext,
    ) -> AuthResult<AuthenticatedUser> {
        let header = request
            .authorization()
            .ok_or_else(|| AuthError::unauthorized("No credentials provided"))?;
        let (username, password) = parse_basic(header)?;

        if let Some(user) = self.configured_user(&username, &password) {
            tracing::debug!(username = %username, "Basic credentials accepted");
            return Ok(self.base.enrich(user));
        }

        if let Some(validator) = &self.validator
            && let Some(user) = validator.validate(&username, &password).await?
        {
            tracing::debug!(username = %username, "Basic credentials accepted by validator");
            return Ok(self.base.enrich(user));
        }

        tracing::debug!(username = %username, "Basic credentials rejected");
        Err(AuthError::unauthorized(INVALID_CREDENTIALS))
    }

    fn challenge(&self, _request: &AuthRequest) -> ChallengeResponse {
        ChallengeResponse::new("Basic", self.base.realm(), "Authentication required")
            .with_charset()
    }
}
