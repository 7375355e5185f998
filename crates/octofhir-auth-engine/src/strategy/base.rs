//! Behaviour shared by every credential strategy.
//!
//! Concrete strategies hold a [`StrategyBase`] and delegate to it for path
//! scoping, default permissions and permission checks. Credential parsing
//! and attempt auditing live here as free functions.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::Value;

use crate::audit::{AuditEvent, AuditEventType};
use crate::config::{DEFAULT_REALM, PermissionsConfig, StrategyScope};
use crate::error::AuthError;
use crate::paths::PathScope;
use crate::policy::PermissionEvaluator;
use crate::types::{AuthRequest, AuthenticatedUser, FhirPermissions};

/// Common state of a strategy.
#[derive(Debug, Clone)]
pub struct StrategyBase {
    name: String,
    priority: i32,
    enabled: bool,
    realm: String,
    scope: PathScope,
    default_permissions: FhirPermissions,
    default_roles: Vec<String>,
    evaluator: Arc<PermissionEvaluator>,
}

impl StrategyBase {
    /// Creates an enabled, unscoped base with the read-only floor.
    #[must_use]
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            realm: DEFAULT_REALM.to_string(),
            scope: PathScope::default(),
            default_permissions: FhirPermissions::read_only(),
            default_roles: vec!["user".to_string()],
            evaluator: Arc::new(PermissionEvaluator::new()),
        }
    }

    /// Applies a configuration section's scope and realm.
    #[must_use]
    pub fn with_scope(mut self, scope: &StrategyScope) -> Self {
        self.scope = PathScope::new(&scope.only_paths, &scope.skip_paths);
        if let Some(realm) = &scope.realm {
            self.realm = realm.clone();
        }
        self
    }

    /// Applies the permission floor and evaluator settings.
    #[must_use]
    pub fn with_permissions_config(mut self, config: &PermissionsConfig) -> Self {
        self.default_permissions = config.default_permissions.clone();
        self.default_roles = config.default_roles.clone();
        self.evaluator = Arc::new(
            PermissionEvaluator::new().with_array_index_fallback(config.array_index_fallback),
        );
        self
    }

    /// Enables or disables the strategy.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the challenge realm.
    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Overrides the permission floor.
    #[must_use]
    pub fn with_default_permissions(mut self, permissions: FhirPermissions) -> Self {
        self.default_permissions = permissions;
        self
    }

    /// Overrides the default roles.
    #[must_use]
    pub fn with_default_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the permission evaluator.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<PermissionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Strategy name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatch priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether the strategy takes part in dispatch.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Challenge realm.
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// The evaluator used by [`has_permission`](Self::has_permission).
    #[must_use]
    pub fn evaluator(&self) -> &Arc<PermissionEvaluator> {
        &self.evaluator
    }

    /// Returns `true` if the request path is in this strategy's scope.
    #[must_use]
    pub fn applies_to(&self, request: &AuthRequest) -> bool {
        self.scope.allows(&request.path)
    }

    /// Fills in the permission floor and default roles.
    ///
    /// Explicit permissions and roles are left untouched.
    #[must_use]
    pub fn enrich(&self, mut user: AuthenticatedUser) -> AuthenticatedUser {
        if user.permissions.is_none() {
            user.permissions = Some(self.default_permissions.clone());
        }
        if user.roles.is_empty() {
            user.roles = self.default_roles.iter().cloned().collect();
        }
        user
    }

    /// Checks a permission for a user, optionally against resource data.
    #[must_use]
    pub fn has_permission(
        &self,
        user: &AuthenticatedUser,
        resource_type: &str,
        operation: &str,
        resource: Option<&Value>,
    ) -> bool {
        self.evaluator
            .check(Some(user), resource_type, operation, resource)
    }
}

/// Emits the audit record of one strategy attempt.
pub fn audit_attempt(
    strategy: &str,
    request: &AuthRequest,
    outcome: Result<&AuthenticatedUser, &AuthError>,
    elapsed: Duration,
) {
    let event = AuditEvent::new(AuditEventType::StrategyAttempt, strategy, outcome.is_ok())
        .path(request.path.clone())
        .duration_ms(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    let event = match outcome {
        Ok(user) => event.user(user.id.clone(), user.username.clone()),
        Err(err) => event.error(err.message()),
    };
    event.emit();
}

/// Returns `true` if the header uses the given scheme (case-insensitive).
#[must_use]
pub fn has_scheme(header: &str, scheme: &str) -> bool {
    strip_scheme(header, scheme).is_some()
}

fn strip_scheme<'a>(header: &'a str, scheme: &str) -> Option<&'a str> {
    let (head, rest) = header.trim_start().split_once(' ')?;
    head.eq_ignore_ascii_case(scheme).then(|| rest.trim())
}

/// Extracts the token of a `Bearer <token>` header.
#[must_use]
pub fn parse_bearer(header: &str) -> Option<&str> {
    strip_scheme(header, "Bearer").filter(|token| !token.is_empty())
}

/// Decodes `Basic <base64(user:pass)>` credentials.
///
/// The first `:` separates user and password; the password may contain
/// further colons.
pub fn parse_basic(header: &str) -> Result<(String, String), AuthError> {
    let encoded = strip_scheme(header, "Basic")
        .ok_or_else(|| AuthError::unauthorized("Authorization header must use the Basic scheme"))?;

    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| AuthError::unauthorized("Invalid base64 encoding in Basic credentials"))?;

    let credentials = String::from_utf8(decoded)
        .map_err(|_| AuthError::unauthorized("Invalid UTF-8 in Basic credentials"))?;

    let (username, password) = credentials
        .split_once(':')
        .ok_or_else(|| AuthError::unauthorized("Basic credentials must be 'username:password'"))?;

    Ok((username.to_string(), password.to_string()))
}
