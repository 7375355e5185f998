//! Per-request authentication context.
//!
//! An [`AuthContext`] is the result of running the manager for a request.
//! Handlers use it to find out who is calling and to ask permission
//! questions without touching the evaluator directly.

use std::sync::Arc;

use serde_json::Value;

use crate::policy::{AccessDecision, PermissionEvaluator};
use crate::types::{AuthRequest, AuthenticatedUser};

/// Authenticated (or anonymous) view of one request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    request: AuthRequest,
    user: Option<Arc<AuthenticatedUser>>,
    strategy: Option<String>,
    evaluator: Arc<PermissionEvaluator>,
}

impl AuthContext {
    /// Creates a context for a request and an optional user.
    #[must_use]
    pub fn new(
        request: AuthRequest,
        user: Option<AuthenticatedUser>,
        evaluator: Arc<PermissionEvaluator>,
    ) -> Self {
        Self {
            request,
            user: user.map(Arc::new),
            strategy: None,
            evaluator,
        }
    }

    /// Context without a user. Every permission check is denied.
    #[must_use]
    pub fn anonymous(request: AuthRequest) -> Self {
        Self::new(request, None, Arc::new(PermissionEvaluator::new()))
    }

    /// Records which strategy verified the user.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// The original request.
    #[must_use]
    pub fn request(&self) -> &AuthRequest {
        &self.request
    }

    /// The verified user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&AuthenticatedUser> {
        self.user.as_deref()
    }

    /// Shared handle to the verified user.
    #[must_use]
    pub fn user_arc(&self) -> Option<Arc<AuthenticatedUser>> {
        self.user.clone()
    }

    /// Name of the strategy that verified the user.
    #[must_use]
    pub fn strategy(&self) -> Option<&str> {
        self.strategy.as_deref()
    }

    /// Returns `true` when a user is attached.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Evaluates an operation on a resource type, optionally against the
    /// resource payload.
    #[must_use]
    pub fn evaluate(
        &self,
        resource_type: &str,
        operation: &str,
        resource: Option<&Value>,
    ) -> AccessDecision {
        self.evaluator
            .evaluate(self.user(), resource_type, operation, resource)
    }

    /// Shorthand for `evaluate(..).allowed`.
    #[must_use]
    pub fn check_permission(
        &self,
        resource_type: &str,
        operation: &str,
        resource: Option<&Value>,
    ) -> bool {
        self.evaluate(resource_type, operation, resource).allowed
    }

    /// Returns `true` if the user has the role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.user().is_some_and(|u| u.has_role(role))
    }

    /// Checks a named capability (`custom`, `operations`, then the global
    /// gates).
    #[must_use]
    pub fn has_permission(&self, name: &str) -> bool {
        self.evaluator.has_named_permission(self.user(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, ConditionOperator, FhirPermissions, ResourcePermission};
    use serde_json::json;

    fn context(user: Option<AuthenticatedUser>) -> AuthContext {
        AuthContext::new(
            AuthRequest::new("GET", "/Patient/1"),
            user,
            Arc::new(PermissionEvaluator::new()),
        )
    }

    #[test]
    fn test_anonymous_denies_everything() {
        let ctx = AuthContext::anonymous(AuthRequest::new("GET", "/metadata"));
        assert!(!ctx.is_authenticated());
        assert!(!ctx.check_permission("Patient", "read", None));
        assert!(!ctx.has_role("user"));
        assert!(!ctx.has_permission("canRead"));
        assert_eq!(
            ctx.evaluate("Patient", "read", None).reason.as_deref(),
            Some("Not authenticated")
        );
    }

    #[test]
    fn test_authenticated_checks() {
        let permissions = FhirPermissions::full_access()
            .with_custom("export", true)
            .with_resource(
                "Patient",
                ResourcePermission::new().with_condition(Condition::new(
                    "managingOrganization.reference",
                    ConditionOperator::Contains,
                    json!("Organization/1"),
                )),
            );
        let user = AuthenticatedUser::new("u1")
            .with_roles(["doctor"])
            .with_permissions(permissions);
        let ctx = context(Some(user)).with_strategy("jwt");

        assert!(ctx.is_authenticated());
        assert_eq!(ctx.strategy(), Some("jwt"));
        assert!(ctx.has_role("doctor"));
        assert!(ctx.has_permission("export"));
        assert!(ctx.check_permission("Observation", "delete", None));

        let own = json!({ "managingOrganization": { "reference": "Organization/1" } });
        let other = json!({ "managingOrganization": { "reference": "Organization/2" } });
        assert!(ctx.check_permission("Patient", "read", Some(&own)));
        assert!(!ctx.check_permission("Patient", "read", Some(&other)));
    }
}
