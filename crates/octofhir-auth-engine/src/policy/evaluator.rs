//! Permission evaluation.
//!
//! Decides allow/deny for a user, resource type, operation and optional
//! resource payload. Evaluation order:
//!
//! 1. No user: deny.
//! 2. The operation's category gate (`canRead`, `canWrite`, `canDelete`).
//!    A global `false` cannot be overridden by resource entries.
//! 3. The resource-specific flag for the operation, if present.
//! 4. Every condition of the resource entry (logical AND), when a payload
//!    is supplied.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::condition::{ConditionValidator, ValidatorRegistry, evaluate_condition};
use crate::types::{AuthenticatedUser, FhirPermissions};

/// Permission category an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCategory {
    /// `read`, `vread`, `search*`, `history*`.
    Read,
    /// `create`, `update`, `patch*`.
    Write,
    /// `delete*`.
    Delete,
    /// Anything else, looked up in the `operations` map.
    Custom,
}

impl OperationCategory {
    /// Classifies an operation name.
    #[must_use]
    pub fn of(operation: &str) -> Self {
        match operation {
            "read" | "vread" => Self::Read,
            "create" | "update" => Self::Write,
            op if op.starts_with("search") || op.starts_with("history") => Self::Read,
            op if op.starts_with("patch") => Self::Write,
            op if op.starts_with("delete") => Self::Delete,
            _ => Self::Custom,
        }
    }

    fn gate(&self, permissions: &FhirPermissions) -> bool {
        match self {
            Self::Read => permissions.can_read,
            Self::Write => permissions.can_write,
            Self::Delete => permissions.can_delete,
            Self::Custom => true,
        }
    }
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Delete => write!(f, "delete"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Result of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    /// Whether the action is allowed.
    pub allowed: bool,
    /// Why the action was denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AccessDecision {
    /// An allow decision.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A deny decision with a reason.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Stateless permission evaluator.
///
/// Holds only configuration: the custom validator registry and the array
/// fallback switch. Cheap to share behind an `Arc`.
#[derive(Clone)]
pub struct PermissionEvaluator {
    validators: ValidatorRegistry,
    array_index_fallback: bool,
}

impl Default for PermissionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PermissionEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.validators.keys().collect();
        names.sort();
        f.debug_struct("PermissionEvaluator")
            .field("validators", &names)
            .field("array_index_fallback", &self.array_index_fallback)
            .finish()
    }
}

impl PermissionEvaluator {
    /// Creates an evaluator with array fallback enabled and no validators.
    #[must_use]
    pub fn new() -> Self {
        Self {
            validators: ValidatorRegistry::new(),
            array_index_fallback: true,
        }
    }

    /// Enables or disables implicit `[0]` indexing on arrays.
    #[must_use]
    pub fn with_array_index_fallback(mut self, enabled: bool) -> Self {
        self.array_index_fallback = enabled;
        self
    }

    /// Registers a named validator for `custom` conditions.
    #[must_use]
    pub fn with_validator(
        mut self,
        name: impl Into<String>,
        validator: Arc<dyn ConditionValidator>,
    ) -> Self {
        self.validators.insert(name.into(), validator);
        self
    }

    /// Evaluates a permission check.
    #[must_use]
    pub fn evaluate(
        &self,
        user: Option<&AuthenticatedUser>,
        resource_type: &str,
        operation: &str,
        resource: Option<&Value>,
    ) -> AccessDecision {
        let Some(user) = user else {
            return AccessDecision::deny("Not authenticated");
        };
        let Some(permissions) = user.permissions.as_ref() else {
            return AccessDecision::deny("No permissions assigned");
        };

        let category = OperationCategory::of(operation);

        if category == OperationCategory::Custom {
            return match permissions.operations.get(operation) {
                Some(true) => AccessDecision::allow(),
                _ => AccessDecision::deny(format!("Operation '{}' is not permitted", operation)),
            };
        }

        if !category.gate(permissions) {
            return AccessDecision::deny(format!("Global {} permission denied", category));
        }

        let Some(entry) = permissions.resource(resource_type) else {
            return AccessDecision::allow();
        };

        if entry.operation_flag(operation) == Some(false) {
            return AccessDecision::deny(format!(
                "Operation '{}' on {} is not permitted",
                operation, resource_type
            ));
        }

        if let Some(resource) = resource {
            for condition in &entry.conditions {
                if !evaluate_condition(
                    condition,
                    resource,
                    &self.validators,
                    self.array_index_fallback,
                ) {
                    return AccessDecision::deny(format!(
                        "Condition on '{}' not satisfied",
                        condition.field
                    ));
                }
            }
        }

        AccessDecision::allow()
    }

    /// Shorthand for `evaluate(..).allowed`.
    #[must_use]
    pub fn check(
        &self,
        user: Option<&AuthenticatedUser>,
        resource_type: &str,
        operation: &str,
        resource: Option<&Value>,
    ) -> bool {
        self.evaluate(user, resource_type, operation, resource)
            .allowed
    }

    /// Checks a named capability.
    ///
    /// Looks at the `custom` map, then the `operations` map, then the
    /// global gates by their wire names (`canRead`, `canWrite`,
    /// `canDelete`).
    #[must_use]
    pub fn has_named_permission(&self, user: Option<&AuthenticatedUser>, name: &str) -> bool {
        let Some(permissions) = user.and_then(|u| u.permissions.as_ref()) else {
            return false;
        };

        if let Some(flag) = permissions.custom.get(name) {
            return *flag;
        }
        if let Some(flag) = permissions.operations.get(name) {
            return *flag;
        }
        match name {
            "canRead" => permissions.can_read,
            "canWrite" => permissions.can_write,
            "canDelete" => permissions.can_delete,
            _ => false,
        }
    }
}
