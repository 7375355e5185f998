//! Permission model attached to authenticated users.
//!
//! Permissions are layered: three global booleans act as a coarse gate per
//! category (read, write, delete), resource-specific entries can further
//! restrict individual operations, and conditions narrow a grant based on
//! the resource payload being accessed.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fine-grained permission set of a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FhirPermissions {
    /// Global read gate (read, vread, search, history).
    pub can_read: bool,

    /// Global write gate (create, update, patch).
    pub can_write: bool,

    /// Global delete gate.
    pub can_delete: bool,

    /// Resource-specific overrides keyed by resource type. The `*` key
    /// applies to resource types without an own entry.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub resources: HashMap<String, ResourcePermission>,

    /// Named custom operations (e.g. `$export`).
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub operations: HashMap<String, bool>,

    /// Arbitrary named capabilities.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, bool>,
}

impl FhirPermissions {
    /// Read-only floor granted to users that arrive without permissions.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            can_read: true,
            ..Default::default()
        }
    }

    /// Full access to every category.
    #[must_use]
    pub fn full_access() -> Self {
        Self {
            can_read: true,
            can_write: true,
            can_delete: true,
            ..Default::default()
        }
    }

    /// Adds a resource-specific entry.
    #[must_use]
    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        permission: ResourcePermission,
    ) -> Self {
        self.resources.insert(resource_type.into(), permission);
        self
    }

    /// Grants or denies a named custom operation.
    #[must_use]
    pub fn with_operation(mut self, name: impl Into<String>, allowed: bool) -> Self {
        self.operations.insert(name.into(), allowed);
        self
    }

    /// Grants or denies a named custom capability.
    #[must_use]
    pub fn with_custom(mut self, name: impl Into<String>, allowed: bool) -> Self {
        self.custom.insert(name.into(), allowed);
        self
    }

    /// Returns the entry for a resource type, falling back to `*`.
    #[must_use]
    pub fn resource(&self, resource_type: &str) -> Option<&ResourcePermission> {
        self.resources
            .get(resource_type)
            .or_else(|| self.resources.get("*"))
    }
}

/// Per-resource-type permission entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePermission {
    /// Conditions that must all hold for the grant to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Per-operation flags (`read`, `create`, `update`, `delete`, `search`, ...).
    #[serde(flatten)]
    pub operations: BTreeMap<String, bool>,
}

impl ResourcePermission {
    /// Creates an empty entry (no overrides, no conditions).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag for an operation.
    #[must_use]
    pub fn allow(mut self, operation: impl Into<String>, allowed: bool) -> Self {
        self.operations.insert(operation.into(), allowed);
        self
    }

    /// Appends a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Looks up the flag for an operation.
    ///
    /// Exact names win; otherwise the operation family is tried, so
    /// `search-type` falls back to `search`, `history-instance` to
    /// `history` and `vread` to `read`.
    #[must_use]
    pub fn operation_flag(&self, operation: &str) -> Option<bool> {
        if let Some(flag) = self.operations.get(operation) {
            return Some(*flag);
        }
        let family = match operation {
            "vread" => "read",
            other => other.split(['-', '_']).next().unwrap_or(other),
        };
        self.operations.get(family).copied()
    }
}

/// Data-dependent predicate narrowing a resource grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Dot-separated path into the resource payload.
    pub field: String,

    /// Comparison operator.
    pub operator: ConditionOperator,

    /// Comparison operand.
    #[serde(default)]
    pub value: Value,

    /// Name of a validator registered on the evaluator (for `custom`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_validator: Option<String>,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            custom_validator: None,
        }
    }

    /// Creates a condition delegating to a named custom validator.
    #[must_use]
    pub fn custom(field: impl Into<String>, validator: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            operator: ConditionOperator::Custom,
            value,
            custom_validator: Some(validator.into()),
        }
    }
}

/// Operators supported by [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionOperator {
    /// Field equals value.
    Eq,
    /// Field differs from value.
    Ne,
    /// Field is one of the values in an array.
    In,
    /// Field is none of the values in an array.
    NotIn,
    /// String field contains a substring, or array field contains an element.
    Contains,
    /// Delegates to a registered validator.
    Custom,
}
