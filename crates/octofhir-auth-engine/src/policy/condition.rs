//! Condition evaluation against resource payloads.
//!
//! Conditions address fields with dot paths such as
//! `managingOrganization.reference`. When a path segment lands on an array
//! and the next key is not numeric, resolution continues with the first
//! element (`identifier.system` reads `identifier[0].system`). This implicit
//! indexing can be switched off through
//! [`PermissionsConfig::array_index_fallback`](crate::config::PermissionsConfig).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::types::{Condition, ConditionOperator};

/// User-supplied predicate for `custom` conditions.
pub trait ConditionValidator: Send + Sync {
    /// Returns `true` if the condition holds.
    ///
    /// `actual` is the resolved field value, `expected` the condition value
    /// and `resource` the whole payload.
    fn validate(&self, actual: &Value, expected: &Value, resource: &Value) -> bool;
}

impl<F> ConditionValidator for F
where
    F: Fn(&Value, &Value, &Value) -> bool + Send + Sync,
{
    fn validate(&self, actual: &Value, expected: &Value, resource: &Value) -> bool {
        self(actual, expected, resource)
    }
}

/// Registry of named custom validators.
pub type ValidatorRegistry = HashMap<String, Arc<dyn ConditionValidator>>;

/// Resolves a dot path inside a JSON payload.
///
/// Returns `None` for missing fields and for explicit `null`.
#[must_use]
pub fn resolve_path<'a>(data: &'a Value, path: &str, array_fallback: bool) -> Option<&'a Value> {
    let mut current = data;

    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => match segment.parse::<usize>() {
                Ok(index) => items.get(index)?,
                Err(_) if array_fallback => items.first()?.get(segment)?,
                Err(_) => return None,
            },
            _ => return None,
        };
    }

    if current.is_null() { None } else { Some(current) }
}

/// Evaluates a single condition.
///
/// Missing fields never satisfy a condition, whatever the operator.
#[must_use]
pub fn evaluate_condition(
    condition: &Condition,
    resource: &Value,
    validators: &ValidatorRegistry,
    array_fallback: bool,
) -> bool {
    let Some(actual) = resolve_path(resource, &condition.field, array_fallback) else {
        tracing::trace!(field = %condition.field, "Condition field missing");
        return false;
    };

    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Eq => values_equal(actual, expected),
        ConditionOperator::Ne => !values_equal(actual, expected),
        ConditionOperator::In => is_member(actual, expected),
        ConditionOperator::NotIn => !is_member(actual, expected),
        ConditionOperator::Contains => contains(actual, expected),
        ConditionOperator::Custom => {
            let Some(name) = condition.custom_validator.as_deref() else {
                tracing::warn!(field = %condition.field, "Custom condition without validator name");
                return false;
            };
            match validators.get(name) {
                Some(validator) => validator.validate(actual, expected, resource),
                None => {
                    tracing::warn!(validator = %name, "Unknown condition validator");
                    false
                }
            }
        }
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    actual == expected
}

fn is_member(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(candidates) => candidates.iter().any(|c| values_equal(actual, c)),
        other => values_equal(actual, other),
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
        _ => false,
    }
}
