//! Permission evaluation engine.
//!
//! Pure, synchronous allow/deny decisions over a user's
//! [`FhirPermissions`](crate::types::FhirPermissions). Downstream handlers
//! usually reach it through [`AuthContext`](crate::context::AuthContext)
//! rather than directly.

pub mod condition;
pub mod evaluator;

pub use condition::{ConditionValidator, ValidatorRegistry, evaluate_condition, resolve_path};
pub use evaluator::{AccessDecision, OperationCategory, PermissionEvaluator};
