//! Core data types shared by strategies, the manager and the evaluator.

pub mod outcome;
pub mod permissions;
pub mod request;
pub mod user;

pub use outcome::{AuthenticationResult, ChallengeBody, ChallengeResponse, FHIR_JSON, PLAIN_JSON};
pub use permissions::{Condition, ConditionOperator, FhirPermissions, ResourcePermission};
pub use request::{AuthRequest, RequestContext};
pub use user::{AuthenticatedUser, CredentialType, TokenInfo};
