//! Credential strategies.
//!
//! A strategy verifies one credential scheme. The manager dispatches to
//! registered strategies in descending priority; a strategy never depends
//! on another strategy's state, only on shared storage.
//!
//! | Strategy | Credential | Default priority |
//! |----------|------------|------------------|
//! | [`JwtStrategy`] | `Authorization: Bearer <jwt>` | 300 |
//! | [`BearerStrategy`] | `Authorization: Bearer <opaque>` | 200 |
//! | [`ApiKeyStrategy`] | `X-API-Key` header or query parameter | 150 |
//! | [`SessionStrategy`] | `fhir_session` cookie or `X-Session-Id` | 120 |
//! | [`BasicStrategy`] | `Authorization: Basic <base64>` | 100 |

pub mod api_key;
pub mod base;
pub mod basic;
pub mod bearer;
pub mod jwt;
pub mod session;

use async_trait::async_trait;
use serde_json::Value;

use crate::AuthResult;
use crate::types::{AuthRequest, AuthenticatedUser, ChallengeResponse, RequestContext};

pub use api_key::ApiKeyStrategy;
pub use base::StrategyBase;
pub use basic::{BasicCredentialValidator, BasicStrategy};
pub use bearer::BearerStrategy;
pub use jwt::{ClaimsExtractor, JwtStrategy};
pub use session::SessionStrategy;

/// A pluggable credential verifier.
#[async_trait]
pub trait CredentialStrategy: Send + Sync {
    /// Unique name within a manager.
    fn name(&self) -> &str;

    /// Dispatch priority. Higher runs first.
    fn priority(&self) -> i32;

    /// Disabled strategies are skipped by the manager.
    fn enabled(&self) -> bool {
        true
    }

    /// Cheap syntactic check for a credential this strategy understands.
    ///
    /// Must not verify anything or have side effects.
    fn can_handle(&self, request: &AuthRequest) -> bool;

    /// Verifies the credential and returns the identity.
    async fn authenticate(
        &self,
        request: &AuthRequest,
        context: &RequestContext,
    ) -> AuthResult<AuthenticatedUser>;

    /// 401 response telling the client how to authenticate.
    fn challenge(&self, request: &AuthRequest) -> ChallengeResponse;

    /// Checks a permission for a user this strategy authenticated.
    ///
    /// Strategies without an evaluator deny.
    fn has_permission(
        &self,
        _user: &AuthenticatedUser,
        _resource_type: &str,
        _operation: &str,
        _resource: Option<&Value>,
    ) -> bool {
        false
    }
}
