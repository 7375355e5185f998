//! # octofhir-auth-engine
//!
//! Request-time authentication and authorization for the OctoFHIR server.
//!
//! For each request the engine decides who is calling and what they may do:
//!
//! - pluggable credential strategies (Basic, opaque Bearer, JWT, API key,
//!   session) dispatched by priority
//! - data-dependent permission checks with per-resource conditions
//! - token and session storage behind async traits
//! - a bounded audit trail and dispatch statistics
//! - axum middleware and extractors
//!
//! ## Modules
//!
//! - [`manager`] - strategy registry and dispatch loop
//! - [`strategy`] - credential strategies and their shared base
//! - [`policy`] - permission evaluation
//! - [`context`] - per-request authenticated context
//! - [`storage`] - token and session storage
//! - [`token`] - signing-key set cache
//! - [`config`] - configuration
//! - [`audit`] - audit events
//! - [`middleware`] - axum integration
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use octofhir_auth_engine::prelude::*;
//!
//! let manager = AuthManager::default();
//! manager
//!     .register_strategy(Arc::new(BasicStrategy::new().with_user("admin", "secret")))
//!     .await?;
//!
//! let request = AuthRequest::new("GET", "/Patient")
//!     .with_header("Authorization", "Basic YWRtaW46c2VjcmV0");
//! let result = manager.authenticate(&request, &RequestContext::new()).await;
//! assert_eq!(result.user().map(|u| u.id.as_str()), Some("admin"));
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod middleware;
pub mod paths;
pub mod policy;
pub mod storage;
pub mod strategy;
pub mod token;
pub mod types;

pub use config::{AuthConfig, ConfigError};
pub use context::AuthContext;
pub use error::{AuthError, ErrorCategory, TokenErrorCode};
pub use manager::{AuthManager, AuthStats, CleanupReport, CleanupTask, StrategyUsage};
pub use policy::{AccessDecision, PermissionEvaluator};
pub use strategy::CredentialStrategy;
pub use types::{AuthRequest, AuthenticatedUser, AuthenticationResult, RequestContext};

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_auth_engine::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::audit::{AuditEvent, AuditEventType};
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::context::AuthContext;
    pub use crate::error::{AuthError, ErrorCategory, TokenErrorCode};
    pub use crate::manager::{AuthManager, AuthStats, CleanupReport};
    pub use crate::middleware::{AuthLayerState, Authenticated, OptionalAuth, authenticate_middleware};
    pub use crate::policy::{AccessDecision, ConditionValidator, PermissionEvaluator};
    pub use crate::storage::{
        InMemorySessionStorage, InMemoryTokenStorage, SessionData, SessionStorage, SessionUpdate,
        TokenStorage,
    };
    pub use crate::strategy::{
        ApiKeyStrategy, BasicCredentialValidator, BasicStrategy, BearerStrategy, ClaimsExtractor,
        CredentialStrategy, JwtStrategy, SessionStrategy, StrategyBase,
    };
    pub use crate::types::{
        AuthRequest, AuthenticatedUser, AuthenticationResult, ChallengeResponse, Condition,
        ConditionOperator, CredentialType, FhirPermissions, RequestContext, ResourcePermission,
        TokenInfo,
    };
}
