//! HTTP integration for axum.
//!
//! - [`authenticate_middleware`] runs the manager and injects an
//!   [`AuthContext`](crate::context::AuthContext) into request extensions
//! - [`Authenticated`] / [`OptionalAuth`] extract that context in handlers
//! - `IntoResponse` for [`AuthError`](crate::error::AuthError) renders a FHIR
//!   `OperationOutcome`, and for
//!   [`ChallengeResponse`](crate::types::ChallengeResponse) a 401 challenge

pub mod auth;
pub mod error;

pub use auth::{
    AuthLayerState, Authenticated, OptionalAuth, auth_request_from_parts, authenticate_middleware,
};
pub use error::{error_response, operation_outcome_json, server_error_response};
