//! Authentication middleware and extractors.
//!
//! [`authenticate_middleware`] runs the [`AuthManager`] for every request.
//! On success it stores the [`AuthContext`] in the request extensions. On
//! a credential failure it answers with the challenge of the first
//! applicable strategy. Server-side failures get a bare `OperationOutcome`.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use octofhir_auth_engine::middleware::{AuthLayerState, Authenticated, authenticate_middleware};
//!
//! async fn whoami(Authenticated(ctx): Authenticated) -> String {
//!     ctx.user().map(|u| u.id.clone()).unwrap_or_default()
//! }
//!
//! let state = AuthLayerState::new(manager);
//! let app = Router::new()
//!     .route("/whoami", get(whoami))
//!     .layer(middleware::from_fn_with_state(state, authenticate_middleware));
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::DEFAULT_REALM;
use crate::context::AuthContext;
use crate::error::AuthError;
use crate::manager::AuthManager;
use crate::middleware::error::{error_response, server_error_response};
use crate::types::{AuthRequest, RequestContext};

const REQUEST_ID_HEADER: &str = "x-request-id";

// =============================================================================
// Layer State
// =============================================================================

/// State of [`authenticate_middleware`].
#[derive(Clone)]
pub struct AuthLayerState {
    /// Manager running the strategies.
    pub manager: Arc<AuthManager>,
}

impl AuthLayerState {
    /// Wraps a manager.
    #[must_use]
    pub fn new(manager: Arc<AuthManager>) -> Self {
        Self { manager }
    }
}

/// Manager realm, carried in request extensions for extractor rejections.
#[derive(Clone)]
struct ChallengeRealm(Arc<str>);

// =============================================================================
// Middleware
// =============================================================================

/// Authenticates the request or responds with a challenge.
pub async fn authenticate_middleware(
    State(state): State<AuthLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    parts
        .extensions
        .insert(ChallengeRealm(Arc::from(state.manager.config().realm.as_str())));
    let auth_request = auth_request_from_parts(&parts);

    let mut context = RequestContext::new();
    if let Some(request_id) = auth_request.header(REQUEST_ID_HEADER) {
        context = context.with_request_id(request_id);
    }

    match state
        .manager
        .authenticate_context(auth_request.clone(), &context)
        .await
    {
        Ok(auth_context) => {
            tracing::debug!(
                request_id = %context.request_id,
                path = %auth_request.path,
                authenticated = auth_context.is_authenticated(),
                strategy = auth_context.strategy().unwrap_or("-"),
                "Request authenticated"
            );
            parts.extensions.insert(auth_context);
            next.run(Request::from_parts(parts, body)).await
        }
        Err(result) if result.status_code() >= 500 => {
            tracing::error!(
                request_id = %context.request_id,
                path = %auth_request.path,
                status = result.status_code(),
                error = result.error().unwrap_or("-"),
                "Authentication failed with a server error"
            );
            let status = StatusCode::from_u16(result.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            server_error_response(status)
        }
        Err(result) => {
            tracing::debug!(
                request_id = %context.request_id,
                path = %auth_request.path,
                error = result.error().unwrap_or("-"),
                "Request rejected"
            );
            let mut challenge = state.manager.create_challenge(&auth_request).await;
            challenge.status = result.status_code();
            if let Some(error) = result.error() {
                challenge.body.message = error.to_string();
            }
            challenge.into_response()
        }
    }
}

/// Builds the transport-neutral request view from HTTP parts.
#[must_use]
pub fn auth_request_from_parts(parts: &Parts) -> AuthRequest {
    let mut request = AuthRequest::new(parts.method.as_str(), parts.uri.path());

    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            request.insert_header(name.as_str(), value);
        }
    }

    if let Some(query) = parts.uri.query() {
        request.query = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
    }

    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        request.remote_addr = Some(addr.ip());
    }

    request
}

// =============================================================================
// Extractors
// =============================================================================

/// Extractor for an authenticated context.
///
/// Rejects with 401 when the middleware did not run or the request passed
/// anonymously. The challenge names the manager realm.
pub struct Authenticated(pub AuthContext);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<AuthContext>() {
            Some(ctx) if ctx.is_authenticated() => Ok(Authenticated(ctx.clone())),
            _ => {
                let realm = parts
                    .extensions
                    .get::<ChallengeRealm>()
                    .map_or(DEFAULT_REALM, |realm| &*realm.0);
                Err(error_response(
                    &AuthError::unauthorized("Authentication required"),
                    realm,
                ))
            }
        }
    }
}

/// Extractor for the context, authenticated or not.
///
/// Yields `None` when the middleware did not run.
pub struct OptionalAuth(pub Option<AuthContext>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(parts.extensions.get::<AuthContext>().cloned()))
    }
}

// =============================================================================
// Tests
// =============================================================================
