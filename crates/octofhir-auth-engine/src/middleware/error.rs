//! Error and challenge responses.
//!
//! [`AuthError`] renders as a FHIR `OperationOutcome`; a
//! [`ChallengeResponse`] renders with its `WWW-Authenticate` header and
//! `{error, message}` body.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::config::DEFAULT_REALM;
use crate::error::{AuthError, TokenErrorCode};
use crate::types::{ChallengeResponse, FHIR_JSON};

// =============================================================================
// IntoResponse Implementations
// =============================================================================

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        error_response(&self, DEFAULT_REALM)
    }
}

impl IntoResponse for ChallengeResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type),
        );
        if let Ok(value) = HeaderValue::from_str(&self.www_authenticate) {
            headers.insert(header::WWW_AUTHENTICATE, value);
        }

        (status, headers, Json(self.body_json())).into_response()
    }
}

/// FHIR issue type for an error.
fn issue_code(error: &AuthError) -> &'static str {
    match error {
        AuthError::Unauthorized { .. } | AuthError::Strategy { .. } => "login",
        AuthError::Token { code, .. } => match code {
            TokenErrorCode::Expired => "expired",
            TokenErrorCode::Malformed => "invalid",
            _ => "security",
        },
        AuthError::Forbidden { .. } => "forbidden",
        AuthError::DuplicateStrategy { .. } => "duplicate",
        AuthError::KeySet { .. } => "transient",
        AuthError::Storage { .. } | AuthError::Configuration { .. } | AuthError::Internal { .. } => {
            "exception"
        }
    }
}

/// Message shown for server-side failures. Details stay in the log.
fn public_message(error: &AuthError) -> String {
    match error {
        AuthError::KeySet { .. } => "Signing keys are temporarily unavailable".to_string(),
        _ => "Internal authentication error".to_string(),
    }
}

/// Builds the WWW-Authenticate header value for 401 responses.
///
/// Format: `Bearer realm="<realm>", error="invalid_token", error_description="..."`
fn build_www_authenticate_header(realm: &str, error: &str, description: &str) -> String {
    format!(
        "Bearer realm=\"{}\", error=\"{}\", error_description=\"{}\"",
        escape_quoted(realm),
        error,
        escape_quoted(description)
    )
}

fn escape_quoted(value: &str) -> String {
    value.replace('\"', "\\\"")
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Renders an error as an `OperationOutcome`.
///
/// 401 responses advertise `realm` in their `Bearer` challenge. Server
/// errors carry a generic message; the detail only reaches the log.
#[must_use]
pub fn error_response(error: &AuthError, realm: &str) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = if status.is_server_error() {
        tracing::error!(error = %error, "Authentication engine error");
        public_message(error)
    } else {
        error.message()
    };

    let body = operation_outcome_json("error", issue_code(error), error.error_code(), &message);

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));

    if status == StatusCode::UNAUTHORIZED {
        let www_auth = build_www_authenticate_header(realm, error.error_code(), &message);
        if let Ok(value) = HeaderValue::from_str(&www_auth) {
            headers.insert(header::WWW_AUTHENTICATE, value);
        }
    }

    (status, headers, Json(body)).into_response()
}

/// Response for an authentication run that ended in a server-side failure.
///
/// Carries neither a challenge nor the underlying error message.
#[must_use]
pub fn server_error_response(status: StatusCode) -> Response {
    let (issue, code, message) = if status == StatusCode::SERVICE_UNAVAILABLE {
        (
            "transient",
            "temporarily_unavailable",
            "Authentication is temporarily unavailable",
        )
    } else {
        ("exception", "server_error", "Internal authentication error")
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
    let body = operation_outcome_json("error", issue, code, message);

    (status, headers, Json(body)).into_response()
}

/// Creates a FHIR OperationOutcome JSON for an error.
#[must_use]
pub fn operation_outcome_json(
    severity: &str,
    code: &str,
    error_code: &str,
    diagnostics: &str,
) -> serde_json::Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": severity,
            "code": code,
            "details": {
                "coding": [{
                    "system": "http://octofhir.io/CodeSystem/auth-error",
                    "code": error_code
                }]
            },
            "diagnostics": diagnostics
        }]
    })
}

// =============================================================================
// Tests
// =============================================================================
