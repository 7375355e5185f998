//! Results handed back to the host.

use serde::Serialize;
use serde_json::json;

use super::user::AuthenticatedUser;
use crate::config::DEFAULT_REALM;
use crate::error::AuthError;

/// Content type used for FHIR error bodies.
pub const FHIR_JSON: &str = "application/fhir+json";

/// Content type used for generic JSON error bodies.
pub const PLAIN_JSON: &str = "application/json";

/// Outcome of one authentication attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticationResult {
    /// The request may proceed. `user` is `None` for anonymous pass-through.
    Success {
        /// The verified identity.
        user: Option<AuthenticatedUser>,
        /// Name of the strategy that verified the identity.
        strategy: Option<String>,
    },
    /// Every candidate strategy rejected the request.
    Failure {
        /// User-facing error message.
        error: String,
        /// Suggested HTTP status.
        status_code: u16,
    },
}

impl AuthenticationResult {
    /// Successful result carrying a verified user.
    #[must_use]
    pub fn authenticated(user: AuthenticatedUser, strategy: impl Into<String>) -> Self {
        Self::Success {
            user: Some(user),
            strategy: Some(strategy.into()),
        }
    }

    /// Successful result without a user.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::Success {
            user: None,
            strategy: None,
        }
    }

    /// Failed result.
    #[must_use]
    pub fn failure(error: impl Into<String>, status_code: u16) -> Self {
        Self::Failure {
            error: error.into(),
            status_code,
        }
    }

    /// Returns `true` for success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&AuthenticatedUser> {
        match self {
            Self::Success { user, .. } => user.as_ref(),
            Self::Failure { .. } => None,
        }
    }

    /// Consumes the result and returns the user, if any.
    #[must_use]
    pub fn into_user(self) -> Option<AuthenticatedUser> {
        match self {
            Self::Success { user, .. } => user,
            Self::Failure { .. } => None,
        }
    }

    /// Returns the name of the succeeding strategy.
    #[must_use]
    pub fn strategy(&self) -> Option<&str> {
        match self {
            Self::Success { strategy, .. } => strategy.as_deref(),
            Self::Failure { .. } => None,
        }
    }

    /// Returns the error message for failures.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    /// Returns the suggested HTTP status (200 for success).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Success { .. } => 200,
            Self::Failure { status_code, .. } => *status_code,
        }
    }
}

impl From<&AuthError> for AuthenticationResult {
    fn from(err: &AuthError) -> Self {
        Self::failure(err.message(), err.status_code())
    }
}

/// Structured error body of a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeBody {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable description.
    pub message: String,
}

/// HTTP response instructing a client how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    /// HTTP status (401).
    pub status: u16,
    /// Value of the `WWW-Authenticate` header.
    pub www_authenticate: String,
    /// Response content type.
    pub content_type: &'static str,
    /// Response body.
    pub body: ChallengeBody,
}

impl ChallengeResponse {
    /// Builds a 401 challenge for a scheme and realm.
    #[must_use]
    pub fn new(scheme: &str, realm: &str, message: impl Into<String>) -> Self {
        Self {
            status: 401,
            www_authenticate: format!("{} realm=\"{}\"", scheme, escape_quotes(realm)),
            content_type: FHIR_JSON,
            body: ChallengeBody {
                error: "unauthorized".to_string(),
                message: message.into(),
            },
        }
    }

    /// Appends `charset="UTF-8"` to the header.
    #[must_use]
    pub fn with_charset(mut self) -> Self {
        self.www_authenticate.push_str(", charset=\"UTF-8\"");
        self
    }

    /// Appends an `error` parameter to the header.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.www_authenticate
            .push_str(&format!(", error=\"{}\"", escape_quotes(error)));
        self.body.error = error.to_string();
        self
    }

    /// Sets the body content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }

    /// Generic challenge used when no strategy applies.
    #[must_use]
    pub fn generic() -> Self {
        Self::new("Bearer", DEFAULT_REALM, "Authentication required")
    }

    /// Body as JSON.
    #[must_use]
    pub fn body_json(&self) -> serde_json::Value {
        json!({
            "error": self.body.error,
            "message": self.body.message,
        })
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('"', "\\\"")
}
