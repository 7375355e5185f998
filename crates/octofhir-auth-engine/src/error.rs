//! Authentication and authorization error types.
//!
//! Every strategy reports failures through [`AuthError`]. The manager never
//! propagates these as panics or aborts: a failing strategy only ends its own
//! attempt, and the last failure seen is surfaced to the caller.

use std::fmt;

/// Errors that can occur during authentication and authorization operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The request lacks valid credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The caller is authenticated but lacks permission for the action.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// A token is malformed, expired, revoked or otherwise untrusted.
    #[error("Invalid token ({code}): {message}")]
    Token {
        /// Machine-readable reason.
        code: TokenErrorCode,
        /// Human-readable description.
        message: String,
    },

    /// A strategy failed for a reason outside normal credential rejection.
    #[error("Strategy '{strategy}' failed: {message}")]
    Strategy {
        /// Name of the failing strategy.
        strategy: String,
        /// Description of the failure.
        message: String,
    },

    /// A strategy with the same name is already registered.
    #[error("Strategy already registered: {name}")]
    DuplicateStrategy {
        /// The duplicated strategy name.
        name: String,
    },

    /// An error occurred while storing or retrieving tokens or sessions.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The signing key set could not be fetched or used.
    #[error("Key set error: {message}")]
    KeySet {
        /// Description of the key set error.
        message: String,
    },

    /// The engine configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `Token` error.
    #[must_use]
    pub fn token(code: TokenErrorCode, message: impl Into<String>) -> Self {
        Self::Token {
            code,
            message: message.into(),
        }
    }

    /// Creates a new `Strategy` error.
    #[must_use]
    pub fn strategy(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Strategy {
            strategy: strategy.into(),
            message: message.into(),
        }
    }

    /// Creates a new `DuplicateStrategy` error.
    #[must_use]
    pub fn duplicate_strategy(name: impl Into<String>) -> Self {
        Self::DuplicateStrategy { name: name.into() }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `KeySet` error.
    #[must_use]
    pub fn key_set(message: impl Into<String>) -> Self {
        Self::KeySet {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the bare, user-facing message without the category prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::Token { message, .. }
            | Self::Strategy { message, .. }
            | Self::Storage { message }
            | Self::KeySet { message }
            | Self::Configuration { message }
            | Self::Internal { message } => message.clone(),
            Self::DuplicateStrategy { name } => {
                format!("Strategy '{}' is already registered", name)
            }
        }
    }

    /// Returns the suggested HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized { .. } | Self::Strategy { .. } => 401,
            Self::Token { code, .. } => code.status_code(),
            Self::Forbidden { .. } => 403,
            Self::DuplicateStrategy { .. } => 409,
            Self::KeySet { .. } => 503,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Returns the machine-readable error code used in response bodies.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::Forbidden { .. } => "forbidden",
            Self::Token { code, .. } => code.as_str(),
            Self::Strategy { .. } => "authentication_failed",
            Self::DuplicateStrategy { .. } => "duplicate_strategy",
            Self::Storage { .. } => "storage_error",
            Self::KeySet { .. } => "key_set_unavailable",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "server_error",
        }
    }

    /// Returns `true` if this is an authentication error (HTTP 401).
    #[must_use]
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::Token { .. } | Self::Strategy { .. }
        )
    }

    /// Returns `true` if this is an authorization error (HTTP 403).
    #[must_use]
    pub fn is_authorization_error(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Returns `true` if this is a token-related error.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(self, Self::Token { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unauthorized { .. } | Self::Strategy { .. } => ErrorCategory::Authentication,
            Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::Token { .. } => ErrorCategory::Token,
            Self::DuplicateStrategy { .. } | Self::Configuration { .. } => {
                ErrorCategory::Configuration
            }
            Self::Storage { .. } | Self::KeySet { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Machine-readable reasons a token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenErrorCode {
    /// No token was presented.
    Missing,
    /// The token could not be parsed.
    Malformed,
    /// The token is past its expiry.
    Expired,
    /// The token's not-before time has not been reached.
    NotYetValid,
    /// The token was issued longer ago than the configured maximum age.
    TooOld,
    /// The issuer claim is absent or not trusted.
    InvalidIssuer,
    /// The audience claim is absent or does not match.
    InvalidAudience,
    /// The signature did not verify.
    InvalidSignature,
    /// No key is available to verify the signature.
    UnknownKey,
    /// The token was revoked.
    Revoked,
    /// The token is unknown to the token store.
    Unknown,
}

impl TokenErrorCode {
    /// Returns the code as used in error payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "token_missing",
            Self::Malformed => "token_malformed",
            Self::Expired => "token_expired",
            Self::NotYetValid => "token_not_yet_valid",
            Self::TooOld => "token_too_old",
            Self::InvalidIssuer => "invalid_issuer",
            Self::InvalidAudience => "invalid_audience",
            Self::InvalidSignature => "invalid_signature",
            Self::UnknownKey => "unknown_key",
            Self::Revoked => "token_revoked",
            Self::Unknown => "invalid_token",
        }
    }

    /// Suggested HTTP status for a token rejected with this code.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Malformed => 400,
            _ => 401,
        }
    }
}

impl fmt::Display for TokenErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identity verification failed.
    Authentication,
    /// Permission check failed.
    Authorization,
    /// Token validation failed.
    Token,
    /// Storage or remote dependency failed.
    Infrastructure,
    /// The engine was misconfigured.
    Configuration,
    /// Internal server error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Token => write!(f, "token"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
