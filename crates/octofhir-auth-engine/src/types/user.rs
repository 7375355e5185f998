//! Authenticated identity produced by a strategy.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::permissions::FhirPermissions;

/// Identity produced by a successful strategy.
///
/// Built once per request and shared read-only afterwards. The engine does
/// not persist users; token and session stores own any persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    /// Stable identifier.
    pub id: String,

    /// Login name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Email address, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Assigned roles.
    #[serde(default)]
    pub roles: BTreeSet<String>,

    /// Permission set. `None` until the strategy base applies its floor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<FhirPermissions>,

    /// Free-form attributes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,

    /// Details of the credential that authenticated this user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_info: Option<TokenInfo>,
}

impl AuthenticatedUser {
    /// Creates a user with only an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            email: None,
            roles: BTreeSet::new(),
            permissions: None,
            metadata: HashMap::new(),
            token_info: None,
        }
    }

    /// Sets the username.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Adds roles.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Sets the permission set.
    #[must_use]
    pub fn with_permissions(mut self, permissions: FhirPermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Adds a metadata attribute.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attaches credential details.
    #[must_use]
    pub fn with_token_info(mut self, token_info: TokenInfo) -> Self {
        self.token_info = Some(token_info);
        self
    }

    /// Returns `true` if the user has the role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Returns `true` if the user has any of the roles.
    #[must_use]
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }

    /// Display name for logs: username when present, otherwise the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.id)
    }
}

/// Kind of credential that authenticated a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// HTTP Basic username/password.
    Basic,
    /// Opaque bearer token resolved through token storage.
    Bearer,
    /// Signed JSON Web Token.
    Jwt,
    /// Static API key.
    ApiKey,
    /// Server-side session identifier.
    Session,
}

impl CredentialType {
    /// Returns the credential type name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Bearer => "bearer",
            Self::Jwt => "jwt",
            Self::ApiKey => "api_key",
            Self::Session => "session",
        }
    }
}

/// Details of the credential presented with a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    /// Credential kind.
    pub credential_type: CredentialType,

    /// Raw credential value.
    pub token: String,

    /// When the credential was issued.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub issued_at: Option<OffsetDateTime>,

    /// When the credential expires.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

impl TokenInfo {
    /// Creates credential details without timestamps.
    #[must_use]
    pub fn new(credential_type: CredentialType, token: impl Into<String>) -> Self {
        Self {
            credential_type,
            token: token.into(),
            issued_at: None,
            expires_at: None,
        }
    }

    /// Seconds until expiry, negative once expired. `None` without expiry.
    #[must_use]
    pub fn remaining_lifetime(&self, now: OffsetDateTime) -> Option<i64> {
        self.expires_at
            .map(|exp| exp.unix_timestamp().saturating_sub(now.unix_timestamp()))
    }
}
