//! Authentication engine configuration.
//!
//! Each credential strategy has its own section. Sections share a common
//! shape (`enabled`, `priority`, `skip_paths`, `only_paths`, `realm`) and
//! add scheme-specific options on top.
//!
//! # Example (TOML)
//!
//! ```toml
//! [manager]
//! require_auth = true
//! skip_paths = ["/metadata", "/health*"]
//!
//! [basic]
//! enabled = true
//!
//! [basic.users.admin]
//! password = "secret"
//! roles = ["admin"]
//!
//! [jwt]
//! enabled = true
//! jwks_uri = "https://idp.example.com/.well-known/jwks.json"
//! clock_tolerance = "60s"
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::FhirPermissions;

/// Realm advertised when none is configured.
pub const DEFAULT_REALM: &str = "FHIR Server";

/// Root configuration of the engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Manager-level settings.
    pub manager: ManagerConfig,

    /// Permission evaluation settings.
    pub permissions: PermissionsConfig,

    /// HTTP Basic strategy.
    pub basic: BasicConfig,

    /// Opaque Bearer token strategy.
    pub bearer: BearerConfig,

    /// Signed-token (JWT) strategy.
    pub jwt: JwtConfig,

    /// API key strategy.
    pub api_key: ApiKeyConfig,

    /// Session-id strategy.
    pub session: SessionConfig,
}

/// Manager-level settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Reject requests no strategy can handle.
    /// When `false`, such requests pass through anonymously.
    pub require_auth: bool,

    /// Paths that bypass authentication entirely (glob patterns).
    pub skip_paths: Vec<String>,

    /// Realm used in the generic challenge.
    pub realm: String,

    /// Maximum number of audit events kept in memory.
    pub audit_log_capacity: usize,

    /// Upper bound for a single strategy attempt.
    #[serde(with = "humantime_serde")]
    pub strategy_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            skip_paths: Vec::new(),
            realm: DEFAULT_REALM.to_string(),
            audit_log_capacity: 1000,
            strategy_timeout: Duration::from_secs(10),
        }
    }
}

/// Permission evaluation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Treat a non-numeric path segment on an array as `[0].segment`.
    pub array_index_fallback: bool,

    /// Permissions granted to users that arrive without any.
    pub default_permissions: FhirPermissions,

    /// Roles granted to users that arrive without any.
    pub default_roles: Vec<String>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            array_index_fallback: true,
            default_permissions: FhirPermissions::read_only(),
            default_roles: vec!["user".to_string()],
        }
    }
}

/// Settings shared by every strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StrategyScope {
    /// Only attempt the strategy on these paths (glob patterns).
    /// Takes precedence over `skip_paths`.
    pub only_paths: Vec<String>,

    /// Never attempt the strategy on these paths (glob patterns).
    pub skip_paths: Vec<String>,

    /// Realm advertised in the challenge. Falls back to the manager realm.
    pub realm: Option<String>,
}

/// Static identity attached to a configured credential.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticIdentity {
    /// User identifier. Defaults to the map key.
    pub id: Option<String>,

    /// Display / login name.
    pub username: Option<String>,

    /// Email address.
    pub email: Option<String>,

    /// Assigned roles.
    pub roles: Vec<String>,

    /// Explicit permissions. The default floor applies when absent.
    pub permissions: Option<FhirPermissions>,
}

/// HTTP Basic strategy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BasicConfig {
    /// Register the strategy.
    pub enabled: bool,

    /// Dispatch priority (higher runs first).
    pub priority: i32,

    /// Path scoping and realm.
    #[serde(flatten)]
    pub scope: StrategyScope,

    /// Users keyed by login name.
    pub users: HashMap<String, BasicUser>,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 100,
            scope: StrategyScope::default(),
            users: HashMap::new(),
        }
    }
}

/// A configured Basic user.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BasicUser {
    /// Plaintext password or an argon2 PHC string (`$argon2id$...`).
    pub password: String,

    /// Identity details.
    #[serde(flatten)]
    pub identity: StaticIdentity,
}

/// Opaque Bearer token strategy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BearerConfig {
    /// Register the strategy.
    pub enabled: bool,

    /// Dispatch priority (higher runs first).
    pub priority: i32,

    /// Path scoping and realm.
    #[serde(flatten)]
    pub scope: StrategyScope,

    /// Tokens that never expire, keyed by token value.
    pub static_tokens: HashMap<String, StaticIdentity>,
}

impl Default for BearerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 200,
            scope: StrategyScope::default(),
            static_tokens: HashMap::new(),
        }
    }
}

/// Signed-token (JWT) strategy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Register the strategy.
    pub enabled: bool,

    /// Dispatch priority (higher runs first).
    pub priority: i32,

    /// Path scoping and realm.
    #[serde(flatten)]
    pub scope: StrategyScope,

    /// Shared secret for HMAC algorithms.
    pub secret: Option<String>,

    /// PEM-encoded public key for RSA / EC algorithms.
    pub public_key_pem: Option<String>,

    /// Remote key-set endpoint.
    pub jwks_uri: Option<String>,

    /// How long fetched keys stay cached.
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,

    /// Timeout for key-set requests.
    #[serde(with = "humantime_serde")]
    pub jwks_timeout: Duration,

    /// Allow plain `http://` key-set endpoints (development only).
    pub allow_http_jwks: bool,

    /// Accepted signing algorithms.
    pub algorithms: Vec<String>,

    /// Required `iss` value.
    pub issuer: Option<String>,

    /// Accepted `aud` values. Empty disables the check.
    pub audience: Vec<String>,

    /// Allowed clock skew for `exp`, `nbf` and `iat`.
    #[serde(with = "humantime_serde")]
    pub clock_tolerance: Duration,

    /// Maximum token age measured from `iat`.
    #[serde(with = "humantime_serde::option")]
    pub max_age: Option<Duration>,

    /// Claim holding the user id.
    pub user_id_claim: String,

    /// Claim holding the login name.
    pub username_claim: String,

    /// Claim holding the email address.
    pub email_claim: String,

    /// Claim holding roles (dot path). Conventional names are tried next.
    pub roles_claim: Option<String>,

    /// Claim holding a permission object (dot path).
    pub permissions_claim: Option<String>,

    /// Signal refresh for tokens close to expiry.
    pub enable_refresh: bool,

    /// Remaining lifetime below which a token needs refresh.
    #[serde(with = "humantime_serde")]
    pub refresh_threshold: Duration,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 300,
            scope: StrategyScope::default(),
            secret: None,
            public_key_pem: None,
            jwks_uri: None,
            jwks_cache_ttl: Duration::from_secs(3600),
            jwks_timeout: Duration::from_secs(5),
            allow_http_jwks: false,
            algorithms: vec!["RS256".to_string(), "HS256".to_string()],
            issuer: None,
            audience: Vec::new(),
            clock_tolerance: Duration::from_secs(60),
            max_age: None,
            user_id_claim: "sub".to_string(),
            username_claim: "preferred_username".to_string(),
            email_claim: "email".to_string(),
            roles_claim: None,
            permissions_claim: None,
            enable_refresh: false,
            refresh_threshold: Duration::from_secs(300),
        }
    }
}

/// API key strategy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiKeyConfig {
    /// Register the strategy.
    pub enabled: bool,

    /// Dispatch priority (higher runs first).
    pub priority: i32,

    /// Path scoping and realm.
    #[serde(flatten)]
    pub scope: StrategyScope,

    /// Header carrying the key.
    pub header_name: String,

    /// Query parameter carrying the key, if accepted.
    pub query_param: Option<String>,

    /// Keys mapped to identities.
    pub keys: HashMap<String, StaticIdentity>,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 150,
            scope: StrategyScope::default(),
            header_name: "X-API-Key".to_string(),
            query_param: None,
            keys: HashMap::new(),
        }
    }
}

/// Session-id strategy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Register the strategy.
    pub enabled: bool,

    /// Dispatch priority (higher runs first).
    pub priority: i32,

    /// Path scoping and realm.
    #[serde(flatten)]
    pub scope: StrategyScope,

    /// Cookie carrying the session id.
    pub cookie_name: String,

    /// Header carrying the session id.
    pub header_name: String,

    /// Lifetime of sessions created through the manager.
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 120,
            scope: StrategyScope::default(),
            cookie_name: "fhir_session".to_string(),
            header_name: "X-Session-Id".to_string(),
            session_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range or inconsistent.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

const SUPPORTED_ALGORITHMS: &[&str] = &[
    "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256",
    "ES384", "EdDSA",
];

impl AuthConfig {
    /// Parses a TOML document and validates it.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON document and validates it.
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for out-of-range values and
    /// `ConfigError::Missing` when an enabled strategy lacks required input.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manager.audit_log_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "manager.audit_log_capacity must be greater than 0".to_string(),
            ));
        }
        if self.manager.strategy_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "manager.strategy_timeout must be greater than 0".to_string(),
            ));
        }

        if self.jwt.enabled {
            self.validate_jwt()?;
        }

        if self.api_key.enabled && self.api_key.header_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "api_key.header_name cannot be empty".to_string(),
            ));
        }

        if self.session.enabled {
            if self.session.cookie_name.trim().is_empty()
                && self.session.header_name.trim().is_empty()
            {
                return Err(ConfigError::Missing(
                    "session.cookie_name or session.header_name".to_string(),
                ));
            }
            if self.session.session_ttl.is_zero() {
                return Err(ConfigError::InvalidValue(
                    "session.session_ttl must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn validate_jwt(&self) -> Result<(), ConfigError> {
        let jwt = &self.jwt;

        if jwt.secret.is_none() && jwt.public_key_pem.is_none() && jwt.jwks_uri.is_none() {
            return Err(ConfigError::Missing(
                "jwt.secret, jwt.public_key_pem or jwt.jwks_uri".to_string(),
            ));
        }

        if jwt.algorithms.is_empty() {
            return Err(ConfigError::InvalidValue(
                "jwt.algorithms cannot be empty".to_string(),
            ));
        }
        for alg in &jwt.algorithms {
            if !SUPPORTED_ALGORITHMS.contains(&alg.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "unsupported jwt algorithm '{}'",
                    alg
                )));
            }
        }

        if let Some(uri) = &jwt.jwks_uri {
            let parsed = url::Url::parse(uri)
                .map_err(|e| ConfigError::InvalidValue(format!("jwt.jwks_uri: {}", e)))?;
            if parsed.scheme() != "https" && !(jwt.allow_http_jwks && parsed.scheme() == "http") {
                return Err(ConfigError::InvalidValue(format!(
                    "jwt.jwks_uri must use https: {}",
                    uri
                )));
            }
            if jwt.jwks_timeout.is_zero() {
                return Err(ConfigError::InvalidValue(
                    "jwt.jwks_timeout must be greater than 0".to_string(),
                ));
            }
        }

        if jwt.user_id_claim.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "jwt.user_id_claim cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
