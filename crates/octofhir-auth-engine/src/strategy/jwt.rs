//! Signed-token (JWT) authentication.
//!
//! Validation runs in a fixed order and stops at the first failure:
//!
//! 1. Bearer token extraction
//! 2. Structural parse (three base64url segments, JSON header and payload)
//! 3. Timing: `exp`, `nbf` and optionally `iat` against `max_age`, all with
//!    the configured clock tolerance
//! 4. Issuer, when configured (an absent claim fails)
//! 5. Audience, when configured (an absent claim fails)
//! 6. Signature, with an HMAC secret, a static public key or the remote
//!    key set
//! 7. Claims mapping into an [`AuthenticatedUser`]

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use serde_json::Value;
use time::OffsetDateTime;
use url::Url;

use super::CredentialStrategy;
use super::base::{StrategyBase, parse_bearer};
use crate::AuthResult;
use crate::config::{JwtConfig, PermissionsConfig};
use crate::error::{AuthError, TokenErrorCode};
use crate::policy::{PermissionEvaluator, resolve_path};
use crate::token::{JwksCache, JwksCacheConfig};
use crate::types::{
    AuthRequest, AuthenticatedUser, ChallengeResponse, CredentialType, FhirPermissions,
    RequestContext, TokenInfo,
};

/// Conventional role claims, tried after the configured one.
const ROLE_CLAIMS: &[&str] = &["roles", "realm_access.roles", "groups"];

/// Conventional permission claims, tried after the configured one.
const PERMISSION_CLAIMS: &[&str] = &["permissions", "fhir_permissions"];

/// Custom mapping from verified claims to a user.
///
/// When set on a [`JwtStrategy`] it replaces the default claim mapping
/// entirely.
pub trait ClaimsExtractor: Send + Sync {
    /// Builds the user from verified claims.
    fn extract(&self, claims: &Value) -> AuthResult<AuthenticatedUser>;
}

impl<F> ClaimsExtractor for F
where
    F: Fn(&Value) -> AuthResult<AuthenticatedUser> + Send + Sync,
{
    fn extract(&self, claims: &Value) -> AuthResult<AuthenticatedUser> {
        self(claims)
    }
}

/// Strategy for signed JWT bearer tokens.
pub struct JwtStrategy {
    base: StrategyBase,
    config: JwtConfig,
    algorithms: Vec<Algorithm>,
    secret: Option<DecodingKey>,
    public_key: Option<DecodingKey>,
    jwks: Option<Arc<JwksCache>>,
    extractor: Option<Arc<dyn ClaimsExtractor>>,
}

impl JwtStrategy {
    /// Creates an enabled strategy named `jwt` from JWT settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown algorithms, unparsable
    /// keys or a configuration without any key source.
    pub fn new(config: JwtConfig) -> AuthResult<Self> {
        let base = StrategyBase::new("jwt", config.priority).with_scope(&config.scope);
        Self::build(base, config)
    }

    /// Builds the strategy from configuration, honouring `enabled`.
    ///
    /// # Errors
    ///
    /// See [`JwtStrategy::new`].
    pub fn from_config(config: &JwtConfig, permissions: &PermissionsConfig) -> AuthResult<Self> {
        let base = StrategyBase::new("jwt", config.priority)
            .with_enabled(config.enabled)
            .with_permissions_config(permissions)
            .with_scope(&config.scope);
        Self::build(base, config.clone())
    }

    fn build(base: StrategyBase, config: JwtConfig) -> AuthResult<Self> {
        let algorithms = config
            .algorithms
            .iter()
            .map(|alg| {
                Algorithm::from_str(alg).map_err(|_| {
                    AuthError::configuration(format!("Unsupported JWT algorithm: {}", alg))
                })
            })
            .collect::<AuthResult<Vec<_>>>()?;

        let secret = config
            .secret
            .as_deref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));

        let public_key = config
            .public_key_pem
            .as_deref()
            .map(parse_public_key)
            .transpose()?;

        let jwks = match &config.jwks_uri {
            Some(uri) => {
                let url = Url::parse(uri).map_err(|e| {
                    AuthError::configuration(format!("Invalid JWKS URI '{}': {}", uri, e))
                })?;
                let cache_config = JwksCacheConfig::default()
                    .with_ttl(config.jwks_cache_ttl)
                    .with_request_timeout(config.jwks_timeout)
                    .with_allow_http(config.allow_http_jwks);
                let cache = JwksCache::new(url, cache_config)
                    .map_err(|e| AuthError::configuration(e.to_string()))?;
                Some(Arc::new(cache))
            }
            None => None,
        };

        if secret.is_none() && public_key.is_none() && jwks.is_none() {
            return Err(AuthError::configuration(
                "JWT strategy requires a secret, a public key or a JWKS URI",
            ));
        }

        Ok(Self {
            base,
            config,
            algorithms,
            secret,
            public_key,
            jwks,
            extractor: None,
        })
    }

    /// Replaces the shared base.
    #[must_use]
    pub fn with_base(mut self, base: StrategyBase) -> Self {
        self.base = base;
        self
    }

    /// Checks permissions with a shared evaluator and its custom validators.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<PermissionEvaluator>) -> Self {
        self.base = self.base.with_evaluator(evaluator);
        self
    }

    /// Replaces the default claim mapping.
    #[must_use]
    pub fn with_claims_extractor(mut self, extractor: Arc<dyn ClaimsExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Uses an existing key cache (shared between strategies, for example).
    #[must_use]
    pub fn with_jwks_cache(mut self, cache: Arc<JwksCache>) -> Self {
        self.jwks = Some(cache);
        self
    }

    /// The shared base.
    #[must_use]
    pub fn base(&self) -> &StrategyBase {
        &self.base
    }

    /// Returns `true` when refresh is enabled and the token's remaining
    /// lifetime is below the refresh threshold.
    ///
    /// Reads the `exp` claim without verifying the token and never mutates
    /// state. Tokens without `exp` never need refresh.
    #[must_use]
    pub fn needs_refresh(&self, token: &str) -> bool {
        if !self.config.enable_refresh {
            return false;
        }
        let Ok(claims) = decode_claims(token) else {
            return false;
        };
        let Ok(Some(exp)) = numeric_claim(&claims, "exp") else {
            return false;
        };

        let remaining = exp.saturating_sub(OffsetDateTime::now_utc().unix_timestamp());
        remaining < secs(self.config.refresh_threshold)
    }

    /// Runs every validation step and returns the verified claims.
    pub async fn verify(&self, token: &str) -> AuthResult<Value> {
        let header = decode_header(token)
            .map_err(|e| AuthError::token(TokenErrorCode::Malformed, format!("Malformed token: {}", e)))?;
        let claims = decode_claims(token)?;

        self.validate_timing(&claims, OffsetDateTime::now_utc().unix_timestamp())?;
        self.validate_issuer(&claims)?;
        self.validate_audience(&claims)?;
        self.verify_signature(token, &header).await?;

        Ok(claims)
    }

    fn validate_timing(&self, claims: &Value, now: i64) -> AuthResult<()> {
        let tolerance = secs(self.config.clock_tolerance);

        if let Some(exp) = numeric_claim(claims, "exp")?
            && now > exp.saturating_add(tolerance)
        {
            return Err(AuthError::token(TokenErrorCode::Expired, "Token has expired"));
        }

        if let Some(nbf) = numeric_claim(claims, "nbf")?
            && now.saturating_add(tolerance) < nbf
        {
            return Err(AuthError::token(
                TokenErrorCode::NotYetValid,
                "Token not yet valid",
            ));
        }

        if let Some(max_age) = self.config.max_age {
            let Some(iat) = numeric_claim(claims, "iat")? else {
                return Err(AuthError::token(
                    TokenErrorCode::TooOld,
                    "Token has no issued-at time",
                ));
            };
            if now.saturating_sub(iat) > secs(max_age).saturating_add(tolerance) {
                return Err(AuthError::token(TokenErrorCode::TooOld, "Token is too old"));
            }
        }

        Ok(())
    }

    fn validate_issuer(&self, claims: &Value) -> AuthResult<()> {
        let Some(expected) = &self.config.issuer else {
            return Ok(());
        };
        match claims.get("iss").and_then(Value::as_str) {
            Some(iss) if iss == expected => Ok(()),
            _ => Err(AuthError::token(
                TokenErrorCode::InvalidIssuer,
                "Invalid token issuer",
            )),
        }
    }

    fn validate_audience(&self, claims: &Value) -> AuthResult<()> {
        if self.config.audience.is_empty() {
            return Ok(());
        }
        let accepted = |aud: &str| self.config.audience.iter().any(|a| a == aud);
        let matched = match claims.get("aud") {
            Some(Value::String(aud)) => accepted(aud),
            Some(Value::Array(auds)) => auds.iter().filter_map(Value::as_str).any(accepted),
            _ => false,
        };
        if matched {
            Ok(())
        } else {
            Err(AuthError::token(
                TokenErrorCode::InvalidAudience,
                "Invalid token audience",
            ))
        }
    }

    async fn verify_signature(&self, token: &str, header: &Header) -> AuthResult<()> {
        if !self.algorithms.contains(&header.alg) {
            return Err(AuthError::token(
                TokenErrorCode::InvalidSignature,
                "Token algorithm not allowed",
            ));
        }

        let keys = self.candidate_keys(header).await?;
        if keys.is_empty() {
            return Err(AuthError::token(
                TokenErrorCode::UnknownKey,
                "No matching signing key",
            ));
        }

        // Timing and claims were checked above; only the signature is left.
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        if keys
            .iter()
            .any(|key| decode::<Value>(token, key, &validation).is_ok())
        {
            Ok(())
        } else {
            Err(AuthError::token(
                TokenErrorCode::InvalidSignature,
                "Invalid token signature",
            ))
        }
    }

    async fn candidate_keys(&self, header: &Header) -> AuthResult<Vec<DecodingKey>> {
        let mut keys = Vec::new();

        if is_hmac(header.alg) {
            keys.extend(self.secret.iter().cloned());
            return Ok(keys);
        }

        keys.extend(self.public_key.iter().cloned());

        if let Some(jwks) = &self.jwks {
            let lookup = match &header.kid {
                Some(kid) => jwks.get_key(kid).await.map(|key| vec![key]),
                None => jwks.signing_keys().await,
            };
            match lookup {
                Ok(resolved) => keys.extend(
                    resolved
                        .into_iter()
                        .filter(|k| k.algorithm.is_none_or(|alg| alg == header.alg))
                        .map(|k| k.key),
                ),
                Err(e) if keys.is_empty() => return Err(e.into()),
                Err(e) => {
                    tracing::debug!(error = %e, "JWKS lookup failed, using static key only");
                }
            }
        }

        Ok(keys)
    }

    fn map_claims(&self, token: &str, claims: &Value) -> AuthResult<AuthenticatedUser> {
        let mut user = match &self.extractor {
            Some(extractor) => extractor.extract(claims)?,
            None => self.default_user(claims)?,
        };

        if user.token_info.is_none() {
            let mut info = TokenInfo::new(CredentialType::Jwt, token);
            info.issued_at = timestamp_claim(claims, "iat");
            info.expires_at = timestamp_claim(claims, "exp");
            user.token_info = Some(info);
        }

        Ok(self.base.enrich(user))
    }

    fn default_user(&self, claims: &Value) -> AuthResult<AuthenticatedUser> {
        let id = claim_string(claims, &self.config.user_id_claim).ok_or_else(|| {
            AuthError::token(TokenErrorCode::Malformed, "Token has no subject")
        })?;

        let mut user = AuthenticatedUser::new(id)
            .with_roles(self.roles(claims))
            .with_metadata("claims", claims.clone());
        user.username = claim_string(claims, &self.config.username_claim);
        user.email = claim_string(claims, &self.config.email_claim);
        user.permissions = self.permissions(claims);
        Ok(user)
    }

    fn roles(&self, claims: &Value) -> Vec<String> {
        self.config
            .roles_claim
            .as_deref()
            .into_iter()
            .chain(ROLE_CLAIMS.iter().copied())
            .find_map(|path| {
                resolve_path(claims, path, false)
                    .map(string_list)
                    .filter(|roles| !roles.is_empty())
            })
            .unwrap_or_default()
    }

    fn permissions(&self, claims: &Value) -> Option<FhirPermissions> {
        let paths = self
            .config
            .permissions_claim
            .as_deref()
            .into_iter()
            .chain(PERMISSION_CLAIMS.iter().copied());

        for path in paths {
            let Some(value) = resolve_path(claims, path, false) else {
                continue;
            };
            match serde_json::from_value::<FhirPermissions>(value.clone()) {
                Ok(permissions) => return Some(permissions),
                Err(e) => {
                    tracing::warn!(claim = %path, error = %e, "Ignoring malformed permissions claim");
                }
            }
        }

        scope_permissions(&scopes(claims))
    }
}

#[async_trait]
impl CredentialStrategy for JwtStrategy {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn priority(&self) -> i32 {
        self.base.priority()
    }

    fn enabled(&self) -> bool {
        self.base.enabled()
    }

    fn has_permission(
        &self,
        user: &AuthenticatedUser,
        resource_type: &str,
        operation: &str,
        resource: Option<&Value>,
    ) -> bool {
        self.base
            .has_permission(user, resource_type, operation, resource)
    }

    fn can_handle(&self, request: &AuthRequest) -> bool {
        self.base.applies_to(request)
            && request
                .authorization()
                .and_then(parse_bearer)
                .is_some_and(|token| token.split('.').count() == 3)
    }

    async fn authenticate(
        &self,
        request: &AuthRequest,
        _context: &RequestContext,
    ) -> AuthResult<AuthenticatedUser> {
        let token = request
            .authorization()
            .and_then(parse_bearer)
            .ok_or_else(|| AuthError::token(TokenErrorCode::Missing, "No token provided"))?;

        let claims = self.verify(token).await?;
        let user = self.map_claims(token, &claims)?;

        tracing::debug!(user_id = %user.id, "JWT verified");
        Ok(user)
    }

    fn challenge(&self, request: &AuthRequest) -> ChallengeResponse {
        let challenge = ChallengeResponse::new("Bearer", self.base.realm(), "Valid token required");
        if request.authorization().and_then(parse_bearer).is_some() {
            challenge.with_error("invalid_token")
        } else {
            challenge
        }
    }
}

fn parse_public_key(pem: &str) -> AuthResult<DecodingKey> {
    let bytes = pem.as_bytes();
    DecodingKey::from_rsa_pem(bytes)
        .or_else(|_| DecodingKey::from_ec_pem(bytes))
        .or_else(|_| DecodingKey::from_ed_pem(bytes))
        .map_err(|e| AuthError::configuration(format!("Invalid public key PEM: {}", e)))
}

fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

fn secs(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Decodes the payload segment without verifying anything.
fn decode_claims(token: &str) -> AuthResult<Value> {
    let malformed = |msg: &str| AuthError::token(TokenErrorCode::Malformed, msg.to_string());

    let segments: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = segments.as_slice() else {
        return Err(malformed("Malformed token: expected three segments"));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| malformed("Malformed token: invalid payload encoding"))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|_| malformed("Malformed token: payload is not JSON"))?;

    if claims.is_object() {
        Ok(claims)
    } else {
        Err(malformed("Malformed token: payload is not an object"))
    }
}

fn numeric_claim(claims: &Value, name: &str) -> AuthResult<Option<i64>> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| {
                AuthError::token(
                    TokenErrorCode::Malformed,
                    format!("Invalid '{}' claim", name),
                )
            }),
    }
}

fn timestamp_claim(claims: &Value, name: &str) -> Option<OffsetDateTime> {
    numeric_claim(claims, name)
        .ok()
        .flatten()
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
}

fn claim_string(claims: &Value, path: &str) -> Option<String> {
    match resolve_path(claims, path, false)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => s
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn scopes(claims: &Value) -> Vec<String> {
    claims
        .get("scope")
        .or_else(|| claims.get("scp"))
        .map(string_list)
        .unwrap_or_default()
}

/// Maps SMART-style scopes (`patient/Observation.read`, `user/*.cruds`)
/// to the coarse permission gates. Returns `None` when no scope applies.
fn scope_permissions(scopes: &[String]) -> Option<FhirPermissions> {
    let mut permissions = FhirPermissions::default();
    let mut matched = false;

    for scope in scopes {
        let Some((context, rest)) = scope.split_once('/') else {
            continue;
        };
        if !matches!(context, "patient" | "user" | "system") {
            continue;
        }
        let Some((_, access)) = rest.rsplit_once('.') else {
            continue;
        };

        match access {
            "read" => permissions.can_read = true,
            "write" => {
                permissions.can_write = true;
                permissions.can_delete = true;
            }
            "*" => {
                permissions.can_read = true;
                permissions.can_write = true;
                permissions.can_delete = true;
            }
            letters if !letters.is_empty() && letters.chars().all(|c| "cruds".contains(c)) => {
                for c in letters.chars() {
                    match c {
                        'r' | 's' => permissions.can_read = true,
                        'c' | 'u' => permissions.can_write = true,
                        'd' => permissions.can_delete = true,
                        _ => {}
                    }
                }
            }
            _ => continue,
        }
        matched = true;
    }

    matched.then_some(permissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, encode};
    use serde_json::json;
    use std::time::Duration;

    const SECRET: &str = "test-secret-key-with-at-least-32-bytes";

    fn config() -> JwtConfig {
        JwtConfig {
            enabled: true,
            secret: Some(SECRET.to_string()),
            algorithms: vec!["HS256".to_string()],
            ..Default::default()
        }
    }

    fn now() -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }

    fn sign(claims: Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn request(token: &str) -> AuthRequest {
        AuthRequest::new("GET", "/Patient").with_header("Authorization", format!("Bearer {}", token))
    }

    async fn run(strategy: &JwtStrategy, token: &str) -> AuthResult<AuthenticatedUser> {
        strategy
            .authenticate(&request(token), &RequestContext::new())
            .await
    }

    #[test]
    fn test_requires_key_source() {
        let err = JwtStrategy::new(JwtConfig::default()).err().unwrap();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let mut config = config();
        config.algorithms = vec!["XX999".to_string()];
        assert!(JwtStrategy::new(config).is_err());
    }

    #[test]
    fn test_can_handle_jwt_shape_only() {
        let strategy = JwtStrategy::new(config()).unwrap();
        assert!(strategy.can_handle(&request("a.b.c")));
        assert!(!strategy.can_handle(&request("opaque-token")));
        assert!(!strategy.can_handle(&AuthRequest::new("GET", "/")));
    }

    #[tokio::test]
    async fn test_valid_token() {
        let strategy = JwtStrategy::new(config()).unwrap();
        let token = sign(json!({
            "sub": "user-1",
            "preferred_username": "alice",
            "email": "alice@example.com",
            "iat": now(),
            "exp": now() + 3600
        }));

        let user = run(&strategy, &token).await.unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.username.as_deref(), Some("alice"));
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));
        assert!(user.has_role("user"));

        let info = user.token_info.unwrap();
        assert_eq!(info.credential_type, CredentialType::Jwt);
        assert!(info.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_clock_tolerance() {
        let strategy = JwtStrategy::new(config()).unwrap();

        let recently_expired = sign(json!({ "sub": "u", "exp": now() - 30 }));
        assert!(run(&strategy, &recently_expired).await.is_ok());

        let long_expired = sign(json!({ "sub": "u", "exp": now() - 3600 }));
        let err = run(&strategy, &long_expired).await.unwrap_err();
        assert_eq!(err.message(), "Token has expired");
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_not_yet_valid() {
        let strategy = JwtStrategy::new(config()).unwrap();

        let soon = sign(json!({ "sub": "u", "nbf": now() + 30 }));
        assert!(run(&strategy, &soon).await.is_ok());

        let later = sign(json!({ "sub": "u", "nbf": now() + 3600 }));
        let err = run(&strategy, &later).await.unwrap_err();
        assert_eq!(err.message(), "Token not yet valid");
    }

    #[tokio::test]
    async fn test_max_age() {
        let mut config = config();
        config.max_age = Some(Duration::from_secs(600));
        let strategy = JwtStrategy::new(config).unwrap();

        let fresh = sign(json!({ "sub": "u", "iat": now() - 60 }));
        assert!(run(&strategy, &fresh).await.is_ok());

        let old = sign(json!({ "sub": "u", "iat": now() - 7200 }));
        assert_eq!(
            run(&strategy, &old).await.unwrap_err().message(),
            "Token is too old"
        );

        let no_iat = sign(json!({ "sub": "u" }));
        assert!(run(&strategy, &no_iat).await.is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_timestamps() {
        let mut config = config();
        config.max_age = Some(Duration::from_secs(600));
        let strategy = JwtStrategy::new(config).unwrap();

        let far_future = sign(json!({ "sub": "u", "iat": now(), "exp": i64::MAX }));
        assert!(run(&strategy, &far_future).await.is_ok());

        let not_before_end = sign(json!({ "sub": "u", "iat": now(), "nbf": i64::MAX }));
        assert_eq!(
            run(&strategy, &not_before_end).await.unwrap_err().message(),
            "Token not yet valid"
        );

        let ancient = sign(json!({ "sub": "u", "iat": i64::MIN }));
        assert_eq!(
            run(&strategy, &ancient).await.unwrap_err().message(),
            "Token is too old"
        );

        let long_gone = sign(json!({ "sub": "u", "iat": now(), "exp": i64::MIN }));
        assert_eq!(
            run(&strategy, &long_gone).await.unwrap_err().message(),
            "Token has expired"
        );
    }

    #[tokio::test]
    async fn test_missing_token() {
        let strategy = JwtStrategy::new(config()).unwrap();
        let err = strategy
            .authenticate(&AuthRequest::new("GET", "/"), &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "No token provided");
    }

    #[tokio::test]
    async fn test_malformed_token() {
        let strategy = JwtStrategy::new(config()).unwrap();
        let err = run(&strategy, "not.a.jwt").await.unwrap_err();
        assert!(err.is_token_error());
    }

    #[tokio::test]
    async fn test_issuer_and_audience() {
        let mut config = config();
        config.issuer = Some("https://idp.example.com".to_string());
        config.audience = vec!["fhir-api".to_string()];
        let strategy = JwtStrategy::new(config).unwrap();

        let good = sign(json!({
            "sub": "u",
            "iss": "https://idp.example.com",
            "aud": ["other", "fhir-api"]
        }));
        assert!(run(&strategy, &good).await.is_ok());

        let wrong_issuer = sign(json!({ "sub": "u", "iss": "https://evil", "aud": "fhir-api" }));
        assert_eq!(
            run(&strategy, &wrong_issuer).await.unwrap_err().message(),
            "Invalid token issuer"
        );

        let no_audience = sign(json!({ "sub": "u", "iss": "https://idp.example.com" }));
        assert_eq!(
            run(&strategy, &no_audience).await.unwrap_err().message(),
            "Invalid token audience"
        );
    }

    #[tokio::test]
    async fn test_bad_signature() {
        let strategy = JwtStrategy::new(config()).unwrap();
        let forged = encode(
            &Header::new(Algorithm::HS256),
            &json!({ "sub": "u" }),
            &EncodingKey::from_secret(b"another-secret-of-sufficient-length!"),
        )
        .unwrap();

        let err = run(&strategy, &forged).await.unwrap_err();
        assert_eq!(err.message(), "Invalid token signature");
    }

    #[tokio::test]
    async fn test_algorithm_not_allowed() {
        let mut config = config();
        config.algorithms = vec!["RS256".to_string()];
        let strategy = JwtStrategy::new(config).unwrap();

        let token = sign(json!({ "sub": "u" }));
        assert_eq!(
            run(&strategy, &token).await.unwrap_err().message(),
            "Token algorithm not allowed"
        );
    }

    #[tokio::test]
    async fn test_role_claim_fallbacks() {
        let strategy = JwtStrategy::new(config()).unwrap();

        let keycloak = sign(json!({ "sub": "u", "realm_access": { "roles": ["doctor"] } }));
        assert!(run(&strategy, &keycloak).await.unwrap().has_role("doctor"));

        let groups = sign(json!({ "sub": "u", "groups": "nurse admin" }));
        let user = run(&strategy, &groups).await.unwrap();
        assert!(user.has_role("nurse"));
        assert!(user.has_role("admin"));

        let mut config = config();
        config.roles_claim = Some("app.roles".to_string());
        let strategy = JwtStrategy::new(config).unwrap();
        let custom = sign(json!({ "sub": "u", "app": { "roles": ["auditor"] }, "roles": ["x"] }));
        let user = run(&strategy, &custom).await.unwrap();
        assert!(user.has_role("auditor"));
        assert!(!user.has_role("x"));
    }

    #[tokio::test]
    async fn test_permissions_claim() {
        let strategy = JwtStrategy::new(config()).unwrap();
        let token = sign(json!({
            "sub": "u",
            "fhir_permissions": { "canRead": true, "canWrite": true, "canDelete": false }
        }));

        let permissions = run(&strategy, &token).await.unwrap().permissions.unwrap();
        assert!(permissions.can_write);
        assert!(!permissions.can_delete);
    }

    #[tokio::test]
    async fn test_scope_mapping() {
        let strategy = JwtStrategy::new(config()).unwrap();
        let token = sign(json!({ "sub": "u", "scope": "openid patient/Observation.rs user/*.cud" }));

        let permissions = run(&strategy, &token).await.unwrap().permissions.unwrap();
        assert!(permissions.can_read);
        assert!(permissions.can_write);
        assert!(permissions.can_delete);

        let read_only = sign(json!({ "sub": "u", "scope": "openid user/Patient.read" }));
        let permissions = run(&strategy, &read_only).await.unwrap().permissions.unwrap();
        assert!(permissions.can_read);
        assert!(!permissions.can_write);
    }

    #[test]
    fn test_scope_permissions_ignores_unrelated_scopes() {
        assert!(scope_permissions(&["openid".to_string(), "launch/patient".to_string()]).is_none());
    }

    #[tokio::test]
    async fn test_custom_extractor_overrides_mapping() {
        let strategy = JwtStrategy::new(config())
            .unwrap()
            .with_claims_extractor(Arc::new(|claims: &Value| -> AuthResult<AuthenticatedUser> {
                let tenant = claims["tenant"].as_str().unwrap_or("none");
                Ok(AuthenticatedUser::new(format!("{}:{}", tenant, claims["sub"].as_str().unwrap_or("")))
                    .with_roles(["tenant-user"]))
            }));

        let token = sign(json!({ "sub": "u1", "tenant": "acme", "roles": ["admin"] }));
        let user = run(&strategy, &token).await.unwrap();
        assert_eq!(user.id, "acme:u1");
        assert!(user.has_role("tenant-user"));
        assert!(!user.has_role("admin"));
    }

    #[test]
    fn test_needs_refresh() {
        let mut refreshing = config();
        refreshing.enable_refresh = true;
        refreshing.refresh_threshold = Duration::from_secs(300);
        let strategy = JwtStrategy::new(refreshing).unwrap();

        assert!(strategy.needs_refresh(&sign(json!({ "sub": "u", "exp": now() + 60 }))));
        assert!(!strategy.needs_refresh(&sign(json!({ "sub": "u", "exp": now() + 3600 }))));
        assert!(!strategy.needs_refresh(&sign(json!({ "sub": "u" }))));
        assert!(!strategy.needs_refresh("garbage"));
        assert!(strategy.needs_refresh(&sign(json!({ "sub": "u", "exp": i64::MIN }))));
        assert!(!strategy.needs_refresh(&sign(json!({ "sub": "u", "exp": i64::MAX }))));

        let disabled = JwtStrategy::new(config()).unwrap();
        assert!(!disabled.needs_refresh(&sign(json!({ "sub": "u", "exp": now() + 60 }))));
    }

    #[test]
    fn test_challenge_flags_invalid_token() {
        let strategy = JwtStrategy::new(config()).unwrap();
        let challenge = strategy.challenge(&request("a.b.c"));
        assert_eq!(
            challenge.www_authenticate,
            "Bearer realm=\"FHIR Server\", error=\"invalid_token\""
        );
        let bare = strategy.challenge(&AuthRequest::new("GET", "/"));
        assert_eq!(bare.www_authenticate, "Bearer realm=\"FHIR Server\"");
    }

    mod rsa_keys {
        use super::*;
        use rand::rngs::OsRng;
        use rsa::RsaPrivateKey;
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
        use rsa::traits::PublicKeyParts;
        use std::sync::OnceLock;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        struct RsaFixture {
            private_pem: String,
            public_pem: String,
            n: String,
            e: String,
        }

        fn fixture() -> &'static RsaFixture {
            static FIXTURE: OnceLock<RsaFixture> = OnceLock::new();
            FIXTURE.get_or_init(|| {
                let private_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
                let public_key = private_key.to_public_key();
                RsaFixture {
                    private_pem: private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
                    public_pem: public_key.to_public_key_pem(LineEnding::LF).unwrap(),
                    n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
                    e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
                }
            })
        }

        fn sign_rs256(claims: Value, kid: Option<&str>) -> String {
            let mut header = Header::new(Algorithm::RS256);
            header.kid = kid.map(str::to_string);
            let key = EncodingKey::from_rsa_pem(fixture().private_pem.as_bytes()).unwrap();
            encode(&header, &claims, &key).unwrap()
        }

        #[tokio::test]
        async fn test_static_public_key() {
            let strategy = JwtStrategy::new(JwtConfig {
                enabled: true,
                public_key_pem: Some(fixture().public_pem.clone()),
                algorithms: vec!["RS256".to_string()],
                ..Default::default()
            })
            .unwrap();

            let token = sign_rs256(json!({ "sub": "rsa-user", "exp": now() + 60 }), None);
            assert_eq!(run(&strategy, &token).await.unwrap().id, "rsa-user");
        }

        #[tokio::test]
        async fn test_remote_key_set() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/jwks"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "keys": [{
                        "kty": "RSA",
                        "kid": "k1",
                        "use": "sig",
                        "alg": "RS256",
                        "n": fixture().n,
                        "e": fixture().e
                    }]
                })))
                .expect(1)
                .mount(&server)
                .await;

            let strategy = JwtStrategy::new(JwtConfig {
                enabled: true,
                jwks_uri: Some(format!("{}/jwks", server.uri())),
                allow_http_jwks: true,
                algorithms: vec!["RS256".to_string()],
                ..Default::default()
            })
            .unwrap();

            let token = sign_rs256(json!({ "sub": "remote-user" }), Some("k1"));
            assert_eq!(run(&strategy, &token).await.unwrap().id, "remote-user");
            // Second request is served from the cache.
            assert!(run(&strategy, &token).await.is_ok());

            let unknown = sign_rs256(json!({ "sub": "remote-user" }), Some("k2"));
            let err = run(&strategy, &unknown).await.unwrap_err();
            assert_eq!(err.message(), "No matching signing key");
        }
    }
}
