//! Remote signing-key cache.
//!
//! Fetches a JSON Web Key Set from one endpoint and caches it for a fixed
//! TTL. Lookups always consult the cache first; the network is only hit
//! when the cache is empty or stale. A `kid` missing from a fresh cache is
//! a failure, not a reason to refetch.

use std::time::Duration;

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use tokio::time::Instant;
use url::Url;

use crate::error::{AuthError, TokenErrorCode};

/// Configuration for [`JwksCache`].
#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    /// How long a fetched key set stays valid (default: 1 hour).
    pub ttl: Duration,

    /// HTTP request timeout (default: 5 seconds).
    pub request_timeout: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Whether to allow HTTP (non-HTTPS) endpoints.
    pub allow_http: bool,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(5),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl JwksCacheConfig {
    /// Sets the cache TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the maximum response size.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Allows HTTP (non-HTTPS) endpoints. Testing only.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Errors raised while resolving signing keys.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// The endpoint could not be reached.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The endpoint answered with a non-success status.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The response body is not a key set.
    #[error("Failed to parse JWKS: {0}")]
    ParseError(String),

    /// No key carries the requested `kid`.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The key set has no usable signing keys.
    #[error("No signing keys found in JWKS")]
    NoSigningKeys,

    /// Only HTTPS endpoints are allowed.
    #[error("Invalid URL scheme: only HTTPS is allowed")]
    InvalidScheme,

    /// The response exceeded the size limit.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

impl From<JwksError> for AuthError {
    fn from(err: JwksError) -> Self {
        match err {
            JwksError::KeyNotFound(_) | JwksError::NoSigningKeys => {
                AuthError::token(TokenErrorCode::UnknownKey, "No matching signing key")
            }
            other => AuthError::key_set(other.to_string()),
        }
    }
}

/// A signing key ready for verification.
#[derive(Clone)]
pub struct ResolvedKey {
    /// Key id, if the key set declared one.
    pub kid: Option<String>,
    /// Verification key.
    pub key: DecodingKey,
    /// Declared algorithm, if any.
    pub algorithm: Option<Algorithm>,
}

impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

/// TTL cache for a single key-set endpoint.
pub struct JwksCache {
    uri: Url,
    http_client: reqwest::Client,
    cached: RwLock<Option<CachedJwks>>,
    config: JwksCacheConfig,
}

impl JwksCache {
    /// Creates a cache for an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::InvalidScheme`] for non-HTTPS endpoints unless
    /// HTTP is allowed.
    pub fn new(uri: Url, config: JwksCacheConfig) -> Result<Self, JwksError> {
        validate_scheme(&uri, config.allow_http)?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for JWKS");
                reqwest::Client::new()
            });

        Ok(Self {
            uri,
            http_client,
            cached: RwLock::new(None),
            config,
        })
    }

    /// The endpoint this cache fetches from.
    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Returns the key with the given `kid`.
    pub async fn get_key(&self, kid: &str) -> Result<ResolvedKey, JwksError> {
        self.ensure_fresh().await?;

        let cached = self.cached.read().await;
        cached
            .as_ref()
            .and_then(|c| c.jwks.keys.iter().find(|k| k.common.key_id.as_deref() == Some(kid)))
            .and_then(resolve)
            .ok_or_else(|| JwksError::KeyNotFound(kid.to_string()))
    }

    /// Returns every signing key (keys marked `use: enc` are excluded).
    pub async fn signing_keys(&self) -> Result<Vec<ResolvedKey>, JwksError> {
        self.ensure_fresh().await?;

        let cached = self.cached.read().await;
        let keys: Vec<_> = cached
            .as_ref()
            .map(|c| {
                c.jwks
                    .keys
                    .iter()
                    .filter(|k| {
                        !matches!(&k.common.public_key_use, Some(PublicKeyUse::Encryption))
                    })
                    .filter_map(resolve)
                    .collect()
            })
            .unwrap_or_default();

        if keys.is_empty() {
            Err(JwksError::NoSigningKeys)
        } else {
            Ok(keys)
        }
    }

    /// Returns `true` if a fresh key set is cached.
    pub async fn is_fresh(&self) -> bool {
        self.cached
            .read()
            .await
            .as_ref()
            .is_some_and(|c| Instant::now() < c.expires_at)
    }

    /// Drops the cached key set.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        tracing::debug!(uri = %self.uri, "Invalidated JWKS cache");
    }

    async fn ensure_fresh(&self) -> Result<(), JwksError> {
        if self.is_fresh().await {
            tracing::trace!(uri = %self.uri, "JWKS cache hit");
            return Ok(());
        }

        let mut cached = self.cached.write().await;
        // Re-check under the write lock.
        if cached
            .as_ref()
            .is_some_and(|c| Instant::now() < c.expires_at)
        {
            return Ok(());
        }

        let jwks = self.fetch().await?;
        *cached = Some(CachedJwks {
            jwks,
            expires_at: Instant::now() + self.config.ttl,
        });
        Ok(())
    }

    async fn fetch(&self) -> Result<JwkSet, JwksError> {
        tracing::debug!(uri = %self.uri, "Fetching JWKS");

        let response = self
            .http_client
            .get(self.uri.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(uri = %self.uri, error = %e, "Failed to fetch JWKS");
                JwksError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(JwksError::HttpError(response.status().as_u16()));
        }

        let max_size = self.config.max_response_size;
        if response
            .content_length()
            .is_some_and(|len| len as usize > max_size)
        {
            return Err(JwksError::ResponseTooLarge { max_size });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| JwksError::NetworkError(e.to_string()))?;
        if body.len() > max_size {
            return Err(JwksError::ResponseTooLarge { max_size });
        }

        let jwks: JwkSet =
            serde_json::from_slice(&body).map_err(|e| JwksError::ParseError(e.to_string()))?;

        tracing::debug!(uri = %self.uri, keys = jwks.keys.len(), "Cached JWKS");
        Ok(jwks)
    }
}

fn validate_scheme(uri: &Url, allow_http: bool) -> Result<(), JwksError> {
    match uri.scheme() {
        "https" => Ok(()),
        "http" if allow_http => Ok(()),
        _ => Err(JwksError::InvalidScheme),
    }
}

fn resolve(jwk: &Jwk) -> Option<ResolvedKey> {
    match DecodingKey::from_jwk(jwk) {
        Ok(key) => Some(ResolvedKey {
            kid: jwk.common.key_id.clone(),
            key,
            algorithm: jwk_algorithm(jwk),
        }),
        Err(e) => {
            tracing::debug!(kid = ?jwk.common.key_id, error = %e, "Skipping unusable JWK");
            None
        }
    }
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_jwks() -> serde_json::Value {
        json!({
            "keys": [
                {
                    "kty": "RSA",
                    "kid": "sig-1",
                    "use": "sig",
                    "alg": "RS256",
                    "n": "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw",
                    "e": "AQAB"
                },
                {
                    "kty": "RSA",
                    "kid": "enc-1",
                    "use": "enc",
                    "n": "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw",
                    "e": "AQAB"
                }
            ]
        })
    }

    async fn cache_for(server: &MockServer, config: JwksCacheConfig) -> JwksCache {
        let uri = Url::parse(&format!("{}/jwks", server.uri())).unwrap();
        JwksCache::new(uri, config.with_allow_http(true)).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = JwksCacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_response_size, 1024 * 1024);
        assert!(!config.allow_http);
    }

    #[test]
    fn test_http_rejected_by_default() {
        let uri = Url::parse("http://idp.local/jwks").unwrap();
        assert!(matches!(
            JwksCache::new(uri.clone(), JwksCacheConfig::default()),
            Err(JwksError::InvalidScheme)
        ));
        assert!(JwksCache::new(uri, JwksCacheConfig::default().with_allow_http(true)).is_ok());
    }

    #[tokio::test]
    async fn test_get_key_by_kid_fetches_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_jwks()))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, JwksCacheConfig::default()).await;
        let key = cache.get_key("sig-1").await.unwrap();
        assert_eq!(key.kid.as_deref(), Some("sig-1"));
        assert_eq!(key.algorithm, Some(Algorithm::RS256));

        // Served from cache.
        assert!(cache.get_key("sig-1").await.is_ok());
        assert!(cache.is_fresh().await);
    }

    #[tokio::test]
    async fn test_unknown_kid_does_not_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_jwks()))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, JwksCacheConfig::default()).await;
        assert!(cache.get_key("sig-1").await.is_ok());
        assert!(matches!(
            cache.get_key("rotated").await,
            Err(JwksError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_signing_keys_exclude_encryption_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_jwks()))
            .mount(&server)
            .await;

        let cache = cache_for(&server, JwksCacheConfig::default()).await;
        let keys = cache.signing_keys().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].kid.as_deref(), Some("sig-1"));
    }

    #[tokio::test]
    async fn test_expired_cache_refetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_jwks()))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache_for(&server, JwksCacheConfig::default().with_ttl(Duration::ZERO)).await;
        assert!(cache.get_key("sig-1").await.is_ok());
        assert!(cache.get_key("sig-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_jwks()))
            .mount(&server)
            .await;

        let cache = cache_for(&server, JwksCacheConfig::default()).await;
        cache.signing_keys().await.unwrap();
        cache.invalidate().await;
        assert!(!cache.is_fresh().await);
    }

    #[tokio::test]
    async fn test_http_error_maps_to_key_set_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = cache_for(&server, JwksCacheConfig::default()).await;
        let err = cache.get_key("sig-1").await.unwrap_err();
        assert!(matches!(err, JwksError::HttpError(500)));

        let auth_err = AuthError::from(err);
        assert_eq!(auth_err.status_code(), 503);
    }

    #[tokio::test]
    async fn test_response_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_jwks()))
            .mount(&server)
            .await;

        let cache = cache_for(&server, JwksCacheConfig::default().with_max_response_size(16)).await;
        assert!(matches!(
            cache.signing_keys().await,
            Err(JwksError::ResponseTooLarge { max_size: 16 })
        ));
    }

    #[test]
    fn test_missing_key_maps_to_unknown_key() {
        let err = AuthError::from(JwksError::KeyNotFound("x".to_string()));
        assert!(err.is_token_error());
        assert_eq!(err.status_code(), 401);
    }
}
