//! End-to-end tests of the authentication engine.
//!
//! These tests build a manager from configuration, register strategies and
//! run full dispatch, mirroring how the server wires the engine.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use octofhir_auth_engine::config::{BasicConfig, BasicUser, BearerConfig};
use octofhir_auth_engine::prelude::*;
use serde_json::{Value, json};
use time::OffsetDateTime;

const JWT_SECRET: &str = "integration-secret-with-enough-entropy";

fn config() -> AuthConfig {
    AuthConfig::from_toml_str(&format!(
        r#"
[manager]
require_auth = true
skip_paths = ["/metadata", "/.well-known/*"]

[basic]
enabled = true

[basic.users.admin]
password = "secret"
roles = ["admin"]

[bearer]
enabled = true

[jwt]
enabled = true
secret = "{JWT_SECRET}"
algorithms = ["HS256"]
clock_tolerance = "60s"

[api_key]
enabled = true
query_param = "api_key"

[api_key.keys.k-123]
id = "svc-reporting"
roles = ["service"]

[session]
enabled = true
session_ttl = "1h"
"#
    ))
    .expect("valid configuration")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn jwt(claims: Value) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("token encodes")
}

async fn run(manager: &AuthManager, request: AuthRequest) -> AuthenticationResult {
    init_tracing();
    manager.authenticate(&request, &RequestContext::new()).await
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_strategies_ordered_by_priority() {
    let manager = AuthManager::from_config(&config()).unwrap();
    assert_eq!(
        manager.strategy_names().await,
        vec!["jwt", "bearer", "api_key", "session", "basic"]
    );
}

#[tokio::test]
async fn test_basic_scenario() {
    let manager = AuthManager::from_config(&config()).unwrap();

    let ok = run(
        &manager,
        AuthRequest::new("GET", "/Patient").with_header("Authorization", "Basic YWRtaW46c2VjcmV0"),
    )
    .await;
    assert!(ok.is_success());
    assert_eq!(ok.strategy(), Some("basic"));
    assert_eq!(ok.user().unwrap().username.as_deref(), Some("admin"));
    assert!(ok.user().unwrap().has_role("admin"));

    let bad = run(
        &manager,
        AuthRequest::new("GET", "/Patient").with_header("Authorization", "Basic YWRtaW46d3Jvbmc="),
    )
    .await;
    assert_eq!(bad.error(), Some("Invalid credentials"));
    assert_eq!(bad.status_code(), 401);
}

#[tokio::test]
async fn test_basic_only_request_skips_bearer() {
    let mut config = AuthConfig {
        basic: BasicConfig {
            enabled: true,
            ..Default::default()
        },
        bearer: BearerConfig {
            enabled: true,
            ..Default::default()
        },
        ..Default::default()
    };
    config.basic.users.insert(
        "admin".to_string(),
        BasicUser {
            password: "secret".to_string(),
            ..Default::default()
        },
    );
    let manager = AuthManager::from_config(&config).unwrap();
    assert_eq!(manager.strategy_names().await, vec!["bearer", "basic"]);

    let request = AuthRequest::new("GET", "/Patient").with_header("Authorization", "Basic YWRtaW46c2VjcmV0");
    let result = run(&manager, request).await;
    assert_eq!(result.strategy(), Some("basic"));

    let stats = manager.stats();
    assert!(!stats.strategy_usage.contains_key("bearer"));
    assert_eq!(stats.strategy_usage["basic"].successes, 1);
}

#[tokio::test]
async fn test_skip_paths() {
    let manager = AuthManager::from_config(&config()).unwrap();

    for path in ["/metadata", "/.well-known/smart-configuration"] {
        let result = run(&manager, AuthRequest::new("GET", path)).await;
        assert!(result.is_success());
        assert!(result.user().is_none());
    }

    let protected = run(&manager, AuthRequest::new("GET", "/Patient")).await;
    assert_eq!(
        protected.error(),
        Some("No authentication strategy can handle this request")
    );
}

// =============================================================================
// Tokens and sessions
// =============================================================================

#[tokio::test]
async fn test_opaque_bearer_token_lifecycle() {
    let manager = AuthManager::from_config(&config()).unwrap();
    let user = AuthenticatedUser::new("u-42").with_username("carol");
    let request = || AuthRequest::new("GET", "/Patient").with_header("Authorization", "bearer opaque-abc");

    manager.store_token("opaque-abc", &user, None).await.unwrap();
    let result = run(&manager, request()).await;
    assert_eq!(result.strategy(), Some("bearer"));
    assert_eq!(result.user().unwrap().id, "u-42");

    assert!(manager.revoke_token("opaque-abc").await.unwrap());
    let revoked = run(&manager, request()).await;
    assert_eq!(revoked.error(), Some("Invalid or expired token"));
}

#[tokio::test]
async fn test_expired_token_is_never_returned() {
    let manager = AuthManager::from_config(&config()).unwrap();
    let past = OffsetDateTime::now_utc() - time::Duration::minutes(5);

    manager
        .store_token("stale", &AuthenticatedUser::new("u1"), Some(past))
        .await
        .unwrap();

    assert!(manager.get_token_user("stale").await.unwrap().is_none());
    let report = manager.cleanup().await.unwrap();
    assert_eq!(report.tokens, 1);
    assert!(manager.get_token_user("stale").await.unwrap().is_none());
}

#[tokio::test]
async fn test_session_authentication() {
    let manager = AuthManager::from_config(&config()).unwrap();
    let session = manager
        .create_session(AuthenticatedUser::new("u-7").with_roles(["nurse"]))
        .await
        .unwrap();

    let request = AuthRequest::new("GET", "/Observation")
        .with_header("Cookie", format!("fhir_session={}", session.id));
    let result = run(&manager, request).await;
    assert_eq!(result.strategy(), Some("session"));
    assert!(result.user().unwrap().has_role("nurse"));

    manager.destroy_session(&session.id).await.unwrap();
    let request = AuthRequest::new("GET", "/Observation")
        .with_header("X-Session-Id", session.id.clone());
    assert_eq!(
        run(&manager, request).await.error(),
        Some("Invalid or expired session")
    );
}

#[tokio::test]
async fn test_api_key_from_query() {
    let manager = AuthManager::from_config(&config()).unwrap();
    let result = run(
        &manager,
        AuthRequest::new("GET", "/Patient").with_query("api_key", "k-123"),
    )
    .await;
    assert_eq!(result.strategy(), Some("api_key"));
    assert_eq!(result.user().unwrap().id, "svc-reporting");
}

// =============================================================================
// JWT
// =============================================================================

#[tokio::test]
async fn test_jwt_clock_tolerance() {
    let manager = AuthManager::from_config(&config()).unwrap();
    let request = |token: String| {
        AuthRequest::new("GET", "/Patient").with_header("Authorization", format!("Bearer {}", token))
    };

    let slightly_expired = jwt(json!({ "sub": "u1", "exp": now() - 30 }));
    let result = run(&manager, request(slightly_expired)).await;
    assert_eq!(result.strategy(), Some("jwt"));

    let long_expired = jwt(json!({ "sub": "u1", "exp": now() - 3600 }));
    let result = run(&manager, request(long_expired)).await;
    // The opaque Bearer strategy also tries the token and fails last.
    assert!(!result.is_success());
    let event = manager
        .audit_events(1)
        .into_iter()
        .next()
        .expect("overall event recorded");
    assert_eq!(event.event_type, AuditEventType::AuthenticationFailure);
    assert_eq!(event.strategy, "bearer");
}

#[tokio::test]
async fn test_jwt_expiry_message_without_opaque_bearer() {
    let mut config = config();
    config.bearer.enabled = false;
    let manager = AuthManager::from_config(&config).unwrap();

    let token = jwt(json!({ "sub": "u1", "exp": now() - 3600 }));
    let result = run(
        &manager,
        AuthRequest::new("GET", "/Patient").with_header("Authorization", format!("Bearer {}", token)),
    )
    .await;
    assert_eq!(result.error(), Some("Token has expired"));
    assert_eq!(result.status_code(), 401);
}

// =============================================================================
// Authorization
// =============================================================================

#[tokio::test]
async fn test_conditional_permission() {
    let manager = AuthManager::default();
    let permissions = FhirPermissions::read_only().with_resource(
        "Patient",
        ResourcePermission::new().with_condition(Condition::new(
            "managingOrganization.reference",
            ConditionOperator::Contains,
            json!("org-123"),
        )),
    );
    let user = AuthenticatedUser::new("u1").with_permissions(permissions);
    let ctx = manager.create_context(AuthRequest::new("GET", "/Patient/1"), Some(user));

    let own = json!({ "managingOrganization": { "reference": "Organization/org-123" } });
    let other = json!({ "managingOrganization": { "reference": "Organization/org-456" } });
    assert!(ctx.check_permission("Patient", "read", Some(&own)));
    assert!(!ctx.check_permission("Patient", "read", Some(&other)));
    assert!(!ctx.check_permission("Patient", "update", Some(&own)));

    let anonymous = manager.create_context(AuthRequest::new("GET", "/Patient/1"), None);
    assert!(!anonymous.check_permission("Patient", "read", Some(&own)));
}

#[tokio::test]
async fn test_custom_validator_through_manager_context() {
    let evaluator = PermissionEvaluator::new().with_validator(
        "same-tenant",
        Arc::new(|actual: &Value, expected: &Value, _resource: &Value| actual == expected),
    );
    let manager = AuthManager::default().with_evaluator(Arc::new(evaluator));
    let permissions = FhirPermissions::read_only().with_resource(
        "Observation",
        ResourcePermission::new().with_condition(Condition::custom(
            "meta.tenant",
            "same-tenant",
            json!("acme"),
        )),
    );
    let ctx = manager.create_context(
        AuthRequest::new("GET", "/Observation"),
        Some(AuthenticatedUser::new("u1").with_permissions(permissions)),
    );

    assert!(ctx.check_permission("Observation", "read", Some(&json!({ "meta": { "tenant": "acme" } }))));
    assert!(!ctx.check_permission("Observation", "read", Some(&json!({ "meta": { "tenant": "other" } }))));
}

// =============================================================================
// Registry and housekeeping
// =============================================================================

#[tokio::test]
async fn test_duplicate_registration_keeps_count() {
    let manager = AuthManager::from_config(&config()).unwrap();
    let before = manager.strategy_names().await.len();

    let err = manager
        .register_strategy(Arc::new(BasicStrategy::new()))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert_eq!(manager.strategy_names().await.len(), before);
}

#[tokio::test]
async fn test_background_cleanup() {
    let manager = Arc::new(AuthManager::from_config(&config()).unwrap());
    let past = OffsetDateTime::now_utc() - time::Duration::seconds(1);
    manager
        .store_token("old", &AuthenticatedUser::new("u1"), Some(past))
        .await
        .unwrap();

    let task = manager.spawn_cleanup_task(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(100)).await;
    task.shutdown().await;

    assert_eq!(manager.cleanup().await.unwrap(), CleanupReport::default());
}

// =============================================================================
// Panic isolation
// =============================================================================

struct PanickingStrategy;

#[async_trait::async_trait]
impl CredentialStrategy for PanickingStrategy {
    fn name(&self) -> &str {
        "panicking"
    }

    fn priority(&self) -> i32 {
        200
    }

    fn can_handle(&self, _request: &AuthRequest) -> bool {
        true
    }

    async fn authenticate(
        &self,
        _request: &AuthRequest,
        _context: &RequestContext,
    ) -> AuthResult<AuthenticatedUser> {
        panic!("strategy bug");
    }

    fn challenge(&self, _request: &AuthRequest) -> ChallengeResponse {
        ChallengeResponse::generic()
    }
}

#[tokio::test]
async fn test_panicking_strategy_falls_through_to_basic() {
    let manager = AuthManager::default();
    manager
        .register_strategy(Arc::new(PanickingStrategy))
        .await
        .unwrap();
    manager
        .register_strategy(Arc::new(BasicStrategy::new().with_user("admin", "secret")))
        .await
        .unwrap();

    let request = AuthRequest::new("GET", "/Patient").with_header("Authorization", "Basic YWRtaW46c2VjcmV0");
    let result = run(&manager, request).await;
    assert_eq!(result.strategy(), Some("basic"));
    assert_eq!(manager.stats().strategy_usage["panicking"].failures, 1);
}

#[test]
fn test_release_profile_keeps_unwinding() {
    let manifest = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/../../Cargo.toml"))
        .expect("workspace manifest readable");
    let manifest: toml::Table = toml::from_str(&manifest).expect("workspace manifest parses");

    for profile in ["release", "dev", "bench"] {
        let panic = manifest
            .get("profile")
            .and_then(|p| p.get(profile))
            .and_then(|p| p.get("panic"))
            .and_then(|v| v.as_str());
        assert_ne!(
            panic,
            Some("abort"),
            "strategy panic isolation needs unwinding in the {} profile",
            profile
        );
    }
}
