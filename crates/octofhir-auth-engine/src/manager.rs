//! Authentication manager.
//!
//! The manager owns the strategy registry and runs the dispatch loop for
//! each request:
//!
//! 1. Globally skipped paths succeed anonymously.
//! 2. Enabled strategies whose `can_handle` accepts the request become
//!    candidates, in descending priority (ties keep registration order).
//! 3. Without candidates the request fails, or passes anonymously when
//!    `require_auth` is off.
//! 4. Candidates run in order until one succeeds. Errors, panics and
//!    timeouts only end the current attempt; the last failure is reported.
//!
//! It also fronts token and session storage, keeps counters and a bounded
//! audit log, and can run periodic storage cleanup.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::AuthResult;
use crate::audit::{AuditEvent, AuditEventType, AuditLog};
use crate::config::{AuthConfig, ManagerConfig, StrategyScope};
use crate::context::AuthContext;
use crate::error::AuthError;
use crate::paths::PathPatterns;
use crate::policy::PermissionEvaluator;
use crate::storage::{
    InMemorySessionStorage, InMemoryTokenStorage, SessionData, SessionStorage, SessionUpdate,
    TokenStorage, fingerprint,
};
use crate::strategy::base::audit_attempt;
use crate::strategy::{
    ApiKeyStrategy, BasicStrategy, BearerStrategy, CredentialStrategy, JwtStrategy,
    SessionStrategy,
};
use crate::types::{
    AuthRequest, AuthenticatedUser, AuthenticationResult, ChallengeResponse, RequestContext,
};

const NO_STRATEGY: &str = "No authentication strategy can handle this request";

// =============================================================================
// Statistics
// =============================================================================

/// Per-strategy attempt counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrategyUsage {
    /// Attempts made with this strategy.
    pub attempts: u64,
    /// Attempts that verified a user.
    pub successes: u64,
    /// Attempts that failed, panicked or timed out.
    pub failures: u64,
}

/// Snapshot of the manager counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStats {
    /// Requests that went through the dispatch loop.
    pub total_attempts: u64,
    /// Requests that ended in success (anonymous pass-through included).
    pub successful_attempts: u64,
    /// Requests that ended in failure.
    pub failed_attempts: u64,
    /// Mean time spent in the dispatch loop.
    pub average_latency_ms: f64,
    /// Counters per strategy name.
    pub strategy_usage: BTreeMap<String, StrategyUsage>,
}

/// Number of records removed by [`AuthManager::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Expired tokens removed.
    pub tokens: usize,
    /// Expired sessions removed.
    pub sessions: usize,
}

// =============================================================================
// Manager
// =============================================================================

/// Registry and dispatcher of credential strategies.
pub struct AuthManager {
    strategies: RwLock<Vec<Arc<dyn CredentialStrategy>>>,
    config: ManagerConfig,
    skip_paths: PathPatterns,
    evaluator: Arc<PermissionEvaluator>,
    token_storage: Arc<dyn TokenStorage>,
    session_storage: Arc<dyn SessionStorage>,
    session_ttl: Option<Duration>,
    audit_log: AuditLog,

    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_latency_us: AtomicU64,
    usage: Mutex<BTreeMap<String, StrategyUsage>>,
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl AuthManager {
    /// Creates a manager without strategies, backed by in-memory storage.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            strategies: RwLock::new(Vec::new()),
            skip_paths: PathPatterns::new(&config.skip_paths),
            audit_log: AuditLog::new(config.audit_log_capacity),
            config,
            evaluator: Arc::new(PermissionEvaluator::new()),
            token_storage: Arc::new(InMemoryTokenStorage::new()),
            session_storage: Arc::new(InMemorySessionStorage::new()),
            session_ttl: None,
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            usage: Mutex::new(BTreeMap::new()),
        }
    }

    /// Builds a manager and registers every enabled strategy from
    /// configuration, using in-memory storage.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if validation or strategy setup fails.
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        Self::from_config_with_storage(
            config,
            Arc::new(InMemoryTokenStorage::new()),
            Arc::new(InMemorySessionStorage::new()),
        )
    }

    /// Like [`from_config`](Self::from_config) with caller-provided storage.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if validation or strategy setup fails.
    pub fn from_config_with_storage(
        config: &AuthConfig,
        token_storage: Arc<dyn TokenStorage>,
        session_storage: Arc<dyn SessionStorage>,
    ) -> AuthResult<Self> {
        let evaluator = PermissionEvaluator::new()
            .with_array_index_fallback(config.permissions.array_index_fallback);
        Self::build(config, Arc::new(evaluator), token_storage, session_storage)
    }

    /// Like [`from_config`](Self::from_config) with a caller-provided
    /// evaluator, shared by the configured strategies and created contexts.
    ///
    /// The evaluator's own array index setting is used instead of
    /// `permissions.array_index_fallback`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if validation or strategy setup fails.
    pub fn from_config_with_evaluator(
        config: &AuthConfig,
        evaluator: Arc<PermissionEvaluator>,
    ) -> AuthResult<Self> {
        Self::build(
            config,
            evaluator,
            Arc::new(InMemoryTokenStorage::new()),
            Arc::new(InMemorySessionStorage::new()),
        )
    }

    fn build(
        config: &AuthConfig,
        evaluator: Arc<PermissionEvaluator>,
        token_storage: Arc<dyn TokenStorage>,
        session_storage: Arc<dyn SessionStorage>,
    ) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        let realm = &config.manager.realm;
        let permissions = &config.permissions;
        let mut strategies: Vec<Arc<dyn CredentialStrategy>> = Vec::new();

        if config.jwt.enabled {
            let mut jwt = config.jwt.clone();
            inherit_realm(&mut jwt.scope, realm);
            strategies.push(Arc::new(
                JwtStrategy::from_config(&jwt, permissions)?
                    .with_evaluator(Arc::clone(&evaluator)),
            ));
        }
        if config.bearer.enabled {
            let mut bearer = config.bearer.clone();
            inherit_realm(&mut bearer.scope, realm);
            strategies.push(Arc::new(
                BearerStrategy::from_config(&bearer, permissions, Arc::clone(&token_storage))
                    .with_evaluator(Arc::clone(&evaluator)),
            ));
        }
        if config.api_key.enabled {
            let mut api_key = config.api_key.clone();
            inherit_realm(&mut api_key.scope, realm);
            strategies.push(Arc::new(
                ApiKeyStrategy::from_config(&api_key, permissions)
                    .with_evaluator(Arc::clone(&evaluator)),
            ));
        }
        if config.session.enabled {
            let mut session = config.session.clone();
            inherit_realm(&mut session.scope, realm);
            strategies.push(Arc::new(
                SessionStrategy::from_config(&session, permissions, Arc::clone(&session_storage))
                    .with_evaluator(Arc::clone(&evaluator)),
            ));
        }
        if config.basic.enabled {
            let mut basic = config.basic.clone();
            inherit_realm(&mut basic.scope, realm);
            strategies.push(Arc::new(
                BasicStrategy::from_config(&basic, permissions)
                    .with_evaluator(Arc::clone(&evaluator)),
            ));
        }

        strategies.sort_by_key(|s| Reverse(s.priority()));

        tracing::info!(
            strategies = ?strategies.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            require_auth = config.manager.require_auth,
            "Authentication manager configured"
        );

        let mut manager = Self::new(config.manager.clone())
            .with_evaluator(evaluator)
            .with_token_storage(token_storage)
            .with_session_storage(session_storage)
            .with_session_ttl(config.session.session_ttl);
        manager.strategies = RwLock::new(strategies);
        Ok(manager)
    }

    /// Uses a custom evaluator for contexts created by this manager.
    ///
    /// Strategies keep their own evaluator. Use
    /// [`from_config_with_evaluator`](Self::from_config_with_evaluator) or
    /// the strategies' `with_evaluator` to share one.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<PermissionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Uses the given token storage.
    #[must_use]
    pub fn with_token_storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.token_storage = storage;
        self
    }

    /// Uses the given session storage.
    #[must_use]
    pub fn with_session_storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.session_storage = storage;
        self
    }

    /// Lifetime of sessions created through [`create_session`](Self::create_session).
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = Some(ttl);
        self
    }

    /// Manager settings.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Evaluator shared with created contexts.
    #[must_use]
    pub fn evaluator(&self) -> &Arc<PermissionEvaluator> {
        &self.evaluator
    }

    // -------------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------------

    /// Registers a strategy.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DuplicateStrategy`] if the name is taken.
    pub async fn register_strategy(&self, strategy: Arc<dyn CredentialStrategy>) -> AuthResult<()> {
        let mut strategies = self.strategies.write().await;
        if strategies.iter().any(|s| s.name() == strategy.name()) {
            return Err(AuthError::duplicate_strategy(strategy.name()));
        }

        tracing::info!(
            strategy = %strategy.name(),
            priority = strategy.priority(),
            "Registered authentication strategy"
        );
        strategies.push(strategy);
        strategies.sort_by_key(|s| Reverse(s.priority()));
        Ok(())
    }

    /// Removes a strategy by name. Returns `true` if one was removed.
    pub async fn unregister_strategy(&self, name: &str) -> bool {
        let mut strategies = self.strategies.write().await;
        let before = strategies.len();
        strategies.retain(|s| s.name() != name);
        let removed = strategies.len() != before;
        if removed {
            tracing::info!(strategy = %name, "Unregistered authentication strategy");
        }
        removed
    }

    /// Registered strategy names in dispatch order.
    pub async fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .read()
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Looks up a registered strategy by name.
    pub async fn strategy(&self, name: &str) -> Option<Arc<dyn CredentialStrategy>> {
        self.strategies
            .read()
            .await
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    async fn candidates(&self, request: &AuthRequest) -> Vec<Arc<dyn CredentialStrategy>> {
        self.strategies
            .read()
            .await
            .iter()
            .filter(|s| s.enabled() && s.can_handle(request))
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Authenticates a request.
    pub async fn authenticate(
        &self,
        request: &AuthRequest,
        context: &RequestContext,
    ) -> AuthenticationResult {
        let started = Instant::now();

        if self.skip_paths.matches(&request.path) {
            tracing::debug!(path = %request.path, "Path bypasses authentication");
            self.audit_log.record(
                AuditEvent::new(AuditEventType::AuthenticationSkipped, "manager", true)
                    .path(request.path.clone()),
            );
            return AuthenticationResult::anonymous();
        }

        let candidates = self.candidates(request).await;

        if candidates.is_empty() {
            let result = if self.config.require_auth {
                AuthenticationResult::failure(NO_STRATEGY, 401)
            } else {
                AuthenticationResult::anonymous()
            };
            self.finish(request, None, &result, started);
            return result;
        }

        let mut last_error = None;
        for strategy in &candidates {
            match self.attempt(strategy.as_ref(), request, context).await {
                Ok(user) => {
                    let result = AuthenticationResult::authenticated(user, strategy.name());
                    self.finish(request, Some(strategy.name()), &result, started);
                    return result;
                }
                Err(err) => last_error = Some((strategy.name().to_string(), err)),
            }
        }

        let (strategy, result) = match &last_error {
            Some((name, err)) => (Some(name.as_str()), AuthenticationResult::from(err)),
            None => (None, AuthenticationResult::failure(NO_STRATEGY, 401)),
        };
        self.finish(request, strategy, &result, started);
        result
    }

    /// Authenticates a request and wraps the outcome in an [`AuthContext`].
    ///
    /// # Errors
    ///
    /// Returns the failed result when no strategy verified the request.
    pub async fn authenticate_context(
        &self,
        request: AuthRequest,
        context: &RequestContext,
    ) -> Result<AuthContext, AuthenticationResult> {
        let result = self.authenticate(&request, context).await;
        if !result.is_success() {
            return Err(result);
        }
        let strategy = result.strategy().map(str::to_string);
        let ctx = self.create_context(request, result.into_user());
        Ok(match strategy {
            Some(name) => ctx.with_strategy(name),
            None => ctx,
        })
    }

    async fn attempt(
        &self,
        strategy: &dyn CredentialStrategy,
        request: &AuthRequest,
        context: &RequestContext,
    ) -> AuthResult<AuthenticatedUser> {
        let name = strategy.name();
        let started = Instant::now();

        let outcome = match self.attempt_budget(context) {
            None => Err(AuthError::strategy(name, "Request deadline exceeded")),
            Some(budget) => {
                let guarded = AssertUnwindSafe(strategy.authenticate(request, context)).catch_unwind();
                match tokio::time::timeout(budget, guarded).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => {
                        tracing::warn!(
                            strategy = %name,
                            panic = %panic_message(panic.as_ref()),
                            "Strategy panicked"
                        );
                        Err(AuthError::strategy(name, "Strategy failed unexpectedly"))
                    }
                    Err(_) => {
                        tracing::warn!(
                            strategy = %name,
                            timeout_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                            "Strategy timed out"
                        );
                        Err(AuthError::strategy(name, "Strategy timed out"))
                    }
                }
            }
        };

        if let Err(err) = &outcome {
            tracing::debug!(strategy = %name, error = %err, "Strategy rejected request");
        }

        self.record_usage(name, outcome.is_ok());
        audit_attempt(name, request, outcome.as_ref(), started.elapsed());
        outcome
    }

    /// Time left for one attempt, or `None` once the request deadline passed.
    fn attempt_budget(&self, context: &RequestContext) -> Option<Duration> {
        let budget = self.config.strategy_timeout;
        match context.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                (!remaining.is_zero()).then(|| budget.min(remaining))
            }
            None => Some(budget),
        }
    }

    fn record_usage(&self, strategy: &str, success: bool) {
        let mut usage = self.usage.lock();
        let entry = usage.entry(strategy.to_string()).or_default();
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    fn finish(
        &self,
        request: &AuthRequest,
        strategy: Option<&str>,
        result: &AuthenticationResult,
        started: Instant,
    ) {
        let elapsed = started.elapsed();
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );

        let success = result.is_success();
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        let event_type = if success {
            AuditEventType::AuthenticationSuccess
        } else {
            AuditEventType::AuthenticationFailure
        };
        let mut event = AuditEvent::new(event_type, strategy.unwrap_or("manager"), success)
            .path(request.path.clone())
            .duration_ms(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        if let Some(user) = result.user() {
            event = event.user(user.id.clone(), user.username.clone());
        }
        if let Some(error) = result.error() {
            event = event.error(error);
        }

        event.emit();
        self.audit_log.record(event);
    }

    /// Challenge of the first applicable strategy, or the generic
    /// `Bearer` challenge.
    pub async fn create_challenge(&self, request: &AuthRequest) -> ChallengeResponse {
        match self.candidates(request).await.first() {
            Some(strategy) => strategy.challenge(request),
            None => ChallengeResponse::new("Bearer", &self.config.realm, "Authentication required"),
        }
    }

    /// Wraps a request and an optional user in an [`AuthContext`].
    #[must_use]
    pub fn create_context(&self, request: AuthRequest, user: Option<AuthenticatedUser>) -> AuthContext {
        AuthContext::new(request, user, Arc::clone(&self.evaluator))
    }

    // -------------------------------------------------------------------------
    // Tokens and sessions
    // -------------------------------------------------------------------------

    /// Stores an opaque token for a user.
    pub async fn store_token(
        &self,
        token: &str,
        user: &AuthenticatedUser,
        expires_at: Option<OffsetDateTime>,
    ) -> AuthResult<()> {
        self.token_storage.store(token, user, expires_at).await
    }

    /// Resolves a live token.
    pub async fn get_token_user(&self, token: &str) -> AuthResult<Option<AuthenticatedUser>> {
        self.token_storage.retrieve(token).await
    }

    /// Revokes a token. Returns `true` if it existed.
    pub async fn revoke_token(&self, token: &str) -> AuthResult<bool> {
        let revoked = self.token_storage.revoke(token).await?;
        if revoked {
            tracing::info!(token = %fingerprint(token), "Token revoked");
            self.audit_log
                .record(AuditEvent::new(AuditEventType::TokenRevoked, "manager", true));
        }
        Ok(revoked)
    }

    /// Creates a session with a random id and the configured lifetime.
    pub async fn create_session(&self, user: AuthenticatedUser) -> AuthResult<SessionData> {
        let now = OffsetDateTime::now_utc();
        let expires_at = self
            .session_ttl
            .and_then(|ttl| time::Duration::try_from(ttl).ok())
            .and_then(|ttl| now.checked_add(ttl));

        let session = SessionData::new(Uuid::new_v4().to_string(), user, expires_at);
        self.session_storage.create(&session).await?;

        self.audit_log.record(
            AuditEvent::new(AuditEventType::SessionCreated, "manager", true)
                .user(session.user.id.clone(), session.user.username.clone()),
        );
        Ok(session)
    }

    /// Returns a live session.
    pub async fn get_session(&self, id: &str) -> AuthResult<Option<SessionData>> {
        self.session_storage.get(id).await
    }

    /// Applies a partial update to a live session.
    pub async fn update_session(
        &self,
        id: &str,
        update: SessionUpdate,
    ) -> AuthResult<Option<SessionData>> {
        self.session_storage.update(id, update).await
    }

    /// Destroys a session. Returns `true` if it existed.
    pub async fn destroy_session(&self, id: &str) -> AuthResult<bool> {
        let destroyed = self.session_storage.destroy(id).await?;
        if destroyed {
            self.audit_log
                .record(AuditEvent::new(AuditEventType::SessionDestroyed, "manager", true));
        }
        Ok(destroyed)
    }

    /// Removes expired tokens and sessions.
    pub async fn cleanup(&self) -> AuthResult<CleanupReport> {
        let report = CleanupReport {
            tokens: self.token_storage.cleanup().await?,
            sessions: self.session_storage.cleanup().await?,
        };
        if report.tokens > 0 || report.sessions > 0 {
            tracing::info!(
                tokens = report.tokens,
                sessions = report.sessions,
                "Removed expired credentials"
            );
        }
        Ok(report)
    }

    /// Runs [`cleanup`](Self::cleanup) every `interval` until the returned
    /// handle is shut down.
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> CleanupTask {
        let (shutdown, mut signal) = watch::channel(false);
        let manager = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = manager.cleanup().await {
                            tracing::warn!(error = %e, "Credential cleanup failed");
                        }
                    }
                    _ = signal.changed() => {
                        tracing::debug!("Credential cleanup task stopping");
                        break;
                    }
                }
            }
        });

        CleanupTask { shutdown, handle }
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> AuthStats {
        let total_attempts = self.attempts.load(Ordering::Relaxed);
        let total_latency_us = self.total_latency_us.load(Ordering::Relaxed);
        let average_latency_ms = if total_attempts == 0 {
            0.0
        } else {
            total_latency_us as f64 / total_attempts as f64 / 1000.0
        };

        AuthStats {
            total_attempts,
            successful_attempts: self.successes.load(Ordering::Relaxed),
            failed_attempts: self.failures.load(Ordering::Relaxed),
            average_latency_ms,
            strategy_usage: self.usage.lock().clone(),
        }
    }

    /// Zeroes every counter.
    pub fn reset_stats(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
        self.usage.lock().clear();
    }

    /// Up to `limit` audit events, most recent first.
    #[must_use]
    pub fn audit_events(&self, limit: usize) -> Vec<AuditEvent> {
        self.audit_log.recent(limit)
    }

    /// Empties the audit log.
    pub fn clear_audit_log(&self) {
        self.audit_log.clear();
    }
}

/// Handle of a running cleanup task.
#[derive(Debug)]
pub struct CleanupTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Stops the task and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Credential cleanup task ended abnormally");
        }
    }
}

fn inherit_realm(scope: &mut StrategyScope, realm: &str) {
    if scope.realm.is_none() {
        scope.realm = Some(realm.to_string());
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
