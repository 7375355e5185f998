//! Authentication audit trail.
//!
//! Two sinks receive events:
//!
//! - the structured log stream, one record per strategy attempt, under the
//!   `octofhir_auth_engine::audit` tracing target
//! - the manager's bounded in-memory [`AuditLog`], one event per request
//!   (most recent first, oldest evicted at capacity)

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Tracing target for audit records.
pub const AUDIT_TARGET: &str = "octofhir_auth_engine::audit";

/// Kind of audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A strategy attempted to verify a credential.
    StrategyAttempt,
    /// A request was authenticated.
    AuthenticationSuccess,
    /// A request was rejected.
    AuthenticationFailure,
    /// A request bypassed authentication (skip path or anonymous access).
    AuthenticationSkipped,
    /// A token was revoked.
    TokenRevoked,
    /// A session was created.
    SessionCreated,
    /// A session was destroyed.
    SessionDestroyed,
}

impl AuditEventType {
    /// Dotted event code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrategyAttempt => "auth.strategy_attempt",
            Self::AuthenticationSuccess => "auth.success",
            Self::AuthenticationFailure => "auth.failure",
            Self::AuthenticationSkipped => "auth.skipped",
            Self::TokenRevoked => "token.revoked",
            Self::SessionCreated => "session.created",
            Self::SessionDestroyed => "session.destroyed",
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Event kind.
    pub event_type: AuditEventType,

    /// When the event happened.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    /// Strategy involved, or `manager` for request-level events.
    pub strategy: String,

    /// Authenticated user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Authenticated user name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Whether the action succeeded.
    pub success: bool,

    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Request path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Elapsed time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AuditEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event_type: AuditEventType, strategy: impl Into<String>, success: bool) -> Self {
        Self {
            event_type,
            timestamp: OffsetDateTime::now_utc(),
            strategy: strategy.into(),
            user_id: None,
            username: None,
            success,
            error: None,
            path: None,
            duration_ms: None,
        }
    }

    /// Sets the user fields.
    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>, username: Option<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.username = username;
        self
    }

    /// Sets the failure message.
    #[must_use]
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Sets the request path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the elapsed time.
    #[must_use]
    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Writes the event to the structured log stream.
    pub fn emit(&self) {
        let user_id = self.user_id.as_deref().unwrap_or("-");
        let path = self.path.as_deref().unwrap_or("-");
        if self.success {
            tracing::info!(
                target: AUDIT_TARGET,
                event = self.event_type.as_str(),
                strategy = %self.strategy,
                user_id = %user_id,
                path = %path,
                duration_ms = self.duration_ms,
                "Audit event"
            );
        } else {
            tracing::warn!(
                target: AUDIT_TARGET,
                event = self.event_type.as_str(),
                strategy = %self.strategy,
                user_id = %user_id,
                path = %path,
                error = self.error.as_deref().unwrap_or("-"),
                duration_ms = self.duration_ms,
                "Audit event"
            );
        }
    }
}

/// Bounded, most-recent-first audit log.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
}

impl AuditLog {
    /// Creates a log holding at most `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Appends an event, evicting the oldest one at capacity.
    pub fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        events.push_front(event);
        events.truncate(self.capacity);
    }

    /// Returns up to `limit` events, most recent first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        self.events.lock().iter().take(limit).cloned().collect()
    }

    /// Removes every event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns `true` if no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Maximum number of stored events.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
