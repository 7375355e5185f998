//! Transport-neutral view of an inbound request.
//!
//! The engine does not depend on a particular HTTP stack. Hosts build an
//! [`AuthRequest`] from whatever request type they use (the axum middleware
//! does this from `Parts`) together with a [`RequestContext`] carrying
//! request-scoped data such as the deadline.

use std::collections::HashMap;
use std::net::IpAddr;

use serde_json::Value;
use tokio::time::Instant;

/// Inbound request as seen by credential strategies.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    /// HTTP method.
    pub method: String,

    /// Request path without query string.
    pub path: String,

    /// Headers with lowercase names.
    headers: HashMap<String, String>,

    /// Decoded query parameters.
    pub query: HashMap<String, String>,

    /// Peer address, if known.
    pub remote_addr: Option<IpAddr>,
}

impl AuthRequest {
    /// Creates a request with a method and path.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Adds a header. Names are matched case-insensitively.
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Sets the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Inserts a header in place.
    pub fn insert_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Looks up a header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the raw `Authorization` header.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.header("authorization")
    }

    /// Looks up a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Looks up a cookie by name from the `Cookie` header.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        let header = self.header("cookie")?;
        cookie::Cookie::split_parse(header)
            .filter_map(Result::ok)
            .find(|c| c.name() == name)
            .map(|c| c.value().to_string())
    }
}

/// Request-scoped data owned by the host.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id for logs and audit events.
    pub request_id: String,

    /// Deadline for the whole authentication attempt.
    pub deadline: Option<Instant>,

    /// Free-form host attributes.
    pub attributes: HashMap<String, Value>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            deadline: None,
            attributes: HashMap::new(),
        }
    }
}

impl RequestContext {
    /// Creates a context with a fresh request id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}
