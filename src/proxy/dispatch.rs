//! Permission dispatch
//!
//! Maps the request's target API domain (the first path segment under the
//! mount prefix) to a registered authorization handler. One uniform
//! dispatch point decouples the proxy from per-domain rule complexity:
//! each handler makes its own allow/deny decision from the identity,
//! method, path and body, behind a single shared signature.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use tracing::debug;

use crate::auth::UserProfile;

/// The request view handed to authorization handlers
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// HTTP method
    pub method: Method,
    /// Request path (no query string)
    pub path: String,
    /// Identity attached by the validator, if any
    pub profile: Option<UserProfile>,
    /// Buffered request body
    pub body: Bytes,
}

/// A structured deny from a domain handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// HTTP status to return
    pub status: StatusCode,
    /// User-facing message, passed through verbatim
    pub message: String,
}

impl Denial {
    /// Build a denial
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Result of dispatching a request to its domain handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzOutcome {
    /// Proceed to forwarding
    Allowed,
    /// Do not forward; respond with this status and message
    Denied {
        /// HTTP status to return
        status: StatusCode,
        /// User-facing message
        message: String,
    },
}

/// Per-API-domain authorization contract.
///
/// Handlers report exactly once: `Ok(())` to allow, or a [`Denial`] whose
/// status and message are returned to the caller unchanged.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Decide whether this request may proceed to the backend
    async fn check_permissions(&self, ctx: &RequestContext) -> Result<(), Denial>;
}

/// Static domain-to-handler registry, built once at startup
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn DomainHandler>>,
    mount_prefix: String,
}

impl Dispatcher {
    /// Create an empty dispatcher for the given mount prefix
    #[must_use]
    pub fn new(mount_prefix: impl Into<String>) -> Self {
        Self {
            handlers: HashMap::new(),
            mount_prefix: mount_prefix.into(),
        }
    }

    /// Register the handler for an API domain
    pub fn register(&mut self, domain: impl Into<String>, handler: Arc<dyn DomainHandler>) {
        self.handlers.insert(domain.into(), handler);
    }

    /// Registered domain keys
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Extract the domain key: the first path segment after the mount
    /// prefix. `None` when the path is outside the prefix or has no
    /// segment. The prefix match is segment-aware: `/proxyfoo` is not
    /// under the mount prefix `/proxy`.
    fn domain_key<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.mount_prefix.as_str())?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        rest.trim_start_matches('/')
            .split('/')
            .next()
            .filter(|segment| !segment.is_empty())
    }

    /// Authorize a request against its domain handler.
    ///
    /// Fail-closed: an unknown domain is a 404, and any handler deny is
    /// returned before the backend is contacted.
    pub async fn authorize(&self, ctx: &RequestContext) -> AuthzOutcome {
        let Some(handler) = self.domain_key(&ctx.path).and_then(|d| self.handlers.get(d))
        else {
            debug!(path = %ctx.path, "No handler for path");
            return AuthzOutcome::Denied {
                status: StatusCode::NOT_FOUND,
                message: "Path not found".to_string(),
            };
        };

        match handler.check_permissions(ctx).await {
            Ok(()) => AuthzOutcome::Allowed,
            Err(denial) => AuthzOutcome::Denied {
                status: denial.status,
                message: denial.message,
            },
        }
    }
}
