//! Built-in domain handler
//!
//! The concrete business rule sets live with each API team; this guard is
//! the runnable default, driven entirely by endpoint configuration.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};

use super::dispatch::{Denial, DomainHandler, RequestContext};
use crate::config::EndpointConfig;

/// Configuration-driven authorization guard for one API domain
pub struct EndpointGuard {
    require_auth: bool,
    methods: Option<Vec<Method>>,
}

impl EndpointGuard {
    /// Build a guard from endpoint configuration.
    ///
    /// Unparseable method names are dropped rather than silently allowed.
    #[must_use]
    pub fn from_config(config: &EndpointConfig) -> Self {
        let methods = config.methods.as_ref().map(|names| {
            names
                .iter()
                .filter_map(|name| name.to_uppercase().parse::<Method>().ok())
                .collect()
        });

        Self {
            require_auth: config.require_auth,
            methods,
        }
    }
}

#[async_trait]
impl DomainHandler for EndpointGuard {
    async fn check_permissions(&self, ctx: &RequestContext) -> Result<(), Denial> {
        if self.require_auth && ctx.profile.is_none() {
            return Err(Denial::new(
                StatusCode::UNAUTHORIZED,
                "Authentication required",
            ));
        }

        if let Some(ref methods) = self.methods {
            if !methods.contains(&ctx.method) {
                return Err(Denial::new(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "The HTTP method used is not allowed in the accessed API",
                ));
            }
        }

        Ok(())
    }
}
