//! PEP Proxy Library
//!
//! A Policy Enforcement Point: an authenticating reverse proxy placed in
//! front of a set of business APIs.
//!
//! # Request admission pipeline
//!
//! - **Token validation & caching**: bearer tokens are resolved to user
//!   profiles against an OAuth2 identity provider, with a process-wide
//!   TTL cache on the hot path
//! - **Delegated-token resolution**: tokens issued to third-party
//!   applications are exchanged for the user's stored platform token,
//!   refreshing it against the provider when expired
//! - **Permission dispatch + forwarding**: per-API-domain authorization
//!   handlers decide allow/deny; authorized requests are streamed to the
//!   backend with identity headers injected

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod proxy;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
