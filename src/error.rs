//! Error types for the PEP proxy

use std::io;

use thiserror::Error;

/// Result type alias for the PEP proxy
pub type Result<T> = std::result::Result<T, Error>;

/// PEP proxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity provider rejected or failed a token operation
    #[error("Identity provider error: {0}")]
    Provider(String),

    /// Identity provider did not respond within the operation timeout
    #[error("Identity provider timeout: {0}")]
    ProviderTimeout(String),

    /// Delegated token store lookup or update failed
    #[error("Token store error: {0}")]
    Store(String),

    /// Upstream backend unreachable or returned a transport-level failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Upstream backend did not respond within the operation timeout
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify a reqwest failure from an identity-provider call.
    ///
    /// Timeouts stay distinguishable from plain rejections so callers can
    /// log them apart, even though both normalize to a 401 outcome at the
    /// component boundary.
    pub fn from_provider(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::ProviderTimeout(err.to_string())
        } else {
            Self::Provider(err.to_string())
        }
    }

    /// Classify a reqwest failure from the upstream backend call.
    pub fn from_upstream(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout(err.to_string())
        } else {
            Self::Upstream(err.to_string())
        }
    }
}
