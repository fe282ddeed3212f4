//! Identity profiles and authentication outcomes

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated principal as seen by the identity provider for a
/// given access token.
///
/// Never mutated after creation: a refresh produces a new profile, not an
/// in-place edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Application user id
    pub id: String,
    /// OAuth2 client the token was issued to
    pub app_id: String,
    /// The access token this profile was resolved from
    pub access_token: String,
    /// Token expiry as reported by the provider, if any
    #[serde(default)]
    pub expire: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Whether the profile's own expiry (if any) has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expire.is_some_and(|t| t <= Utc::now())
    }
}

/// Result of validating a request's credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// No credential supplied; the request proceeds unauthenticated and
    /// downstream handlers decide whether the path requires one
    Anonymous,
    /// Credential resolved to a profile
    Authenticated(UserProfile),
    /// Credential present but unusable; the request must not proceed
    Rejected {
        /// HTTP status to return to the caller
        status: StatusCode,
        /// User-facing message (never a raw collaborator error)
        message: String,
    },
}

impl AuthOutcome {
    /// Shorthand for a 401 rejection
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Rejected {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    /// The resolved profile, if authenticated
    #[must_use]
    pub fn profile(&self) -> Option<&UserProfile> {
        match self {
            Self::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }
}
