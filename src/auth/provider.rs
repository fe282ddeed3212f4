//! Identity provider client
//!
//! Validates bearer tokens against the OAuth2 account server and performs
//! refresh-token exchanges on behalf of the proxy's registered client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::profile::UserProfile;
use crate::config::OAuth2Config;
use crate::{Error, Result};

/// Tokens obtained from a refresh exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    /// New platform access token
    pub access_token: String,
    /// New refresh token
    pub refresh_token: String,
    /// Expiry of the new access token, when the provider reports one
    pub expires_at: Option<DateTime<Utc>>,
}

/// External identity provider contract.
///
/// Each call resolves exactly once, with either a success value or a
/// structured error; implementations must never panic across this
/// boundary.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Validate a bearer token and return the profile it resolves to
    async fn user_profile(&self, token: &str) -> Result<UserProfile>;

    /// Exchange a refresh token for a new access/refresh token pair
    /// (grant type `refresh_token`)
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens>;
}

/// HTTP identity provider client against the configured account server
pub struct OAuth2Provider {
    http_client: Client,
    server_url: String,
    client_id: String,
    client_secret: String,
}

/// Userinfo response from the account server
#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    id: String,
    #[serde(alias = "appId")]
    app_id: String,
    #[serde(default)]
    expire: Option<DateTime<Utc>>,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl OAuth2Provider {
    /// Create a provider client from OAuth2 configuration.
    ///
    /// The reqwest client carries the operation timeout; a provider that
    /// does not answer in time fails the pending request instead of
    /// hanging it.
    #[must_use]
    pub fn new(http_client: Client, config: &OAuth2Config) -> Self {
        Self {
            http_client,
            server_url: config.server_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.resolve_client_secret(),
        }
    }

    fn userinfo_url(&self) -> String {
        format!("{}/user", self.server_url)
    }

    fn token_url(&self) -> String {
        format!("{}/oauth2/token", self.server_url)
    }
}

#[async_trait]
impl IdentityProvider for OAuth2Provider {
    async fn user_profile(&self, token: &str) -> Result<UserProfile> {
        let response = self
            .http_client
            .get(self.userinfo_url())
            .query(&[("access_token", token)])
            .send()
            .await
            .map_err(|e| Error::from_provider(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            debug!(%status, "Userinfo request rejected");
            return Err(Error::Provider(format!("userinfo returned HTTP {status}")));
        }

        let info: UserInfoResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("invalid userinfo response: {e}")))?;

        Ok(UserProfile {
            id: info.id,
            app_id: info.app_id,
            access_token: token.to_string(),
            expire: info.expire,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http_client
            .post(self.token_url())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::from_provider(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(%status, "Refresh exchange rejected");
            return Err(Error::Provider(format!(
                "refresh exchange returned HTTP {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("invalid token response: {e}")))?;

        #[allow(clippy::cast_possible_wrap)]
        let expires_at = token
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));

        Ok(RefreshedTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
        })
    }
}
