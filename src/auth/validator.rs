//! Token validator
//!
//! Resolves a request's bearer token to an identity profile, consulting
//! the token cache, the delegated token store and the identity provider.
//! Every collaborator failure is normalized to an [`AuthOutcome`] before
//! it crosses this boundary; no raw error ever reaches the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::cache::TokenCache;
use super::profile::{AuthOutcome, UserProfile};
use super::provider::IdentityProvider;
use super::store::TokenStore;

/// Rejection message for tokens the provider does not recognize.
pub const INVALID_TOKEN_MSG: &str = "invalid auth-token";

/// Rejection message for the delegated flow. The same text is used whether
/// the user never authorized the application or the refresh exchange
/// failed: both require the same corrective action (re-authorize).
pub const DELEGATION_FAILED_MSG: &str =
    "It has not been possible to obtain your user info. Have you authorized this app to access your info?";

/// Validates bearer tokens and owns the process-wide token cache.
pub struct TokenValidator {
    cache: TokenCache,
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn TokenStore>,
    client_id: String,
    default_ttl: Duration,
}

impl TokenValidator {
    /// Create a validator.
    ///
    /// `client_id` is the proxy's own registered OAuth2 client: profiles
    /// carrying it are platform tokens, anything else is delegated.
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn TokenStore>,
        client_id: String,
        default_ttl: Duration,
    ) -> Self {
        Self {
            cache: TokenCache::new(),
            provider,
            store,
            client_id,
            default_ttl,
        }
    }

    /// The token cache, exposed for inspection.
    #[must_use]
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Resolve the request's `Authorization` header to an outcome.
    ///
    /// Decision order: no header is anonymous; a non-Bearer scheme is
    /// rejected naming the scheme; a live cache entry short-circuits all
    /// network calls; otherwise the token is validated against the
    /// provider, entering the delegated-resolution sub-flow when it was
    /// issued to a foreign application.
    pub async fn validate(&self, auth_header: Option<&str>) -> AuthOutcome {
        let Some(header) = auth_header else {
            return AuthOutcome::Anonymous;
        };

        let mut parts = header.split_whitespace();
        let scheme = parts.next().unwrap_or_default();
        let token = parts.next();

        if !scheme.eq_ignore_ascii_case("bearer") {
            return AuthOutcome::unauthorized(format!(
                "Invalid Auth-Token type ({})",
                scheme.to_lowercase()
            ));
        }
        let Some(token) = token else {
            return AuthOutcome::unauthorized(INVALID_TOKEN_MSG);
        };

        if let Some(profile) = self.cache.get(token) {
            debug!(user = %profile.id, "Token cache hit");
            return AuthOutcome::Authenticated(profile);
        }

        let profile = match self.provider.user_profile(token).await {
            Ok(profile) => profile,
            Err(e) => {
                debug!(error = %e, "Token rejected by identity provider");
                return AuthOutcome::unauthorized(INVALID_TOKEN_MSG);
            }
        };

        if profile.app_id == self.client_id {
            self.cache.insert(token, profile.clone(), self.default_ttl);
            AuthOutcome::Authenticated(profile)
        } else {
            self.resolve_delegated(&profile).await
        }
    }

    /// Delegated-token resolution: exchange a third-party application's
    /// token for the user's stored platform token, refreshing it first
    /// when the stored pair has expired.
    async fn resolve_delegated(&self, external: &UserProfile) -> AuthOutcome {
        debug!(user = %external.id, app = %external.app_id, "Resolving delegated token");

        // The store lookup happens on every uncached delegated request,
        // even when the resolved platform token turns out to be cached.
        let record = match self.store.find_by_user(&external.id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(user = %external.id, "No stored authorization for user");
                return AuthOutcome::unauthorized(DELEGATION_FAILED_MSG);
            }
            Err(e) => {
                warn!(user = %external.id, error = %e, "Token store lookup failed");
                return AuthOutcome::unauthorized(DELEGATION_FAILED_MSG);
            }
        };

        let platform_token = if record.is_expired() {
            match self.provider.refresh(&record.refresh_token).await {
                Ok(refreshed) => {
                    let expire = refreshed.expires_at.or_else(|| {
                        // Provider reported no expiry; fall back to the
                        // cache TTL so the record re-validates eventually.
                        chrono::Duration::from_std(self.default_ttl)
                            .ok()
                            .map(|ttl| Utc::now() + ttl)
                    });
                    if let Err(e) = self
                        .store
                        .update(
                            &external.id,
                            &refreshed.access_token,
                            &refreshed.refresh_token,
                            expire,
                        )
                        .await
                    {
                        warn!(user = %external.id, error = %e, "Failed to persist refreshed tokens");
                        return AuthOutcome::unauthorized(DELEGATION_FAILED_MSG);
                    }
                    refreshed.access_token
                }
                Err(e) => {
                    warn!(user = %external.id, error = %e, "Refresh exchange failed");
                    return AuthOutcome::unauthorized(DELEGATION_FAILED_MSG);
                }
            }
        } else {
            record.access_token
        };

        if let Some(profile) = self.cache.get(&platform_token) {
            debug!(user = %profile.id, "Resolved platform token cache hit");
            return AuthOutcome::Authenticated(profile);
        }

        match self.provider.user_profile(&platform_token).await {
            Ok(profile) => {
                self.cache
                    .insert(&platform_token, profile.clone(), self.default_ttl);
                AuthOutcome::Authenticated(profile)
            }
            Err(e) => {
                debug!(error = %e, "Resolved platform token rejected by provider");
                AuthOutcome::unauthorized(INVALID_TOKEN_MSG)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::auth::provider::RefreshedTokens;
    use crate::auth::store::TokenRecord;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CLIENT_ID: &str = "proxy-client";

    fn platform_profile(token: &str) -> UserProfile {
        UserProfile {
            id: "test_user".to_string(),
            app_id: CLIENT_ID.to_string(),
            access_token: token.to_string(),
            expire: None,
        }
    }

    fn external_profile() -> UserProfile {
        UserProfile {
            id: "test_user".to_string(),
            app_id: "extApp".to_string(),
            access_token: "external".to_string(),
            expire: None,
        }
    }

    /// Scripted identity provider counting its calls
    #[derive(Default)]
    struct MockProvider {
        profiles: HashMap<String, UserProfile>,
        refresh_result: Option<RefreshedTokens>,
        profile_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvider for MockProvider {
        async fn user_profile(&self, token: &str) -> crate::Result<UserProfile> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            self.profiles
                .get(token)
                .cloned()
                .ok_or_else(|| Error::Provider("Invalid token".to_string()))
        }

        async fn refresh(&self, refresh_token: &str) -> crate::Result<RefreshedTokens> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(refresh_token, "refresh");
            self.refresh_result
                .clone()
                .ok_or_else(|| Error::Provider("refresh rejected".to_string()))
        }
    }

    /// Scripted token store counting lookups and recording updates
    #[derive(Default)]
    struct MockStore {
        record: Option<TokenRecord>,
        fail_lookup: bool,
        find_calls: AtomicUsize,
        updates: Mutex<Vec<(String, String, String, Option<DateTime<Utc>>)>>,
    }

    #[async_trait]
    impl TokenStore for MockStore {
        async fn find_by_user(&self, user_id: &str) -> crate::Result<Option<TokenRecord>> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(user_id, "test_user");
            if self.fail_lookup {
                return Err(Error::Store("lookup failed".to_string()));
            }
            Ok(self.record.clone())
        }

        async fn update(
            &self,
            user_id: &str,
            access_token: &str,
            refresh_token: &str,
            expire: Option<DateTime<Utc>>,
        ) -> crate::Result<()> {
            self.updates.lock().unwrap().push((
                user_id.to_string(),
                access_token.to_string(),
                refresh_token.to_string(),
                expire,
            ));
            Ok(())
        }
    }

    fn validator(provider: MockProvider, store: MockStore) -> (TokenValidator, Arc<MockProvider>, Arc<MockStore>) {
        let provider = Arc::new(provider);
        let store = Arc::new(store);
        let v = TokenValidator::new(
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            Arc::clone(&store) as Arc<dyn TokenStore>,
            CLIENT_ID.to_string(),
            Duration::from_secs(3600),
        );
        (v, provider, store)
    }

    fn assert_rejected(outcome: &AuthOutcome, expected_msg: &str) {
        match outcome {
            AuthOutcome::Rejected { status, message } => {
                assert_eq!(*status, StatusCode::UNAUTHORIZED);
                assert_eq!(message, expected_msg);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    // ── Invalid headers ────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_header_is_anonymous_with_zero_calls() {
        let (v, provider, store) = validator(MockProvider::default(), MockStore::default());

        let outcome = v.validate(None).await;

        assert_eq!(outcome, AuthOutcome::Anonymous);
        assert_eq!(provider.profile_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.find_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_rejected_naming_the_scheme() {
        let (v, _, _) = validator(MockProvider::default(), MockStore::default());

        let outcome = v.validate(Some("Invalid token")).await;

        assert_rejected(&outcome, "Invalid Auth-Token type (invalid)");
    }

    #[tokio::test]
    async fn bearer_without_token_is_rejected() {
        let (v, provider, _) = validator(MockProvider::default(), MockStore::default());

        let outcome = v.validate(Some("Bearer")).await;

        assert_rejected(&outcome, INVALID_TOKEN_MSG);
        assert_eq!(provider.profile_calls.load(Ordering::SeqCst), 0);
    }

    // ── Platform tokens ────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_token_is_rejected_generic() {
        let (v, _, _) = validator(MockProvider::default(), MockStore::default());

        let outcome = v.validate(Some("Bearer token")).await;

        assert_rejected(&outcome, INVALID_TOKEN_MSG);
    }

    #[tokio::test]
    async fn first_platform_validation_calls_provider_once_and_caches() {
        let provider = MockProvider {
            profiles: HashMap::from([("token".to_string(), platform_profile("token"))]),
            ..MockProvider::default()
        };
        let (v, provider, _) = validator(provider, MockStore::default());

        let outcome = v.validate(Some("Bearer token")).await;

        assert_eq!(outcome, AuthOutcome::Authenticated(platform_profile("token")));
        assert_eq!(provider.profile_calls.load(Ordering::SeqCst), 1);
        assert!(v.cache().contains("token"));
    }

    #[tokio::test]
    async fn cached_platform_token_skips_the_provider() {
        let provider = MockProvider {
            profiles: HashMap::from([("token".to_string(), platform_profile("token"))]),
            ..MockProvider::default()
        };
        let (v, provider, _) = validator(provider, MockStore::default());

        let first = v.validate(Some("Bearer token")).await;
        let second = v.validate(Some("Bearer token")).await;

        // Idempotent: identical outcomes, one provider call total
        assert_eq!(first, second);
        assert_eq!(provider.profile_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejections_are_never_cached() {
        let (v, provider, _) = validator(MockProvider::default(), MockStore::default());

        let _ = v.validate(Some("Bearer bogus")).await;
        let _ = v.validate(Some("Bearer bogus")).await;

        assert!(!v.cache().contains("bogus"));
        // No caching means the provider is consulted each time
        assert_eq!(provider.profile_calls.load(Ordering::SeqCst), 2);
    }

    // ── Delegated tokens ───────────────────────────────────────────────

    fn stored_record(expire: Option<DateTime<Utc>>) -> TokenRecord {
        TokenRecord {
            user_id: "test_user".to_string(),
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            expire,
        }
    }

    #[tokio::test]
    async fn delegated_without_stored_record_is_rejected_with_fixed_message() {
        let provider = MockProvider {
            profiles: HashMap::from([("external".to_string(), external_profile())]),
            ..MockProvider::default()
        };
        let (v, _, store) = validator(provider, MockStore::default());

        let outcome = v.validate(Some("Bearer external")).await;

        assert_rejected(&outcome, DELEGATION_FAILED_MSG);
        assert_eq!(store.find_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delegated_with_store_error_uses_the_same_message() {
        let provider = MockProvider {
            profiles: HashMap::from([("external".to_string(), external_profile())]),
            ..MockProvider::default()
        };
        let store = MockStore {
            fail_lookup: true,
            ..MockStore::default()
        };
        let (v, _, _) = validator(provider, store);

        let outcome = v.validate(Some("Bearer external")).await;

        assert_rejected(&outcome, DELEGATION_FAILED_MSG);
    }

    #[tokio::test]
    async fn delegated_with_live_record_never_refreshes() {
        let provider = MockProvider {
            profiles: HashMap::from([
                ("external".to_string(), external_profile()),
                ("token".to_string(), platform_profile("token")),
            ]),
            ..MockProvider::default()
        };
        let store = MockStore {
            record: Some(stored_record(Some(Utc::now() + chrono::Duration::hours(1)))),
            ..MockStore::default()
        };
        let (v, provider, store) = validator(provider, store);

        let outcome = v.validate(Some("Bearer external")).await;

        assert_eq!(outcome, AuthOutcome::Authenticated(platform_profile("token")));
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(store.updates.lock().unwrap().is_empty());
        // The resolved platform token is now cached under its own key
        assert!(v.cache().contains("token"));
        assert!(!v.cache().contains("external"));
    }

    #[tokio::test]
    async fn delegated_with_expired_record_refreshes_once_and_persists() {
        let provider = MockProvider {
            profiles: HashMap::from([
                ("external".to_string(), external_profile()),
                ("newToken".to_string(), platform_profile("newToken")),
            ]),
            refresh_result: Some(RefreshedTokens {
                access_token: "newToken".to_string(),
                refresh_token: "new_refresh".to_string(),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            }),
            ..MockProvider::default()
        };
        let store = MockStore {
            record: Some(stored_record(Some(Utc::now() - chrono::Duration::milliseconds(100)))),
            ..MockStore::default()
        };
        let (v, provider, store) = validator(provider, store);

        let outcome = v.validate(Some("Bearer external")).await;

        assert_eq!(
            outcome,
            AuthOutcome::Authenticated(platform_profile("newToken"))
        );
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);

        let updates = store.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        let (user, access, refresh, _) = &updates[0];
        assert_eq!(user, "test_user");
        assert_eq!(access, "newToken");
        assert_eq!(refresh, "new_refresh");
    }

    #[tokio::test]
    async fn delegated_refresh_failure_is_rejected_with_fixed_message() {
        let provider = MockProvider {
            profiles: HashMap::from([("external".to_string(), external_profile())]),
            refresh_result: None, // refresh errors
            ..MockProvider::default()
        };
        let store = MockStore {
            record: Some(stored_record(Some(Utc::now() - chrono::Duration::milliseconds(100)))),
            ..MockStore::default()
        };
        let (v, provider, store) = validator(provider, store);

        let outcome = v.validate(Some("Bearer external")).await;

        assert_rejected(&outcome, DELEGATION_FAILED_MSG);
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
        assert!(store.updates.lock().unwrap().is_empty());
        assert!(!v.cache().contains("token"));
    }

    #[tokio::test]
    async fn delegated_with_cached_platform_token_still_hits_the_store() {
        let provider = MockProvider {
            profiles: HashMap::from([("external".to_string(), external_profile())]),
            ..MockProvider::default()
        };
        let store = MockStore {
            record: Some(stored_record(Some(Utc::now() + chrono::Duration::hours(1)))),
            ..MockStore::default()
        };
        let (v, provider, store) = validator(provider, store);

        // Pre-warm the cache under the platform token key
        v.cache()
            .insert("token", platform_profile("token"), Duration::from_secs(3600));

        let outcome = v.validate(Some("Bearer external")).await;

        assert_eq!(outcome, AuthOutcome::Authenticated(platform_profile("token")));
        // Store consulted, but the second provider call was skipped
        assert_eq!(store.find_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.profile_calls.load(Ordering::SeqCst), 1); // "external" only
    }

    #[tokio::test]
    async fn delegated_with_expired_cached_platform_token_revalidates() {
        let provider = MockProvider {
            profiles: HashMap::from([
                ("external".to_string(), external_profile()),
                ("newToken".to_string(), platform_profile("newToken")),
            ]),
            refresh_result: Some(RefreshedTokens {
                access_token: "newToken".to_string(),
                refresh_token: "new_refresh".to_string(),
                expires_at: None,
            }),
            ..MockProvider::default()
        };
        let store = MockStore {
            record: Some(stored_record(Some(Utc::now() - chrono::Duration::milliseconds(100)))),
            ..MockStore::default()
        };
        let (v, _, store) = validator(provider, store);

        // Cached entry for the old platform token, already expired
        v.cache().insert_until(
            "token",
            platform_profile("token"),
            Utc::now() - chrono::Duration::milliseconds(100),
        );

        let outcome = v.validate(Some("Bearer external")).await;

        assert_eq!(
            outcome,
            AuthOutcome::Authenticated(platform_profile("newToken"))
        );
        assert_eq!(store.updates.lock().unwrap().len(), 1);
    }
}
