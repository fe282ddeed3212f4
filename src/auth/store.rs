//! Delegated token store
//!
//! Persistent mapping from an application user id to the platform
//! access/refresh token pair granted when the user first authorized a
//! third-party application. At most one record exists per user id. The
//! proxy never creates records (provisioning is external); the refresh
//! flow replaces the token pair and expiry atomically.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// A stored delegated authorization for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Application user id (lookup key)
    pub user_id: String,
    /// Stored platform access token
    pub access_token: String,
    /// Stored platform refresh token
    pub refresh_token: String,
    /// Expiry of the stored access token, if any
    #[serde(default)]
    pub expire: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Whether the stored access token has expired and must be refreshed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expire.is_some_and(|t| t <= Utc::now())
    }
}

/// External delegated-token store contract
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Look up the record for a user id, `None` when the user never
    /// authorized any application
    async fn find_by_user(&self, user_id: &str) -> Result<Option<TokenRecord>>;

    /// Replace the stored token pair and expiry for a user id
    async fn update(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expire: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// File-backed token store: one JSON record per user id under a base
/// directory.
pub struct FileTokenStore {
    base_dir: PathBuf,
}

impl FileTokenStore {
    /// Create a store rooted at the given directory, creating it if needed
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .map_err(|e| Error::Store(format!("failed to create token store dir: {e}")))?;
        }
        Ok(Self { base_dir })
    }

    /// Create a store in the default location (`~/.pep-proxy/tokens`)
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Store("cannot determine home directory".to_string()))?;
        Self::new(home.join(".pep-proxy").join("tokens"))
    }

    fn record_path(&self, user_id: &str) -> PathBuf {
        // User ids come from the identity provider; keep the file name flat
        let safe: String = user_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_dir.join(format!("{safe}.json"))
    }

    fn write_record(&self, record: &TokenRecord) -> Result<()> {
        let path = self.record_path(&record.user_id);
        let content = serde_json::to_string_pretty(record)
            .map_err(|e| Error::Store(format!("failed to serialize token record: {e}")))?;

        // Write to a sibling temp file and rename over the target, so a
        // concurrent reader never sees partial JSON and a crash mid-write
        // leaves the previous record intact.
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .map_err(|e| Error::Store(format!("failed to write token record: {e}")))?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&tmp_path, perms);
        }

        fs::rename(&tmp_path, &path)
            .map_err(|e| Error::Store(format!("failed to replace token record: {e}")))?;

        Ok(())
    }

    /// Provision a record directly (used by external tooling and tests;
    /// the admission pipeline itself never creates records)
    pub fn insert(&self, record: &TokenRecord) -> Result<()> {
        self.write_record(record)?;
        info!(user = %record.user_id, "Stored delegated token record");
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<TokenRecord>> {
        let path = self.record_path(user_id);

        if !path.exists() {
            debug!(user = %user_id, "No delegated token record");
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Store(format!("failed to read token record: {e}")))?;

        match serde_json::from_str::<TokenRecord>(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(user = %user_id, error = %e, "Corrupt token record");
                Err(Error::Store(format!("corrupt token record: {e}")))
            }
        }
    }

    async fn update(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expire: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let record = TokenRecord {
            user_id: user_id.to_string(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expire,
        };
        self.write_record(&record)?;
        info!(user = %user_id, "Updated delegated token record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(user: &str) -> TokenRecord {
        TokenRecord {
            user_id: user.to_string(),
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            expire: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[test]
    fn record_expiry() {
        let mut r = record("test_user");
        assert!(!r.is_expired());

        r.expire = Some(Utc::now() - Duration::milliseconds(100));
        assert!(r.is_expired());

        r.expire = None;
        assert!(!r.is_expired());
    }

    #[tokio::test]
    async fn find_returns_none_for_unknown_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.find_by_user("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn insert_then_find_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();

        let r = record("test_user");
        store.insert(&r).unwrap();

        let found = store.find_by_user("test_user").await.unwrap();
        assert_eq!(found, Some(r));
    }

    #[tokio::test]
    async fn update_replaces_token_pair_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();
        store.insert(&record("test_user")).unwrap();

        let new_expire = Some(Utc::now() + Duration::hours(2));
        store
            .update("test_user", "newToken", "new_refresh", new_expire)
            .await
            .unwrap();

        let found = store.find_by_user("test_user").await.unwrap().unwrap();
        assert_eq!(found.access_token, "newToken");
        assert_eq!(found.refresh_token, "new_refresh");
        assert_eq!(found.expire, new_expire);
    }

    #[tokio::test]
    async fn one_record_per_user_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();

        store.insert(&record("test_user")).unwrap();
        store
            .update("test_user", "second", "second_refresh", None)
            .await
            .unwrap();

        // The update overwrote the single record, it did not add another
        let found = store.find_by_user("test_user").await.unwrap().unwrap();
        assert_eq!(found.access_token, "second");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn update_replaces_via_rename_leaving_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();
        store.insert(&record("test_user")).unwrap();

        for i in 0..5 {
            store
                .update("test_user", &format!("token{i}"), "refresh", None)
                .await
                .unwrap();
        }

        // Only the final record file remains, and it is complete JSON
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["test_user.json".to_string()]);

        let found = store.find_by_user("test_user").await.unwrap().unwrap();
        assert_eq!(found.access_token, "token4");
    }

    #[tokio::test]
    async fn corrupt_record_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let result = store.find_by_user("broken").await;
        assert!(matches!(result, Err(Error::Store(_))));
    }
}
