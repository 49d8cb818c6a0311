//! Credential persistence for the OAuth2 token triple
//!
//! A `SecretStore` keeps opaque blobs keyed by account id; the
//! `CredentialCache` on top of it knows the blob format
//! `"<access_token>:<refresh_token>:<valid_until_epoch_seconds>"`.
//!
//! Two store adapters ship with the crate: `FileSecretStore`, a JSON file
//! mapping account ids to blobs (atomic temp-file + rename writes, 0600),
//! and `MemorySecretStore` for tests and ephemeral sessions.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Current time as unix epoch seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// An OAuth2 access token, its refresh token, and the absolute expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSet {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    /// Unix epoch seconds
    pub valid_until: i64,
}

impl TokenSet {
    pub fn new(
        access_token: impl Into<Secret<String>>,
        refresh_token: impl Into<Secret<String>>,
        valid_until: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            valid_until,
        }
    }

    /// Whether the access token expires within `margin` of `now`.
    pub fn expires_within(&self, margin: Duration, now: i64) -> bool {
        now + margin.as_secs() as i64 > self.valid_until
    }

    fn to_blob(&self) -> String {
        format!(
            "{}:{}:{}",
            self.access_token.expose(),
            self.refresh_token.expose(),
            self.valid_until
        )
    }

    /// Parse a stored blob. Exactly three fields, the first two non-empty;
    /// an unparseable expiry reads as 0 so the token is refreshed on resume.
    fn from_blob(blob: &str) -> Option<Self> {
        let parts: Vec<&str> = blob.split(':').collect();
        let [access, refresh, valid_until] = parts.as_slice() else {
            return None;
        };
        if access.is_empty() || refresh.is_empty() {
            return None;
        }
        Some(Self::new(
            *access,
            *refresh,
            valid_until.trim().parse().unwrap_or(0),
        ))
    }
}

type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persists credential blobs keyed by account id.
pub trait SecretStore: Send + Sync {
    fn load<'a>(&'a self, account: &'a str) -> StoreFuture<'a, Option<String>>;

    fn save<'a>(&'a self, account: &'a str, blob: &'a str) -> StoreFuture<'a, ()>;

    /// Returns whether an entry was removed.
    fn remove<'a>(&'a self, account: &'a str) -> StoreFuture<'a, bool>;
}

/// In-memory store; contents are lost on drop.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn load<'a>(&'a self, account: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.entries.lock().await.get(account).cloned()) })
    }

    fn save<'a>(&'a self, account: &'a str, blob: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.entries
                .lock()
                .await
                .insert(account.to_string(), blob.to_string());
            Ok(())
        })
    }

    fn remove<'a>(&'a self, account: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.entries.lock().await.remove(account).is_some()) })
    }
}

/// JSON file mapping account ids to credential blobs.
///
/// The Mutex serializes writes; every mutation rewrites the whole file.
pub struct FileSecretStore {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
}

impl FileSecretStore {
    /// Open the store at `path`, creating an empty `{}` file if missing.
    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError::Io(format!("reading credential file: {e}")))?;
            let entries: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| StoreError::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), accounts = entries.len(), "loaded credential store");
            entries
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let entries = HashMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretStore for FileSecretStore {
    fn load<'a>(&'a self, account: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.state.lock().await.get(account).cloned()) })
    }

    fn save<'a>(&'a self, account: &'a str, blob: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.insert(account.to_string(), blob.to_string());
            debug!(account, "saved credential");
            write_atomic(&self.path, &state).await
        })
    }

    fn remove<'a>(&'a self, account: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.remove(account).is_none() {
                return Ok(false);
            }
            debug!(account, "removed credential");
            write_atomic(&self.path, &state).await?;
            Ok(true)
        })
    }
}

/// Write the store atomically: temp file in the same directory, 0600, rename.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| StoreError::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Io("credential path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".oauth-credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| StoreError::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| StoreError::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StoreError::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

/// Reads and writes `TokenSet`s through a `SecretStore`.
#[derive(Clone)]
pub struct CredentialCache {
    store: Arc<dyn SecretStore>,
}

impl CredentialCache {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Cached tokens for `account`, or `None` if absent or malformed.
    pub async fn load(&self, account: &str) -> Result<Option<TokenSet>, StoreError> {
        let Some(blob) = self.store.load(account).await? else {
            debug!(account, "no cached credentials");
            return Ok(None);
        };
        match TokenSet::from_blob(&blob) {
            Some(tokens) => Ok(Some(tokens)),
            None => {
                warn!(account, "ignoring malformed cached credentials");
                Ok(None)
            }
        }
    }

    pub async fn save(&self, account: &str, tokens: &TokenSet) -> Result<(), StoreError> {
        self.store.save(account, &tokens.to_blob()).await
    }

    pub async fn clear(&self, account: &str) -> Result<bool, StoreError> {
        self.store.remove(account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_cache() -> (Arc<MemorySecretStore>, CredentialCache) {
        let store = Arc::new(MemorySecretStore::new());
        let cache = CredentialCache::new(store.clone());
        (store, cache)
    }

    #[test]
    fn expiry_margin_is_strict() {
        let now = 1_000_000;
        let margin = Duration::from_secs(60);
        assert!(TokenSet::new("a", "r", now + 30).expires_within(margin, now));
        assert!(TokenSet::new("a", "r", now - 5).expires_within(margin, now));
        assert!(!TokenSet::new("a", "r", now + 120).expires_within(margin, now));
        assert!(!TokenSet::new("a", "r", now + 60).expires_within(margin, now));
    }

    #[test]
    fn blob_parsing_rules() {
        let tokens = TokenSet::from_blob("at_1:rt_1:1735500000").unwrap();
        assert_eq!(tokens.access_token.expose(), "at_1");
        assert_eq!(tokens.refresh_token.expose(), "rt_1");
        assert_eq!(tokens.valid_until, 1735500000);

        assert_eq!(TokenSet::from_blob("at:rt:soon").unwrap().valid_until, 0);
        assert!(TokenSet::from_blob("at:rt").is_none());
        assert!(TokenSet::from_blob("at:rt:1:extra").is_none());
        assert!(TokenSet::from_blob(":rt:1").is_none());
        assert!(TokenSet::from_blob("at::1").is_none());
    }

    #[tokio::test]
    async fn cache_round_trip_uses_colon_blob() {
        let (store, cache) = memory_cache();
        cache
            .save("oauth2", &TokenSet::new("at_1", "rt_1", 42))
            .await
            .unwrap();

        assert_eq!(
            store.load("oauth2").await.unwrap().as_deref(),
            Some("at_1:rt_1:42")
        );
        let loaded = cache.load("oauth2").await.unwrap().unwrap();
        assert_eq!(loaded, TokenSet::new("at_1", "rt_1", 42));
    }

    #[tokio::test]
    async fn malformed_blob_loads_as_none() {
        let (store, cache) = memory_cache();
        store.save("oauth2", "garbage").await.unwrap();
        assert!(cache.load("oauth2").await.unwrap().is_none());
        assert!(cache.load("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileSecretStore::open(path.clone()).await.unwrap();
        assert!(path.exists());
        store.save("oauth2", "at:rt:1").await.unwrap();

        let reopened = FileSecretStore::open(path).await.unwrap();
        assert_eq!(
            reopened.load("oauth2").await.unwrap().as_deref(),
            Some("at:rt:1")
        );
        assert!(reopened.remove("oauth2").await.unwrap());
        assert!(!reopened.remove("oauth2").await.unwrap());
        assert!(reopened.load("oauth2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let result = FileSecretStore::open(path).await;
        assert!(matches!(result, Err(StoreError::CredentialParse(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileSecretStore::open(path.clone()).await.unwrap();
        store.save("oauth2", "at:rt:1").await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_saves_keep_file_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = Arc::new(FileSecretStore::open(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .save(&format!("acct-{i}"), &format!("at{i}:rt{i}:{i}"))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HashMap<String, String> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
    }
}
