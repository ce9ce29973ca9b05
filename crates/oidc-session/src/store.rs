//! Credential storage
//!
//! A `CredentialStore` is a flat string key/value store for secrets. The
//! lifecycle manager is the only writer; it maps each `StorageItem` to a key
//! according to the configured `KeyNaming`, so installations that were
//! written by an older client can be read without migration.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;
use oidc_auth::{BoxFuture, TokenSet, clock::unix_seconds};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Failures reported by a credential store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no stored value for {0}")]
    NotFound(String),

    #[error("failed to read stored value: {0}")]
    ReadFailure(String),

    #[error("failed to write stored value: {0}")]
    WriteFailure(String),

    #[error("failed to delete stored value: {0}")]
    DeleteFailure(String),
}

/// Secure key/value storage for session secrets.
pub trait CredentialStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<String, StoreError>>;

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Remove a key. Deleting a key that does not exist succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Write a batch of entries.
    ///
    /// Readers must never observe a mix of old and new values. If any write
    /// fails, every key in the batch is removed before the error is returned.
    fn set_all<'a>(&'a self, entries: &'a [(String, String)]) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            for (key, value) in entries {
                if let Err(e) = self.set(key, value).await {
                    let mut leftover = Vec::new();
                    for (key, _) in entries {
                        if let Err(rollback) = self.delete(key).await {
                            warn!(%key, error = %rollback, "failed to roll back partial batch write");
                            leftover.push(key.as_str());
                        }
                    }
                    if leftover.is_empty() {
                        return Err(e);
                    }
                    return Err(StoreError::WriteFailure(format!(
                        "{e}; rollback left {}",
                        leftover.join(", ")
                    )));
                }
            }
            Ok(())
        })
    }

    /// Delete every key, continuing past failures. The first failure is returned.
    fn wipe_all<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut first_error = None;
            for key in keys {
                if let Err(e) = self.delete(key).await {
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }
}

/// One persisted element of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageItem {
    AccessToken,
    RefreshToken,
    TokenType,
    Scope,
    IdToken,
    ExpiresAt,
}

impl StorageItem {
    pub const ALL: [StorageItem; 6] = [
        StorageItem::AccessToken,
        StorageItem::RefreshToken,
        StorageItem::TokenType,
        StorageItem::Scope,
        StorageItem::IdToken,
        StorageItem::ExpiresAt,
    ];

    fn current_key(self) -> &'static str {
        match self {
            StorageItem::AccessToken => "oidc.access_token",
            StorageItem::RefreshToken => "oidc.refresh_token",
            StorageItem::TokenType => "oidc.token_type",
            StorageItem::Scope => "oidc.scope",
            StorageItem::IdToken => "oidc.id_token",
            StorageItem::ExpiresAt => "oidc.expires_at",
        }
    }

    /// The store key for this item under the given naming scheme.
    pub fn key(self, naming: &KeyNaming) -> String {
        match (naming, self) {
            (KeyNaming::Legacy { account }, StorageItem::AccessToken) => format!("{account}_AccessToken"),
            (KeyNaming::Legacy { account }, StorageItem::RefreshToken) => format!("{account}_RefreshToken"),
            (KeyNaming::Legacy { account }, StorageItem::IdToken) => format!("{account}_IdToken"),
            _ => self.current_key().to_owned(),
        }
    }
}

/// How storage items map to keys.
///
/// `Legacy` reproduces the per-account token keys written by older clients.
/// Items those clients never stored keep their current names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyNaming {
    #[default]
    Current,
    Legacy { account: String },
}

impl KeyNaming {
    pub fn all_keys(&self) -> Vec<String> {
        StorageItem::ALL.iter().map(|item| item.key(self)).collect()
    }
}

/// Tokens that can be revoked individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn storage_item(self) -> StorageItem {
        match self {
            TokenKind::Access => StorageItem::AccessToken,
            TokenKind::Refresh => StorageItem::RefreshToken,
        }
    }
}

/// Flatten a token set into store entries.
///
/// `expires_at` is stored as unix seconds. A missing ID token is left out
/// of the batch rather than written empty.
pub(crate) fn token_entries(tokens: &TokenSet, naming: &KeyNaming) -> Vec<(String, String)> {
    let mut entries = vec![
        (StorageItem::AccessToken.key(naming), tokens.access_token.expose_str().to_owned()),
        (StorageItem::RefreshToken.key(naming), tokens.refresh_token.expose_str().to_owned()),
        (StorageItem::TokenType.key(naming), tokens.token_type.clone()),
        (StorageItem::Scope.key(naming), tokens.scope.clone()),
        (StorageItem::ExpiresAt.key(naming), unix_seconds(tokens.expires_at).to_string()),
    ];
    if let Some(id_token) = &tokens.id_token {
        entries.push((StorageItem::IdToken.key(naming), id_token.expose_str().to_owned()));
    }
    entries
}

/// Read the stored expiry instant.
pub(crate) async fn read_expires_at(
    store: &dyn CredentialStore,
    naming: &KeyNaming,
) -> Result<SystemTime, StoreError> {
    let raw = store.get(&StorageItem::ExpiresAt.key(naming)).await?;
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|e| StoreError::ReadFailure(format!("expiry {raw:?} is not a timestamp: {e}")))?;
    UNIX_EPOCH
        .checked_add(Duration::from_secs(secs))
        .ok_or_else(|| StoreError::ReadFailure(format!("expiry {secs} is out of range")))
}

/// Reassemble the stored token set. The ID token is optional.
pub(crate) async fn read_token_set(
    store: &dyn CredentialStore,
    naming: &KeyNaming,
) -> Result<TokenSet, StoreError> {
    let access_token = store.get(&StorageItem::AccessToken.key(naming)).await?;
    let refresh_token = store.get(&StorageItem::RefreshToken.key(naming)).await?;
    let token_type = store.get(&StorageItem::TokenType.key(naming)).await?;
    let scope = store.get(&StorageItem::Scope.key(naming)).await?;
    let id_token = match store.get(&StorageItem::IdToken.key(naming)).await {
        Ok(token) => Some(Secret::new(token)),
        Err(StoreError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };
    let expires_at = read_expires_at(store, naming).await?;
    Ok(TokenSet {
        access_token: Secret::new(access_token),
        refresh_token: Secret::new(refresh_token),
        id_token,
        token_type,
        scope,
        expires_at,
    })
}

/// Process-local store. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CredentialStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            self.entries
                .lock()
                .await
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.to_owned()))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.entries.lock().await.insert(key.to_owned(), value.to_owned());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.entries.lock().await.remove(key);
            Ok(())
        })
    }
}

/// JSON file store.
///
/// The whole map is kept in memory and rewritten on every change using an
/// atomic temp-file + rename, with 0600 permissions on unix. A batch write
/// is a single file replacement, so readers in other processes see either
/// the old set or the new one.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, creating an empty file if none exists.
    pub async fn load(path: PathBuf) -> Result<Self, StoreError> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError::ReadFailure(format!("reading credential file: {e}")))?;
            let entries: BTreeMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| StoreError::ReadFailure(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), entries = entries.len(), "loaded credential file");
            entries
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let entries = BTreeMap::new();
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

impl CredentialStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            self.state
                .lock()
                .await
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.to_owned()))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut next = state.clone();
            next.insert(key.to_owned(), value.to_owned());
            write_atomic(&self.path, &next).await?;
            *state = next;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.contains_key(key) {
                return Ok(());
            }
            let mut next = state.clone();
            next.remove(key);
            write_atomic(&self.path, &next)
                .await
                .map_err(|e| StoreError::DeleteFailure(e.to_string()))?;
            *state = next;
            Ok(())
        })
    }

    fn set_all<'a>(&'a self, entries: &'a [(String, String)]) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut next = state.clone();
            for (key, value) in entries {
                next.insert(key.clone(), value.clone());
            }
            write_atomic(&self.path, &next).await?;
            *state = next;
            Ok(())
        })
    }

    fn wipe_all<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut next = state.clone();
            for key in keys {
                next.remove(key);
            }
            write_atomic(&self.path, &next)
                .await
                .map_err(|e| StoreError::DeleteFailure(e.to_string()))?;
            *state = next;
            Ok(())
        })
    }
}

/// Write the map to `path` via a temp file in the same directory.
async fn write_atomic(path: &Path, data: &BTreeMap<String, String>) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| StoreError::WriteFailure(format!("serializing credentials: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("credentials"));
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| StoreError::WriteFailure(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| StoreError::WriteFailure(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StoreError::WriteFailure(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tokens(suffix: &str, id_token: Option<&str>) -> TokenSet {
        TokenSet {
            access_token: Secret::new(format!("at_{suffix}")),
            refresh_token: Secret::new(format!("rt_{suffix}")),
            id_token: id_token.map(|t| Secret::new(t.to_owned())),
            token_type: "Bearer".into(),
            scope: "openid".into(),
            expires_at: UNIX_EPOCH + Duration::from_secs(1_700_003_600),
        }
    }

    #[test]
    fn current_keys_are_distinct() {
        let keys = KeyNaming::Current.all_keys();
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), StorageItem::ALL.len());
        assert_eq!(StorageItem::AccessToken.key(&KeyNaming::Current), "oidc.access_token");
    }

    #[test]
    fn legacy_keys_are_account_prefixed() {
        let naming = KeyNaming::Legacy {
            account: "acct42".into(),
        };
        assert_eq!(StorageItem::AccessToken.key(&naming), "acct42_AccessToken");
        assert_eq!(StorageItem::RefreshToken.key(&naming), "acct42_RefreshToken");
        assert_eq!(StorageItem::IdToken.key(&naming), "acct42_IdToken");
        assert_eq!(StorageItem::Scope.key(&naming), "oidc.scope");
    }

    #[test]
    fn token_kind_maps_to_item() {
        assert_eq!(TokenKind::Access.storage_item(), StorageItem::AccessToken);
        assert_eq!(TokenKind::Refresh.storage_item(), StorageItem::RefreshToken);
    }

    #[test]
    fn entries_skip_missing_id_token() {
        let entries = token_entries(&tokens("1", None), &KeyNaming::Current);
        assert_eq!(entries.len(), 5);
        assert!(!entries.iter().any(|(k, _)| k == "oidc.id_token"));

        let entries = token_entries(&tokens("1", Some("id")), &KeyNaming::Current);
        assert_eq!(entries.len(), 6);
        assert!(entries.contains(&("oidc.expires_at".into(), "1700003600".into())));
    }

    #[tokio::test]
    async fn memory_store_round_trips_token_set() {
        let store = MemoryStore::new();
        let naming = KeyNaming::Current;
        store.set_all(&token_entries(&tokens("1", Some("id_1")), &naming)).await.unwrap();

        let read = read_token_set(&store, &naming).await.unwrap();
        assert_eq!(read.access_token.expose_str(), "at_1");
        assert_eq!(read.refresh_token.expose_str(), "rt_1");
        assert_eq!(read.id_token.unwrap().expose_str(), "id_1");
        assert_eq!(read.expires_at, UNIX_EPOCH + Duration::from_secs(1_700_003_600));
    }

    #[tokio::test]
    async fn read_token_set_reports_missing_access_token() {
        let store = MemoryStore::new();
        let err = read_token_set(&store, &KeyNaming::Current).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound("oidc.access_token".into()));
    }

    #[tokio::test]
    async fn corrupt_expiry_is_a_read_failure() {
        let store = MemoryStore::new();
        store.set("oidc.expires_at", "tomorrow").await.unwrap();
        let err = read_expires_at(&store, &KeyNaming::Current).await.unwrap_err();
        assert!(matches!(err, StoreError::ReadFailure(_)));
    }

    #[tokio::test]
    async fn delete_missing_key_succeeds() {
        let store = MemoryStore::new();
        store.delete("nothing-here").await.unwrap();
    }

    /// Fails the nth `set` call, counting from zero.
    struct FailingStore {
        inner: MemoryStore,
        fail_on: usize,
        sets: AtomicUsize,
    }

    impl CredentialStore for FailingStore {
        fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<String, StoreError>> {
            self.inner.get(key)
        }

        fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
            if self.sets.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Box::pin(async { Err(StoreError::WriteFailure("disk full".into())) });
            }
            self.inner.set(key, value)
        }

        fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
            if key == "undeletable" {
                return Box::pin(async { Err(StoreError::DeleteFailure(key.to_owned())) });
            }
            self.inner.delete(key)
        }
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_mixed_state() {
        let store = FailingStore {
            inner: MemoryStore::new(),
            fail_on: 7,
            sets: AtomicUsize::new(0),
        };
        let naming = KeyNaming::Current;
        store.set_all(&token_entries(&tokens("old", Some("id_old")), &naming)).await.unwrap();

        // The second batch fails on its second write.
        let err = store
            .set_all(&token_entries(&tokens("new", Some("id_new")), &naming))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteFailure(_)));
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn failed_rollback_is_reported() {
        let store = FailingStore {
            inner: MemoryStore::new(),
            fail_on: 2,
            sets: AtomicUsize::new(0),
        };
        let entries = vec![
            ("a".to_string(), "1".to_string()),
            ("undeletable".to_string(), "2".to_string()),
            ("b".to_string(), "3".to_string()),
        ];

        match store.set_all(&entries).await {
            Err(StoreError::WriteFailure(message)) => {
                assert!(message.contains("disk full"));
                assert!(message.contains("rollback left undeletable"));
            }
            other => panic!("expected WriteFailure, got {other:?}"),
        }
        assert!(matches!(store.get("a").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn wipe_all_continues_past_failures() {
        let store = FailingStore {
            inner: MemoryStore::new(),
            fail_on: usize::MAX,
            sets: AtomicUsize::new(0),
        };
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();

        let keys = vec!["a".to_string(), "undeletable".to_string(), "b".to_string()];
        let err = store.wipe_all(&keys).await.unwrap_err();
        assert_eq!(err, StoreError::DeleteFailure("undeletable".into()));
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn file_store_creates_file_on_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        assert!(!path.exists());

        let store = FileStore::load(path.clone()).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), "{}");
    }

    #[tokio::test]
    async fn file_store_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let naming = KeyNaming::Current;

        let store = FileStore::load(path.clone()).await.unwrap();
        store.set_all(&token_entries(&tokens("1", Some("id_1")), &naming)).await.unwrap();
        drop(store);

        let reloaded = FileStore::load(path).await.unwrap();
        let read = read_token_set(&reloaded, &naming).await.unwrap();
        assert_eq!(read.access_token.expose_str(), "at_1");
        assert_eq!(read.scope, "openid");
    }

    #[tokio::test]
    async fn file_store_wipe_removes_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::load(dir.path().join("credentials.json")).await.unwrap();
        store.set("unrelated", "keep").await.unwrap();
        store
            .set_all(&token_entries(&tokens("1", None), &KeyNaming::Current))
            .await
            .unwrap();

        store.wipe_all(&KeyNaming::Current.all_keys()).await.unwrap();

        assert_eq!(store.get("unrelated").await.unwrap(), "keep");
        assert!(matches!(
            store.get("oidc.access_token").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_stores_sharing_a_directory_write_independently() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileStore::load(dir.path().join("first.json")).await.unwrap();
        let second = FileStore::load(dir.path().join("second.json")).await.unwrap();

        for i in 0..20 {
            let value = i.to_string();
            let (a, b) = tokio::join!(first.set("k", &value), second.set("k", &value));
            a.unwrap();
            b.unwrap();
        }

        let first = FileStore::load(dir.path().join("first.json")).await.unwrap();
        let second = FileStore::load(dir.path().join("second.json")).await.unwrap();
        assert_eq!(first.get("k").await.unwrap(), "19");
        assert_eq!(second.get("k").await.unwrap(), "19");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileStore::load(path.clone()).await.unwrap();
        store.set("k", "v").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileStore::load(path).await.err().unwrap();
        assert!(matches!(err, StoreError::ReadFailure(_)));
    }
}
