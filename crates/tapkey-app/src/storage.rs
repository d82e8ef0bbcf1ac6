//! Device-local key-value storage
//!
//! Values are JSON documents keyed by namespaced strings:
//! `{settingKind}_{keyId}_{userId}` for per-key settings and
//! `{PIN_KEY}_{userId}` for the session PIN.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::Serialize;

use tapkey_core::prelude::*;

/// Storage key prefix of the session PIN digest
pub const PIN_KEY: &str = "app_pin";

/// Storage key prefix of the locally read notification ids
pub const READ_NOTIFICATIONS_KEY: &str = "read_notifications";

/// Kind of per-key setting document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Notifications,
    Security,
}

impl SettingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKind::Notifications => "notification_settings",
            SettingKind::Security => "security_settings",
        }
    }
}

/// `{settingKind}_{keyId}_{userId}`
pub fn setting_key(kind: SettingKind, key_id: &str, user_id: &str) -> String {
    format!("{}_{}_{}", kind.as_str(), key_id, user_id)
}

/// `{PIN_KEY}_{userId}`
pub fn pin_key(user_id: &str) -> String {
    format!("{}_{}", PIN_KEY, user_id)
}

pub fn read_notifications_key(user_id: &str) -> String {
    format!("{}_{}", READ_NOTIFICATIONS_KEY, user_id)
}

/// Persistent string key-value storage
#[trait_variant::make(KeyValueStore: Send)]
pub trait LocalKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Read and deserialize a JSON value
pub async fn get_json<K, T>(store: &K, key: &str) -> Result<Option<T>>
where
    K: KeyValueStore + ?Sized,
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serialize and store a JSON value
pub async fn set_json<K, T>(store: &K, key: &str, value: &T) -> Result<()>
where
    K: KeyValueStore + ?Sized,
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_string(value)?;
    store.set(key, raw).await
}

// ─────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────

/// Process-local store, used in tests and for ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`remove` fail until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::storage("storage is read-only"));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.check_writable()?;
        self.values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// File-backed store
// ─────────────────────────────────────────────────────────────────

/// Characters escaped in file names; `%` itself is escaped, so distinct
/// keys never share a file
const FILE_NAME_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// One JSON document per key under a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create the store, creating `dir` if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::storage(format!("Failed to create {}: {}", dir.display(), e)))?;
        debug!("Local storage at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file = utf8_percent_encode(key, FILE_NAME_ESCAPES);
        self.dir.join(format!("{}.json", file))
    }
}

impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        trace!("stored {}", path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        get_json, pin_key, read_notifications_key, set_json, setting_key, FileStore, KeyValueStore,
        MemoryStore, SettingKind,
    };
    use std::collections::BTreeSet;
    use tapkey_core::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_namespacing() {
        assert_eq!(
            setting_key(SettingKind::Notifications, "k1", "u1"),
            "notification_settings_k1_u1"
        );
        assert_eq!(
            setting_key(SettingKind::Security, "k1", "u1"),
            "security_settings_k1_u1"
        );
        assert_eq!(pin_key("u1"), "app_pin_u1");
        assert_eq!(read_notifications_key("u1"), "read_notifications_u1");
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_json() {
        let store = MemoryStore::new();
        let ids: BTreeSet<String> = ["1", "2"].iter().map(|s| s.to_string()).collect();

        set_json(&store, "ids", &ids).await.unwrap();
        let loaded: Option<BTreeSet<String>> = get_json(&store, "ids").await.unwrap();
        assert_eq!(loaded, Some(ids));

        let missing: Option<BTreeSet<String>> = get_json(&store, "nope").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_fail_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.set("k", "v".to_string()).await,
            Err(Error::Storage { .. })
        ));
        store.set_fail_writes(false);
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path().join("storage")).unwrap();
        store.set(&pin_key("u1"), "\"digest\"".to_string()).await.unwrap();

        let reopened = FileStore::open(temp.path().join("storage")).unwrap();
        assert_eq!(
            reopened.get(&pin_key("u1")).await.unwrap().as_deref(),
            Some("\"digest\"")
        );

        reopened.remove(&pin_key("u1")).await.unwrap();
        reopened.remove(&pin_key("u1")).await.unwrap();
        assert!(reopened.get(&pin_key("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_escapes_keys() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        store.set("a/../b", "1".to_string()).await.unwrap();

        assert!(temp.path().join("a%2F..%2Fb.json").exists());
        assert_eq!(store.get("a/../b").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_file_store_keys_never_collide() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        store.set("pin_u@x", "\"at\"".to_string()).await.unwrap();
        store.set("pin_u_x", "\"underscore\"".to_string()).await.unwrap();
        store.set("pin_u%40x", "\"percent\"".to_string()).await.unwrap();

        assert_eq!(store.get("pin_u@x").await.unwrap().as_deref(), Some("\"at\""));
        assert_eq!(
            store.get("pin_u_x").await.unwrap().as_deref(),
            Some("\"underscore\"")
        );
        assert_eq!(
            store.get("pin_u%40x").await.unwrap().as_deref(),
            Some("\"percent\"")
        );
    }

    #[tokio::test]
    async fn test_get_json_reports_corrupt_value() {
        let store = MemoryStore::new();
        store.set("bad", "{not json".to_string()).await.unwrap();
        let result: Result<Option<Vec<String>>> = get_json(&store, "bad").await;
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
