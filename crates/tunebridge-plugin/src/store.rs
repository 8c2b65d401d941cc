//! Persistent key-value storage for host state.
//!
//! Every persisted structure (code cache, installed plugins, user variables)
//! is a single JSON document under a well-known key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::PluginError;

pub const CODE_CACHE_KEY: &str = "plugin_code_cache";
pub const INSTALLED_PLUGINS_KEY: &str = "installed_plugins";
pub const USER_VARIABLES_KEY: &str = "plugin_user_variables";

/// Operations every key-value backend must implement.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PluginError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), PluginError>;

    async fn remove(&self, key: &str) -> Result<(), PluginError>;
}

/// Read and deserialize a JSON document, `None` when the key is absent.
///
/// A corrupted document is logged and treated as absent.
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, PluginError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(key = %key, "discarding unreadable stored document: {e}");
            Ok(None)
        }
    }
}

pub async fn write_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), PluginError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw).await
}

// ─── Local Filesystem Backend ──────────────────────────────────────

/// One `<key>.json` file per key under a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

/// Keys become file names; anything outside `[A-Za-z0-9_-]` is replaced.
fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

impl FileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn from_env() -> Self {
        let base = std::env::var("TUNEBRIDGE_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        Self::new(base)
    }

    pub fn base(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", sanitize_key(key)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PluginError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PluginError::Store(format!("failed to read '{key}': {e}"))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PluginError> {
        fs::create_dir_all(&self.base_path).await?;
        let path = self.path_for(key);
        // write-then-rename so readers never see a half-written document
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PluginError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ─── In-memory Backend ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PluginError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PluginError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PluginError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
