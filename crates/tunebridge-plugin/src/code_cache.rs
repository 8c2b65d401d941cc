//! Versioned cache of downloaded plugin source.
//!
//! Persisted as `{[pluginId]: {code, url, version, timestamp}}` under
//! `plugin_code_cache`. An entry is only valid for the exact url and version
//! it was downloaded for.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::descriptor::InstalledPlugin;
use crate::error::PluginError;
use crate::store::{read_json, write_json, KeyValueStore, CODE_CACHE_KEY};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCacheEntry {
    pub code: String,
    pub url: String,
    pub version: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl CodeCacheEntry {
    fn matches(&self, plugin: &InstalledPlugin) -> bool {
        self.url == plugin.descriptor.url && self.version == plugin.descriptor.version_key()
    }
}

#[derive(Clone)]
pub struct CodeCache {
    store: Arc<dyn KeyValueStore>,
}

impl CodeCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn entries(&self) -> Result<HashMap<String, CodeCacheEntry>, PluginError> {
        Ok(read_json(self.store.as_ref(), CODE_CACHE_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Cached code for `plugin`, or `None` on a miss or a stale entry.
    pub async fn get(&self, plugin: &InstalledPlugin) -> Result<Option<String>, PluginError> {
        let entries = self.entries().await?;
        match entries.get(&plugin.id) {
            Some(entry) if entry.matches(plugin) => Ok(Some(entry.code.clone())),
            Some(entry) => {
                tracing::debug!(
                    plugin = %plugin.name(),
                    plugin_id = %plugin.id,
                    cached_version = %entry.version,
                    "cached plugin code is stale"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn put(&self, plugin: &InstalledPlugin, code: &str) -> Result<(), PluginError> {
        let mut entries = self.entries().await?;
        entries.insert(
            plugin.id.clone(),
            CodeCacheEntry {
                code: code.to_string(),
                url: plugin.descriptor.url.clone(),
                version: plugin.descriptor.version_key().to_string(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        );
        write_json(self.store.as_ref(), CODE_CACHE_KEY, &entries).await
    }

    pub async fn remove(&self, plugin_id: &str) -> Result<(), PluginError> {
        let mut entries = self.entries().await?;
        if entries.remove(plugin_id).is_some() {
            write_json(self.store.as_ref(), CODE_CACHE_KEY, &entries).await?;
        }
        Ok(())
    }

    /// Raw entry, for inspection.
    pub async fn entry(&self, plugin_id: &str) -> Result<Option<CodeCacheEntry>, PluginError> {
        Ok(self.entries().await?.remove(plugin_id))
    }
}
