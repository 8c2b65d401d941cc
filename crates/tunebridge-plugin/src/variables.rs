//! Per-plugin user variables.
//!
//! Users configure values such as cookies or API keys for a plugin; the
//! plugin reads them through `env.getUserVariables()`. Persisted as
//! `{[pluginId]: {name: value}}` under `plugin_user_variables`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::error::PluginError;
use crate::store::{read_json, write_json, KeyValueStore, USER_VARIABLES_KEY};

pub type VariableMap = BTreeMap<String, String>;

/// Shared, synchronously readable view of every plugin's variables.
///
/// Reads happen on interpreter threads, so the map sits behind a std lock.
#[derive(Debug, Clone, Default)]
pub struct UserVariables {
    inner: Arc<RwLock<HashMap<String, VariableMap>>>,
}

impl UserVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(store: &dyn KeyValueStore) -> Result<Self, PluginError> {
        let stored: HashMap<String, VariableMap> = read_json(store, USER_VARIABLES_KEY)
            .await?
            .unwrap_or_default();
        Ok(Self {
            inner: Arc::new(RwLock::new(stored)),
        })
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<(), PluginError> {
        let snapshot = self.snapshot()?;
        write_json(store, USER_VARIABLES_KEY, &snapshot).await
    }

    fn snapshot(&self) -> Result<HashMap<String, VariableMap>, PluginError> {
        self.inner
            .read()
            .map(|m| m.clone())
            .map_err(|_| PluginError::Store("user variable lock poisoned".into()))
    }

    /// Variables of one plugin; empty when none were set.
    pub fn for_plugin(&self, plugin_id: &str) -> VariableMap {
        self.inner
            .read()
            .ok()
            .and_then(|m| m.get(plugin_id).cloned())
            .unwrap_or_default()
    }

    pub fn set(
        &self,
        plugin_id: &str,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), PluginError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| PluginError::Store("user variable lock poisoned".into()))?;
        map.entry(plugin_id.to_string())
            .or_default()
            .insert(name.into(), value.into());
        Ok(())
    }

    pub fn replace(&self, plugin_id: &str, vars: VariableMap) -> Result<(), PluginError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| PluginError::Store("user variable lock poisoned".into()))?;
        if vars.is_empty() {
            map.remove(plugin_id);
        } else {
            map.insert(plugin_id.to_string(), vars);
        }
        Ok(())
    }

    /// Drop every variable of `plugin_id`. Returns whether any existed.
    pub fn remove_plugin(&self, plugin_id: &str) -> bool {
        self.inner
            .write()
            .map(|mut m| m.remove(plugin_id).is_some())
            .unwrap_or(false)
    }
}
