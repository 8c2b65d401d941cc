//! Plugin registry: installed plugins, their load state and user variables.
//!
//! The `PluginRegistry` is the front door of the plugin host. It persists
//! installed descriptors, drives each plugin through its load state machine
//! and hands out ready [`MusicPlugin`] instances.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::adapter::MusicPlugin;
use crate::descriptor::{parse_feed, InstalledPlugin, PluginDescriptor};
use crate::error::PluginError;
use crate::host::PluginHost;
use crate::net::HttpRequest;
use crate::store::{read_json, write_json, FileStore, KeyValueStore, INSTALLED_PLUGINS_KEY};
use crate::variables::{UserVariables, VariableMap};

// ─── Load state ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

impl LoadStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    /// `Ready → Loading` is only legal as an explicit reload.
    fn allows(self, to: LoadStatus, reload: bool) -> bool {
        use LoadStatus::*;
        match (self, to) {
            (Idle | Error, Loading) => true,
            (Ready, Loading) => reload,
            (Loading, Ready | Error) => true,
            _ => false,
        }
    }
}

/// Runtime record of one installed plugin.
struct LoadedPlugin {
    meta: InstalledPlugin,
    status: LoadStatus,
    instance: Option<Arc<MusicPlugin>>,
    error: Option<String>,
}

impl LoadedPlugin {
    fn idle(meta: InstalledPlugin) -> Self {
        Self {
            meta,
            status: LoadStatus::Idle,
            instance: None,
            error: None,
        }
    }

    fn transition(&mut self, to: LoadStatus, reload: bool) -> Result<(), PluginError> {
        if !self.status.allows(to, reload) {
            return Err(PluginError::InvalidState(format!(
                "plugin '{}' cannot go from {} to {}",
                self.meta.name(),
                self.status.as_str(),
                to.as_str()
            )));
        }
        self.status = to;
        Ok(())
    }

    fn record(&self) -> PluginRecord {
        PluginRecord {
            meta: self.meta.clone(),
            status: self.status,
            error: self.error.clone(),
        }
    }
}

/// Snapshot of a plugin's registry entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginRecord {
    #[serde(flatten)]
    pub meta: InstalledPlugin,
    pub status: LoadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What importing a feed changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedImport {
    pub installed: Vec<InstalledPlugin>,
    /// Already installed under the same URL, descriptor refreshed.
    pub updated: Vec<InstalledPlugin>,
    /// Already installed with an identical descriptor.
    pub unchanged: usize,
    /// Entries that failed validation and were skipped.
    pub rejected: usize,
}

// ─── Registry ───────────────────────────────────────────────────────────

pub struct PluginRegistry {
    /// Entries indexed by plugin id.
    plugins: RwLock<HashMap<String, LoadedPlugin>>,
    host: PluginHost,
    store: Arc<dyn KeyValueStore>,
    variables: UserVariables,
    /// Serializes loads; execution is serialized again by the host's gate.
    load_lock: Mutex<()>,
}

impl PluginRegistry {
    /// Open the registry over `store`, restoring installed plugins as idle.
    pub async fn open(host: PluginHost, store: Arc<dyn KeyValueStore>) -> Result<Self, PluginError> {
        let installed: Vec<InstalledPlugin> = read_json(store.as_ref(), INSTALLED_PLUGINS_KEY)
            .await?
            .unwrap_or_default();
        tracing::debug!(count = installed.len(), "restored installed plugins");
        let plugins = installed
            .into_iter()
            .map(|p| (p.id.clone(), LoadedPlugin::idle(p)))
            .collect();
        let variables = host.services().variables.clone();
        Ok(Self {
            plugins: RwLock::new(plugins),
            host,
            store,
            variables,
            load_lock: Mutex::new(()),
        })
    }

    /// Registry over a [`FileStore`] with every setting read from the
    /// environment.
    pub async fn from_env() -> Result<Self, PluginError> {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::from_env());
        let variables = UserVariables::load(store.as_ref()).await?;
        let host = PluginHost::from_env(store.clone(), variables)?;
        Self::open(host, store).await
    }

    pub fn host(&self) -> &PluginHost {
        &self.host
    }

    async fn persist(&self) -> Result<(), PluginError> {
        let mut installed: Vec<InstalledPlugin> = {
            let plugins = self.plugins.read().await;
            plugins.values().map(|p| p.meta.clone()).collect()
        };
        installed.sort_by(|a, b| a.installed_at.cmp(&b.installed_at).then(a.id.cmp(&b.id)));
        write_json(self.store.as_ref(), INSTALLED_PLUGINS_KEY, &installed).await
    }

    // ── Installation ────────────────────────────────────────────────

    /// Install `descriptor` under a fresh id.
    ///
    /// A plugin with the same URL must not already be installed.
    pub async fn install(&self, descriptor: PluginDescriptor) -> Result<InstalledPlugin, PluginError> {
        let installed = InstalledPlugin::install(descriptor)?;
        {
            let mut plugins = self.plugins.write().await;
            if let Some(existing) = plugins
                .values()
                .find(|p| p.meta.descriptor.url == installed.descriptor.url)
            {
                return Err(PluginError::AlreadyExists(format!(
                    "{} ({})",
                    existing.meta.name(),
                    existing.meta.descriptor.url
                )));
            }
            plugins.insert(installed.id.clone(), LoadedPlugin::idle(installed.clone()));
        }
        self.persist().await?;
        tracing::info!(plugin = %installed.name(), plugin_id = %installed.id, "plugin installed");
        Ok(installed)
    }

    /// Remove a plugin together with its cached code and user variables.
    pub async fn uninstall(&self, id: &str) -> Result<InstalledPlugin, PluginError> {
        let removed = {
            let mut plugins = self.plugins.write().await;
            plugins
                .remove(id)
                .ok_or_else(|| PluginError::NotFound(id.to_string()))?
        };
        self.persist().await?;
        if let Err(e) = self.host.loader().cache().remove(id).await {
            tracing::warn!(plugin_id = %id, "failed to drop cached plugin code: {e}");
        }
        if self.variables.remove_plugin(id) {
            self.variables.save(self.store.as_ref()).await?;
        }
        tracing::info!(plugin = %removed.meta.name(), plugin_id = %id, "plugin uninstalled");
        Ok(removed.meta)
    }

    /// Install every descriptor of the feed at `url`.
    ///
    /// Descriptors whose URL is already installed refresh that entry in
    /// place (same id); the next load picks up a changed version.
    pub async fn import_feed(&self, url: &str) -> Result<FeedImport, PluginError> {
        let fetch = self.host.services().axios.fetcher().clone();
        let response = fetch.fetch(HttpRequest::get(url)).await?;
        let descriptors = parse_feed(&response.body)?;
        tracing::info!(feed = %url, count = descriptors.len(), "importing plugin feed");
        self.import_descriptors(descriptors).await
    }

    /// Apply feed descriptors. Invalid entries are skipped and counted in
    /// [`FeedImport::rejected`]; whatever was applied is persisted.
    pub async fn import_descriptors(
        &self,
        descriptors: Vec<PluginDescriptor>,
    ) -> Result<FeedImport, PluginError> {
        let mut report = FeedImport::default();
        {
            let mut plugins = self.plugins.write().await;
            for descriptor in descriptors {
                if let Err(e) = descriptor.validate() {
                    tracing::warn!(plugin = %descriptor.name, url = %descriptor.url, "skipping feed entry: {e}");
                    report.rejected += 1;
                    continue;
                }
                let existing = plugins
                    .values_mut()
                    .find(|p| p.meta.descriptor.url == descriptor.url);
                match existing {
                    Some(entry) if entry.meta.descriptor == descriptor => report.unchanged += 1,
                    Some(entry) => {
                        if descriptor.is_downgrade_from(&entry.meta.descriptor) {
                            tracing::warn!(
                                plugin = %entry.meta.name(),
                                from = entry.meta.descriptor.version_key(),
                                to = descriptor.version_key(),
                                "feed offers an older plugin version"
                            );
                        }
                        entry.meta.descriptor = descriptor;
                        // a loaded instance runs the old code; the next load fetches the new one
                        if entry.status != LoadStatus::Loading {
                            *entry = LoadedPlugin::idle(entry.meta.clone());
                        }
                        report.updated.push(entry.meta.clone());
                    }
                    None => {
                        let installed = InstalledPlugin::install(descriptor)?;
                        plugins.insert(installed.id.clone(), LoadedPlugin::idle(installed.clone()));
                        report.installed.push(installed);
                    }
                }
            }
        }
        self.persist().await?;
        Ok(report)
    }

    /// Enable or disable a plugin. Disabling unloads it.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), PluginError> {
        {
            let mut plugins = self.plugins.write().await;
            let entry = plugins
                .get_mut(id)
                .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
            if entry.meta.enabled == enabled {
                return Ok(());
            }
            if entry.status == LoadStatus::Loading {
                return Err(PluginError::InvalidState(format!(
                    "plugin '{}' is loading",
                    entry.meta.name()
                )));
            }
            entry.meta.enabled = enabled;
            if !enabled {
                *entry = LoadedPlugin::idle(entry.meta.clone());
            }
        }
        self.persist().await?;
        tracing::info!(plugin_id = %id, enabled, "plugin enablement changed");
        Ok(())
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Ready instance of plugin `id`, loading it first when needed.
    pub async fn load(&self, id: &str) -> Result<Arc<MusicPlugin>, PluginError> {
        self.load_with(id, false).await
    }

    /// Reload plugin `id` from its source, bypassing the code cache.
    pub async fn reload(&self, id: &str) -> Result<Arc<MusicPlugin>, PluginError> {
        self.load_with(id, true).await
    }

    async fn load_with(&self, id: &str, reload: bool) -> Result<Arc<MusicPlugin>, PluginError> {
        let _serial = self.load_lock.lock().await;

        let meta = {
            let mut plugins = self.plugins.write().await;
            let entry = plugins
                .get_mut(id)
                .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
            if !entry.meta.enabled {
                return Err(PluginError::InvalidState(format!(
                    "plugin '{}' is disabled",
                    entry.meta.name()
                )));
            }
            if !reload {
                if let (LoadStatus::Ready, Some(instance)) = (entry.status, &entry.instance) {
                    return Ok(instance.clone());
                }
            }
            entry.transition(LoadStatus::Loading, reload)?;
            entry.meta.clone()
        };

        tracing::info!(plugin = %meta.name(), plugin_id = %meta.id, reload, "loading plugin");
        let result = if reload {
            self.host.force_load_plugin_instance(&meta).await
        } else {
            self.host.load_plugin_instance(&meta).await
        };

        let mut plugins = self.plugins.write().await;
        let Some(entry) = plugins.get_mut(id) else {
            return Err(PluginError::NotFound(id.to_string()));
        };
        match result {
            Ok(instance) => {
                let instance = Arc::new(instance);
                entry.transition(LoadStatus::Ready, reload)?;
                entry.instance = Some(instance.clone());
                entry.error = None;
                Ok(instance)
            }
            Err(e) => {
                tracing::error!(plugin = %meta.name(), plugin_id = %meta.id, "failed to load plugin: {e}");
                entry.transition(LoadStatus::Error, reload)?;
                entry.instance = None;
                entry.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Load every enabled plugin. Failures are recorded, not returned.
    ///
    /// Returns the number of plugins that ended up ready.
    pub async fn load_enabled(&self) -> usize {
        let ids: Vec<String> = {
            let plugins = self.plugins.read().await;
            plugins
                .values()
                .filter(|p| p.meta.enabled)
                .map(|p| p.meta.id.clone())
                .collect()
        };
        let mut ready = 0;
        for id in ids {
            if self.load(&id).await.is_ok() {
                ready += 1;
            }
        }
        ready
    }

    // ── Query methods ───────────────────────────────────────────────

    /// Every entry, oldest installation first.
    pub async fn list(&self) -> Vec<PluginRecord> {
        let plugins = self.plugins.read().await;
        let mut records: Vec<PluginRecord> = plugins.values().map(LoadedPlugin::record).collect();
        records.sort_by(|a, b| {
            a.meta
                .installed_at
                .cmp(&b.meta.installed_at)
                .then_with(|| a.meta.id.cmp(&b.meta.id))
        });
        records
    }

    pub async fn get(&self, id: &str) -> Option<PluginRecord> {
        self.plugins.read().await.get(id).map(LoadedPlugin::record)
    }

    /// Look a plugin up by id, or by name ignoring case.
    pub async fn find(&self, id_or_name: &str) -> Option<PluginRecord> {
        let plugins = self.plugins.read().await;
        plugins
            .get(id_or_name)
            .or_else(|| {
                plugins
                    .values()
                    .find(|p| p.meta.name().eq_ignore_ascii_case(id_or_name))
            })
            .map(LoadedPlugin::record)
    }

    /// Ready instance without triggering a load.
    pub async fn instance(&self, id: &str) -> Option<Arc<MusicPlugin>> {
        self.plugins.read().await.get(id).and_then(|p| p.instance.clone())
    }

    // ── User variables ──────────────────────────────────────────────

    pub fn variables(&self, id: &str) -> VariableMap {
        self.variables.for_plugin(id)
    }

    pub async fn set_variable(&self, id: &str, name: &str, value: &str) -> Result<(), PluginError> {
        self.ensure_installed(id).await?;
        self.variables.set(id, name, value)?;
        self.variables.save(self.store.as_ref()).await
    }

    pub async fn replace_variables(&self, id: &str, vars: VariableMap) -> Result<(), PluginError> {
        self.ensure_installed(id).await?;
        self.variables.replace(id, vars)?;
        self.variables.save(self.store.as_ref()).await
    }

    async fn ensure_installed(&self, id: &str) -> Result<(), PluginError> {
        if self.plugins.read().await.contains_key(id) {
            Ok(())
        } else {
            Err(PluginError::NotFound(id.to_string()))
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
