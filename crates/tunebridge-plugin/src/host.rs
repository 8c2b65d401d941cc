//! Plugin host: turns an installed plugin into a ready [`MusicPlugin`].
//!
//! Load pipeline: code loader (cache, then primary URL and mirrors) →
//! sandbox execution → export classification → adapter. Execution and
//! classification run while holding the process-wide [`ExecutionGate`].

use std::sync::Arc;

use crate::adapter::{classify, MusicPlugin};
use crate::code_cache::CodeCache;
use crate::descriptor::InstalledPlugin;
use crate::error::PluginError;
use crate::loader::CodeLoader;
use crate::lyric_cache::LyricCache;
use crate::net::{NetworkConfig, ProxiedFetch, ReqwestTransport};
use crate::request::AxiosShim;
use crate::sandbox::{ExecutionGate, HostContext, HostServices, Sandbox, SandboxConfig};
use crate::store::KeyValueStore;
use crate::variables::UserVariables;

pub struct PluginHost {
    loader: CodeLoader,
    services: HostServices,
    sandbox_config: SandboxConfig,
    gate: Arc<ExecutionGate>,
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("sandbox_config", &self.sandbox_config)
            .finish_non_exhaustive()
    }
}

impl PluginHost {
    pub fn new(loader: CodeLoader, services: HostServices, sandbox_config: SandboxConfig) -> Self {
        Self {
            loader,
            services,
            sandbox_config,
            gate: ExecutionGate::global(),
        }
    }

    /// Wire a host from environment configuration over `store`.
    ///
    /// Plugin requests share one reqwest client, the default rewrite table
    /// and the process-wide lyric cache.
    pub fn from_env(
        store: Arc<dyn KeyValueStore>,
        variables: UserVariables,
    ) -> Result<Self, PluginError> {
        let network = NetworkConfig::from_env();
        let transport = ReqwestTransport::from_config(&network)?;
        let fetch = Arc::new(ProxiedFetch::new(Arc::new(transport), network));
        let axios = AxiosShim::new(fetch.clone(), LyricCache::global().clone());
        let loader = CodeLoader::new(fetch, CodeCache::new(store));
        Ok(Self::new(
            loader,
            HostServices::new(axios, variables),
            SandboxConfig::from_env(),
        ))
    }

    /// Use `gate` instead of the process-wide one.
    pub fn with_gate(mut self, gate: Arc<ExecutionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn gate(&self) -> &Arc<ExecutionGate> {
        &self.gate
    }

    pub fn loader(&self) -> &CodeLoader {
        &self.loader
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    /// Load `plugin` from the cache when possible, otherwise download it.
    pub async fn load_plugin_instance(
        &self,
        plugin: &InstalledPlugin,
    ) -> Result<MusicPlugin, PluginError> {
        let code = self.loader.load(plugin).await?;
        self.instantiate(plugin, &code).await
    }

    /// Re-download `plugin` regardless of the cache and load it.
    pub async fn force_load_plugin_instance(
        &self,
        plugin: &InstalledPlugin,
    ) -> Result<MusicPlugin, PluginError> {
        let code = self.loader.load_fresh(plugin).await?;
        self.instantiate(plugin, &code).await
    }

    /// Execute `code` as `plugin` and adapt whatever it exported.
    pub async fn instantiate(
        &self,
        plugin: &InstalledPlugin,
        code: &str,
    ) -> Result<MusicPlugin, PluginError> {
        let context = HostContext::for_plugin(plugin, &self.services);

        let (sandbox, classified) = {
            let _guard = self.gate.enter(context.clone()).await;
            let sandbox = Sandbox::spawn(&context, &self.services, &self.sandbox_config).await?;
            let summary = sandbox.execute(code, &context).await?;
            let classified = classify(&sandbox).await?;
            tracing::debug!(
                plugin = %plugin.name(),
                registrations = summary.registrations,
                shape = classified.shape.as_str(),
                "plugin classified"
            );
            (sandbox, classified)
        };

        let music = MusicPlugin::adapt(
            plugin.name(),
            classified,
            Arc::new(sandbox),
            self.services.axios.lyrics().clone(),
        )?;
        tracing::info!(
            plugin = %plugin.name(),
            plugin_id = %plugin.id,
            shape = music.shape().as_str(),
            "plugin loaded"
        );
        Ok(music)
    }
}
