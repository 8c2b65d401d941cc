//! JavaScript plugin sandbox using QuickJS (rquickjs).
//!
//! Each plugin runs in its own interpreter on a dedicated thread with
//! configurable memory, stack and promise-job limits. Plugin code sees only
//! the injected globals and shims; host operations go through
//! [`HostBridge`].

mod bridge;
mod gate;
mod worker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub use bridge::HostBridge;
pub use gate::{ExecutionGate, GateGuard};

use crate::adapter::{ExportProbe, ExportReport, ExportSlot, PluginInvoker};
use crate::descriptor::{InstalledPlugin, PluginDescriptor};
use crate::error::PluginError;
use crate::request::AxiosShim;
use crate::variables::UserVariables;

/// Thread stack on top of the interpreter's own stack limit.
const THREAD_STACK_HEADROOM: usize = 4 * 1024 * 1024;

// ─── Configuration ──────────────────────────────────────────────────────

/// Configuration for the plugin interpreter.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum interpreter heap in bytes (default: 64 MB).
    pub memory_limit: usize,
    /// Maximum interpreter stack in bytes (default: 1 MB).
    pub max_stack_size: usize,
    /// Promise jobs run per call before the call is aborted (default: 100 000).
    pub max_jobs: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
            max_stack_size: 1024 * 1024,
            max_jobs: 100_000,
        }
    }
}

impl SandboxConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self {
            memory_limit: std::env::var("PLUGIN_MEMORY_LIMIT_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(64)
                * 1024
                * 1024,
            max_stack_size: std::env::var("PLUGIN_MAX_STACK_KB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(1024)
                * 1024,
            max_jobs: std::env::var("PLUGIN_MAX_JOBS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100_000),
        }
    }
}

// ─── Host context ───────────────────────────────────────────────────────

/// Identity of the plugin currently executing, as installed in the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    pub plugin_id: String,
    pub plugin_name: String,
    pub descriptor: PluginDescriptor,
    pub os: String,
    pub app_version: String,
}

impl HostContext {
    pub fn for_plugin(plugin: &InstalledPlugin, services: &HostServices) -> Self {
        Self {
            plugin_id: plugin.id.clone(),
            plugin_name: plugin.name().to_string(),
            descriptor: plugin.descriptor.clone(),
            os: services.os.clone(),
            app_version: services.app_version.clone(),
        }
    }

    /// What plugin code sees as `descriptor`, `env.os` and `env.appVersion`.
    fn script_info(&self) -> Value {
        let mut descriptor = serde_json::to_value(&self.descriptor).unwrap_or(Value::Null);
        if let Value::Object(ref mut map) = descriptor {
            map.insert("id".into(), Value::String(self.plugin_id.clone()));
        }
        json!({
            "descriptor": descriptor,
            "os": self.os,
            "appVersion": self.app_version,
        })
    }
}

/// Shared services every interpreter's bridge is built from.
#[derive(Debug, Clone)]
pub struct HostServices {
    pub axios: AxiosShim,
    pub variables: UserVariables,
    pub os: String,
    pub app_version: String,
}

impl HostServices {
    pub fn new(axios: AxiosShim, variables: UserVariables) -> Self {
        Self {
            axios,
            variables,
            os: std::env::consts::OS.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// ─── Sandbox ────────────────────────────────────────────────────────────

/// What running the plugin body produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionSummary {
    /// `registerPlugin` calls made while the body ran.
    pub registrations: usize,
}

/// Handle to one plugin interpreter.
///
/// Dropping the handle cancels in-flight host requests and stops the
/// interpreter thread once its current job returns.
pub struct Sandbox {
    plugin_name: String,
    jobs: mpsc::UnboundedSender<worker::Job>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("plugin_name", &self.plugin_name)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Start an interpreter for the plugin described by `context`.
    ///
    /// Must be called from inside a tokio runtime; host operations block the
    /// interpreter thread on that runtime.
    pub async fn spawn(
        context: &HostContext,
        services: &HostServices,
        config: &SandboxConfig,
    ) -> Result<Self, PluginError> {
        let handle = Handle::try_current()
            .map_err(|e| PluginError::Sandbox(format!("no tokio runtime available: {e}")))?;
        let cancel = CancellationToken::new();
        let bridge = HostBridge::new(context, services, handle, cancel.clone());
        let (jobs, receiver) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let worker_config = config.clone();
        std::thread::Builder::new()
            .name(format!("plugin-{}", context.plugin_id))
            .stack_size(config.max_stack_size + THREAD_STACK_HEADROOM)
            .spawn(move || worker::run(worker_config, bridge, ready_tx, receiver))
            .map_err(|e| PluginError::Sandbox(format!("failed to spawn interpreter thread: {e}")))?;

        ready_rx.await.map_err(|_| {
            PluginError::Sandbox("interpreter thread exited during startup".into())
        })??;

        tracing::debug!(plugin = %context.plugin_name, "interpreter started");
        Ok(Self {
            plugin_name: context.plugin_name.clone(),
            jobs,
            cancel,
        })
    }

    pub fn name(&self) -> &str {
        &self.plugin_name
    }

    /// Token that aborts every host request this interpreter has in flight.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn call<P: Serialize + ?Sized>(
        &self,
        op: &'static str,
        payload: &P,
    ) -> Result<Value, PluginError> {
        let payload = serde_json::to_string(payload)?;
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(worker::Job { op, payload, reply })
            .map_err(|_| {
                PluginError::Sandbox(format!("interpreter for '{}' has stopped", self.plugin_name))
            })?;
        response.await.map_err(|_| {
            PluginError::Sandbox(format!(
                "interpreter for '{}' stopped mid-call",
                self.plugin_name
            ))
        })?
    }

    /// Run the plugin body once with the host handle and globals in place.
    pub async fn execute(
        &self,
        code: &str,
        context: &HostContext,
    ) -> Result<ExecutionSummary, PluginError> {
        let value = self
            .call(
                "execute",
                &json!({ "code": code, "host": context.script_info() }),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl ExportProbe for Sandbox {
    async fn probe(&self, slot: ExportSlot) -> Result<ExportReport, PluginError> {
        let value = self.call("probe", slot.as_str()).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn select(&self, slot: ExportSlot) -> Result<(), PluginError> {
        self.call("select", slot.as_str()).await.map(|_| ())
    }
}

#[async_trait]
impl PluginInvoker for Sandbox {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, PluginError> {
        self.call("invoke", &json!({ "method": method, "args": args }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_config_default() {
        let config = SandboxConfig::default();
        assert_eq!(config.memory_limit, 64 * 1024 * 1024);
        assert_eq!(config.max_stack_size, 1024 * 1024);
        assert_eq!(config.max_jobs, 100_000);
    }

    #[test]
    fn test_sandbox_config_from_env() {
        std::env::set_var("PLUGIN_MEMORY_LIMIT_MB", "16");
        std::env::set_var("PLUGIN_MAX_STACK_KB", "512");
        std::env::set_var("PLUGIN_MAX_JOBS", "50");

        let config = SandboxConfig::from_env();
        assert_eq!(config.memory_limit, 16 * 1024 * 1024);
        assert_eq!(config.max_stack_size, 512 * 1024);
        assert_eq!(config.max_jobs, 50);

        // Clean up
        std::env::remove_var("PLUGIN_MEMORY_LIMIT_MB");
        std::env::remove_var("PLUGIN_MAX_STACK_KB");
        std::env::remove_var("PLUGIN_MAX_JOBS");

        let config = SandboxConfig::from_env();
        assert_eq!(config.memory_limit, 64 * 1024 * 1024);
    }

    #[test]
    fn test_script_info_carries_id_and_env() {
        let context = HostContext {
            plugin_id: "abc".into(),
            plugin_name: "demo".into(),
            descriptor: PluginDescriptor::new("demo", "https://plugins.example/demo.js")
                .with_version("1.2.0"),
            os: "linux".into(),
            app_version: "0.1.0".into(),
        };
        let info = context.script_info();
        assert_eq!(info["descriptor"]["id"], "abc");
        assert_eq!(info["descriptor"]["version"], "1.2.0");
        assert_eq!(info["os"], "linux");
        assert_eq!(info["appVersion"], "0.1.0");
    }
}
