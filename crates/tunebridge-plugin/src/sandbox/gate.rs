//! Process-wide single-slot execution gate.
//!
//! Holding the gate means owning the one "current plugin" slot. The guard
//! installs a [`HostContext`] on entry and restores the previous slot value
//! when dropped, on success and failure alike.

use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, MutexGuard};

use super::HostContext;

#[derive(Debug, Default)]
pub struct ExecutionGate {
    slot: Mutex<Option<HostContext>>,
}

impl ExecutionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The gate shared by every host in the process.
    pub fn global() -> Arc<ExecutionGate> {
        static GLOBAL: OnceLock<Arc<ExecutionGate>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ExecutionGate::new())).clone()
    }

    /// Wait for the slot, then install `context` until the guard drops.
    pub async fn enter(&self, context: HostContext) -> GateGuard<'_> {
        let mut slot = self.slot.lock().await;
        let previous = slot.replace(context);
        GateGuard { slot, previous }
    }

    /// True when nobody holds the gate and no context is installed.
    pub fn is_empty(&self) -> bool {
        self.slot.try_lock().map(|s| s.is_none()).unwrap_or(false)
    }

    /// Context installed right now, if the gate is free to inspect.
    pub fn current(&self) -> Option<HostContext> {
        self.slot.try_lock().ok().and_then(|s| s.clone())
    }
}

/// Proof of holding the gate.
#[derive(Debug)]
pub struct GateGuard<'a> {
    slot: MutexGuard<'a, Option<HostContext>>,
    previous: Option<HostContext>,
}

impl GateGuard<'_> {
    pub fn context(&self) -> Option<&HostContext> {
        self.slot.as_ref()
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        *self.slot = self.previous.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PluginDescriptor;
    use std::time::Duration;

    fn context(name: &str) -> HostContext {
        HostContext {
            plugin_id: format!("{name}-id"),
            plugin_name: name.into(),
            descriptor: PluginDescriptor::new(name, "https://plugins.example/p.js"),
            os: "linux".into(),
            app_version: "1.0.0".into(),
        }
    }

    #[tokio::test]
    async fn test_enter_installs_and_drop_restores() {
        let gate = ExecutionGate::new();
        assert!(gate.is_empty());
        {
            let guard = gate.enter(context("a")).await;
            assert_eq!(guard.context().map(|c| c.plugin_name.as_str()), Some("a"));
            assert!(!gate.is_empty());
        }
        assert!(gate.is_empty());
        assert!(gate.current().is_none());
    }

    #[tokio::test]
    async fn test_guard_restores_after_error_path() {
        let gate = ExecutionGate::new();
        let result: Result<(), &str> = async {
            let _guard = gate.enter(context("a")).await;
            Err("plugin threw")
        }
        .await;
        assert!(result.is_err());
        assert!(gate.is_empty());
    }

    #[tokio::test]
    async fn test_second_entry_waits_for_first() {
        let gate = Arc::new(ExecutionGate::new());
        let first = gate.enter(context("a")).await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let guard = gate.enter(context("b")).await;
                guard.context().map(|c| c.plugin_name.clone())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert_eq!(waiter.await.unwrap().as_deref(), Some("b"));
        assert!(gate.is_empty());
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&ExecutionGate::global(), &ExecutionGate::global()));
    }
}
