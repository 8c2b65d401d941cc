//! Interpreter thread.
//!
//! QuickJS runtimes are not `Send`, so each plugin's runtime is created on
//! and never leaves its own OS thread. Jobs arrive one at a time over a
//! channel; the thread exits when the channel closes.

use rquickjs::{Context, Ctx, Function, Runtime};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::bridge::HostBridge;
use super::SandboxConfig;
use crate::error::PluginError;
use crate::shims::ShimRegistry;

const PRELUDE: &str = include_str!("../../js/prelude.js");

/// Characters of a JavaScript stack trace kept in error messages.
const MAX_STACK_CHARS: usize = 300;

pub(super) struct Job {
    pub op: &'static str,
    pub payload: String,
    pub reply: oneshot::Sender<Result<Value, PluginError>>,
}

/// Thread body: boot the interpreter, acknowledge, then serve jobs.
pub(super) fn run(
    config: SandboxConfig,
    bridge: HostBridge,
    ready: oneshot::Sender<Result<(), PluginError>>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    let plugin = bridge.plugin_name().to_string();
    let interpreter = match Interpreter::boot(&config, bridge) {
        Ok(interpreter) => {
            let _ = ready.send(Ok(()));
            interpreter
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    while let Some(job) = jobs.blocking_recv() {
        let result = interpreter.run(job.op, &job.payload);
        if let Err(ref e) = result {
            tracing::debug!(plugin = %plugin, op = job.op, "interpreter call failed: {e}");
        }
        let _ = job.reply.send(result);
    }
    tracing::debug!(plugin = %plugin, "interpreter thread stopped");
}

struct Interpreter {
    context: Context,
    runtime: Runtime,
    max_jobs: usize,
}

impl Interpreter {
    fn boot(config: &SandboxConfig, bridge: HostBridge) -> Result<Self, PluginError> {
        let runtime = Runtime::new()
            .map_err(|e| PluginError::Sandbox(format!("QuickJS runtime failed: {e}")))?;
        runtime.set_memory_limit(config.memory_limit);
        runtime.set_max_stack_size(config.max_stack_size);
        let context = Context::full(&runtime)
            .map_err(|e| PluginError::Sandbox(format!("QuickJS context failed: {e}")))?;

        context.with(|ctx| -> Result<(), PluginError> {
            let native = Function::new(ctx.clone(), move |request: String| -> String {
                bridge.handle(&request)
            })
            .map_err(|e| js_error(&ctx, e, "native bridge"))?;
            ctx.globals()
                .set("__native_call", native)
                .map_err(|e| js_error(&ctx, e, "native bridge"))?;

            ctx.eval::<(), _>(ShimRegistry::builtin().install_script())
                .map_err(|e| js_error(&ctx, e, "shim install"))?;
            ctx.eval::<(), _>(PRELUDE)
                .map_err(|e| js_error(&ctx, e, "prelude"))?;
            Ok(())
        })?;

        Ok(Self {
            context,
            runtime,
            max_jobs: config.max_jobs,
        })
    }

    /// Start `op`, drain the promise queue, then collect the settled outcome.
    fn run(&self, op: &str, payload: &str) -> Result<Value, PluginError> {
        let script = format!(
            "__tunebridge.call({}, {});",
            serde_json::to_string(op)?,
            serde_json::to_string(payload)?
        );
        self.context
            .with(|ctx| ctx.eval::<(), _>(script).map_err(|e| js_error(&ctx, e, op)))?;

        self.drain_jobs()?;

        let outcome: String = self.context.with(|ctx| {
            ctx.eval::<String, _>("__tunebridge.take()")
                .map_err(|e| js_error(&ctx, e, op))
        })?;
        if outcome.is_empty() {
            return Err(PluginError::Sandbox(format!(
                "plugin call '{op}' never settled"
            )));
        }
        parse_outcome(&outcome)
    }

    fn drain_jobs(&self) -> Result<(), PluginError> {
        let mut executed = 0usize;
        while self.runtime.is_job_pending() {
            if executed >= self.max_jobs {
                return Err(PluginError::Sandbox(format!(
                    "promise job budget of {} exhausted",
                    self.max_jobs
                )));
            }
            executed += 1;
            if self.runtime.execute_pending_job().is_err() {
                tracing::debug!("promise job raised an uncaught exception");
            }
        }
        Ok(())
    }
}

/// Turn a pending JavaScript exception into a [`PluginError`].
fn js_error(ctx: &Ctx<'_>, err: rquickjs::Error, stage: &str) -> PluginError {
    if !matches!(err, rquickjs::Error::Exception) {
        return PluginError::Sandbox(format!("{stage} failed: {err}"));
    }
    let caught = ctx.catch();
    let Some(exc) = caught.as_exception() else {
        return PluginError::Execution(format!("{stage} failed: {caught:?}"));
    };
    let msg = exc.message().unwrap_or_default();
    match exc.stack() {
        Some(stack) if !stack.trim().is_empty() => {
            let stack: String = stack.chars().take(MAX_STACK_CHARS).collect();
            PluginError::Execution(format!("{stage} failed: {msg} | {stack}"))
        }
        _ => PluginError::Execution(format!("{stage} failed: {msg}")),
    }
}

#[derive(Debug, Deserialize)]
struct Outcome {
    #[serde(default)]
    ok: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    stack: Option<String>,
}

fn parse_outcome(raw: &str) -> Result<Value, PluginError> {
    let outcome: Outcome = serde_json::from_str(raw)?;
    match outcome.error {
        None => Ok(outcome.ok),
        Some(message) => {
            if let Some(ref stack) = outcome.stack {
                let stack: String = stack.chars().take(MAX_STACK_CHARS).collect();
                tracing::debug!(kind = ?outcome.kind, "plugin error stack: {stack}");
            }
            Err(error_from_kind(outcome.kind.as_deref(), message))
        }
    }
}

/// Map a `kind` tag back onto the host error it came from.
fn error_from_kind(kind: Option<&str>, message: String) -> PluginError {
    match kind {
        Some("referer_required") => PluginError::RefererRequired(message),
        Some("html_instead_of_json") => PluginError::HtmlInsteadOfJson(message),
        Some("cancelled") => PluginError::Cancelled,
        Some("unsupported") => PluginError::Unsupported(message),
        Some("invalid_state") => PluginError::InvalidState(message),
        Some("sandbox") => PluginError::Sandbox(message),
        Some("http") | Some("network_exhausted") => PluginError::Http(message),
        _ => PluginError::Execution(message),
    }
}
