//! Native side of the interpreter bridge.
//!
//! Plugin JavaScript never sees this type. The prelude captures the raw
//! `__native_call` function, hides it, and hands shims a `host.call(op, args)`
//! wrapper. Each call is one JSON request `{op, args}` answered with
//! `{ok}` or `{error, kind}`.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{HostContext, HostServices};
use crate::error::PluginError;
use crate::net::HttpRequest;
use crate::request::{status_text, AxiosShim, RequestConfig};
use crate::shims::crypto::{self, AesParams, CipherMode, Encoding, HashAlgorithm, Padding};
use crate::shims::{date, html, path, qs, text, ShimRegistry};
use crate::variables::UserVariables;

/// Maximum length of a single plugin log message.
const MAX_LOG_MESSAGE_LEN: usize = 2048;

/// Strip control characters (except newline and tab) and truncate.
pub(crate) fn sanitize_log_message(message: &str) -> String {
    let cleaned: String = message
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(MAX_LOG_MESSAGE_LEN)
        .collect();
    if message.chars().count() > MAX_LOG_MESSAGE_LEN {
        format!("{cleaned}… (truncated)")
    } else {
        cleaned
    }
}

// ─── Argument shapes ────────────────────────────────────────────────

#[derive(Deserialize)]
struct BridgeRequest {
    op: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
struct ConsoleArgs {
    level: String,
    message: String,
}

#[derive(Deserialize)]
struct NameArg {
    name: String,
}

#[derive(Deserialize)]
struct TextArg {
    text: String,
}

#[derive(Deserialize)]
struct FetchArgs {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: Vec<(String, String)>,
    #[serde(default)]
    body: Option<String>,
    /// Milliseconds.
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Deserialize)]
struct DigestArgs {
    alg: String,
    data: String,
}

#[derive(Deserialize)]
struct HmacArgs {
    alg: String,
    key: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KdfArgs {
    password: String,
    #[serde(default)]
    salt: Option<String>,
    key_size: usize,
    iv_size: usize,
}

#[derive(Deserialize)]
struct AesArgs {
    op: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    padding: Option<String>,
    key: String,
    #[serde(default)]
    iv: Option<String>,
    data: String,
}

#[derive(Deserialize)]
struct EncodeArgs {
    enc: String,
    text: String,
}

#[derive(Deserialize)]
struct DecodeArgs {
    enc: String,
    hex: String,
}

#[derive(Deserialize)]
struct DocumentArgs {
    html: String,
}

#[derive(Deserialize)]
struct SelectArgs {
    html: String,
    selector: String,
}

#[derive(Deserialize)]
struct FragmentQueryArgs {
    fragments: Vec<String>,
    #[serde(default)]
    selector: Option<String>,
}

#[derive(Deserialize)]
struct FragmentArg {
    fragment: String,
}

#[derive(Deserialize)]
struct FormatArgs {
    millis: f64,
    #[serde(default)]
    pattern: Option<String>,
}

#[derive(Deserialize)]
struct AddArgs {
    millis: f64,
    amount: f64,
    unit: String,
}

#[derive(Deserialize)]
struct PartsArg {
    parts: Vec<String>,
}

#[derive(Deserialize)]
struct PathArg {
    path: String,
}

#[derive(Deserialize)]
struct BasenameArgs {
    path: String,
    #[serde(default)]
    ext: Option<String>,
}

#[derive(Deserialize)]
struct UrlParseArgs {
    input: String,
    #[serde(default)]
    base: Option<String>,
}

#[derive(Deserialize)]
struct UrlResolveArgs {
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct StringifyArgs {
    value: Value,
    #[serde(default = "default_true")]
    encode: bool,
}

fn default_true() -> bool {
    true
}

fn args<T: DeserializeOwned>(op: &str, value: Value) -> Result<T, PluginError> {
    serde_json::from_value(value)
        .map_err(|e| PluginError::Execution(format!("invalid arguments for {op}: {e}")))
}

fn millis(value: f64) -> Result<i64, PluginError> {
    if value.is_finite() {
        Ok(value.trunc() as i64)
    } else {
        Err(PluginError::Execution("Invalid Date".into()))
    }
}

// ─── Bridge ─────────────────────────────────────────────────────────

/// Host operations for one plugin interpreter.
///
/// Async operations block the interpreter thread on the tokio runtime
/// handle; the interpreter never runs on a runtime worker.
pub struct HostBridge {
    plugin_id: String,
    plugin_name: String,
    axios: AxiosShim,
    variables: UserVariables,
    shims: &'static ShimRegistry,
    handle: Handle,
    cancel: CancellationToken,
}

impl std::fmt::Debug for HostBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBridge")
            .field("plugin_id", &self.plugin_id)
            .field("plugin_name", &self.plugin_name)
            .finish_non_exhaustive()
    }
}

impl HostBridge {
    pub fn new(
        context: &HostContext,
        services: &HostServices,
        handle: Handle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            plugin_id: context.plugin_id.clone(),
            plugin_name: context.plugin_name.clone(),
            axios: services.axios.clone(),
            variables: services.variables.clone(),
            shims: ShimRegistry::builtin(),
            handle,
            cancel,
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Entry point bound to `__native_call`.
    pub fn handle(&self, raw: &str) -> String {
        let result = match serde_json::from_str::<BridgeRequest>(raw) {
            Ok(request) => self.dispatch(&request.op, request.args),
            Err(e) => Err(PluginError::Sandbox(format!("malformed bridge request: {e}"))),
        };
        let reply = match result {
            Ok(value) => json!({ "ok": value }),
            Err(e) => {
                tracing::debug!(
                    plugin = %self.plugin_name,
                    kind = e.kind(),
                    "host operation failed: {e}"
                );
                json!({ "error": e.to_string(), "kind": e.kind() })
            }
        };
        reply.to_string()
    }

    /// Run one host operation.
    pub fn dispatch(&self, op: &str, payload: Value) -> Result<Value, PluginError> {
        match op {
            "console" => {
                let a: ConsoleArgs = args(op, payload)?;
                self.console(&a.level, &a.message);
                Ok(Value::Null)
            }
            "require" => {
                let a: NameArg = args(op, payload)?;
                Ok(self.require(&a.name))
            }
            "env.vars" => Ok(serde_json::to_value(self.variables.for_plugin(&self.plugin_id))?),
            "fetch" => self.fetch(args(op, payload)?),
            "axios" => {
                let config: RequestConfig = args(op, payload)?;
                let response = self.block_on(self.axios.request(&config, &self.cancel))?;
                Ok(serde_json::to_value(response)?)
            }

            "crypto.digest" => {
                let a: DigestArgs = args(op, payload)?;
                Ok(crypto::digest(HashAlgorithm::parse(&a.alg)?, &a.data)?.into())
            }
            "crypto.hmac" => {
                let a: HmacArgs = args(op, payload)?;
                Ok(crypto::hmac(HashAlgorithm::parse(&a.alg)?, &a.key, &a.data)?.into())
            }
            "crypto.aes" => self.aes(args(op, payload)?),
            "crypto.evpkdf" => {
                let a: KdfArgs = args(op, payload)?;
                let (key, iv) =
                    crypto::evp_bytes_to_key(&a.password, a.salt.as_deref(), a.key_size, a.iv_size)?;
                Ok(json!({ "key": key, "iv": iv }))
            }
            "crypto.encode" => {
                let a: EncodeArgs = args(op, payload)?;
                Ok(crypto::encode_to_hex(Encoding::parse(&a.enc)?, &a.text)?.into())
            }
            "crypto.decode" => {
                let a: DecodeArgs = args(op, payload)?;
                Ok(crypto::decode_from_hex(Encoding::parse(&a.enc)?, &a.hex)?.into())
            }
            "atob" => Ok(crypto::atob(&args::<TextArg>(op, payload)?.text)?.into()),
            "btoa" => Ok(crypto::btoa(&args::<TextArg>(op, payload)?.text)?.into()),

            "html.select" => {
                let a: SelectArgs = args(op, payload)?;
                Ok(serde_json::to_value(html::select_document(&a.html, &a.selector)?)?)
            }
            "html.find" => {
                let a: FragmentQueryArgs = args(op, payload)?;
                let selector = a.selector.unwrap_or_else(|| "*".to_string());
                Ok(serde_json::to_value(html::find(&a.fragments, &selector)?)?)
            }
            "html.children" => {
                let a: FragmentQueryArgs = args(op, payload)?;
                Ok(serde_json::to_value(html::children(
                    &a.fragments,
                    a.selector.as_deref(),
                )?)?)
            }
            "html.text" => {
                let a: FragmentQueryArgs = args(op, payload)?;
                Ok(html::text(&a.fragments).into())
            }
            "html.inner" => {
                let a: FragmentArg = args(op, payload)?;
                Ok(html::inner_html(&a.fragment).map_or(Value::Null, Value::String))
            }
            "html.documentText" => {
                let a: DocumentArgs = args(op, payload)?;
                Ok(html::document_text(&a.html).into())
            }

            "he.decode" => Ok(text::decode(&args::<TextArg>(op, payload)?.text).into()),
            "he.encode" => Ok(text::encode(&args::<TextArg>(op, payload)?.text).into()),
            "he.escape" => Ok(text::escape(&args::<TextArg>(op, payload)?.text).into()),

            "date.now" => Ok(date::now_millis().into()),
            "date.parse" => {
                let a: TextArg = args(op, payload)?;
                let offset = date::local_offset(date::now_millis());
                Ok(date::parse(&a.text, offset).map_or(Value::Null, Value::from))
            }
            "date.format" => {
                let a: FormatArgs = args(op, payload)?;
                let ms = millis(a.millis)?;
                let pattern = a.pattern.unwrap_or_default();
                Ok(date::format(ms, &pattern, date::local_offset(ms))?.into())
            }
            "date.add" => {
                let a: AddArgs = args(op, payload)?;
                let ms = millis(a.millis)?;
                let amount = millis(a.amount)?;
                Ok(date::add(ms, amount, &a.unit, date::local_offset(ms))?.into())
            }

            "path.join" => Ok(path::join(&args::<PartsArg>(op, payload)?.parts).into()),
            "path.resolve" => Ok(path::resolve(&args::<PartsArg>(op, payload)?.parts).into()),
            "path.normalize" => Ok(path::normalize(&args::<PathArg>(op, payload)?.path).into()),
            "path.dirname" => Ok(path::dirname(&args::<PathArg>(op, payload)?.path).into()),
            "path.extname" => Ok(path::extname(&args::<PathArg>(op, payload)?.path).into()),
            "path.basename" => {
                let a: BasenameArgs = args(op, payload)?;
                Ok(path::basename(&a.path, a.ext.as_deref()).into())
            }

            "url.parse" => {
                let a: UrlParseArgs = args(op, payload)?;
                Ok(serde_json::to_value(path::parse_url(&a.input, a.base.as_deref())?)?)
            }
            "url.resolve" => {
                let a: UrlResolveArgs = args(op, payload)?;
                Ok(path::resolve_url(&a.from, &a.to)?.into())
            }

            "qs.stringify" => {
                let a: StringifyArgs = args(op, payload)?;
                Ok(qs::stringify(&a.value, a.encode).into())
            }
            "qs.parse" => Ok(qs::parse(&args::<TextArg>(op, payload)?.text)),

            other => Err(PluginError::Unsupported(format!("host operation '{other}'"))),
        }
    }

    fn block_on<T>(
        &self,
        fut: impl Future<Output = Result<T, PluginError>>,
    ) -> Result<T, PluginError> {
        if self.cancel.is_cancelled() {
            return Err(PluginError::Cancelled);
        }
        self.handle.block_on(fut)
    }

    fn console(&self, level: &str, message: &str) {
        let msg = sanitize_log_message(message);
        match level {
            "error" => tracing::error!(plugin = %self.plugin_name, "{msg}"),
            "warn" => tracing::warn!(plugin = %self.plugin_name, "{msg}"),
            "debug" => tracing::debug!(plugin = %self.plugin_name, "{msg}"),
            _ => tracing::info!(plugin = %self.plugin_name, "{msg}"),
        }
    }

    fn require(&self, name: &str) -> Value {
        match self.shims.resolve(name) {
            Some(entry) => json!({ "name": entry.name, "kind": entry.kind }),
            None => {
                tracing::debug!(
                    plugin = %self.plugin_name,
                    module = %name,
                    "module not provided by host, using empty object"
                );
                Value::Null
            }
        }
    }

    fn fetch(&self, a: FetchArgs) -> Result<Value, PluginError> {
        let request = HttpRequest {
            method: a
                .method
                .map(|m| m.to_ascii_uppercase())
                .unwrap_or_else(|| "GET".to_string()),
            url: a.url,
            headers: a.headers,
            body: a.body,
        };
        let timeout = a.timeout.filter(|ms| *ms > 0).map(Duration::from_millis);
        let response = self.block_on(
            self.axios
                .fetcher()
                .fetch_with(request, timeout, &self.cancel),
        )?;
        Ok(json!({
            "status": response.status,
            "statusText": status_text(response.status),
            "headers": response.headers,
            "body": response.body,
            "url": response.url,
        }))
    }

    fn aes(&self, a: AesArgs) -> Result<Value, PluginError> {
        let params = AesParams {
            mode: CipherMode::parse(a.mode.as_deref().unwrap_or(""))?,
            padding: Padding::parse(a.padding.as_deref().unwrap_or(""))?,
            key_hex: &a.key,
            iv_hex: a.iv.as_deref(),
        };
        let out = match a.op.as_str() {
            "encrypt" => crypto::aes_encrypt(&params, &a.data)?,
            "decrypt" => crypto::aes_decrypt(&params, &a.data)?,
            other => return Err(PluginError::Unsupported(format!("AES operation '{other}'"))),
        };
        Ok(out.into())
    }
}
