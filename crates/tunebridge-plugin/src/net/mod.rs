//! Network resolution layer.
//!
//! Every outbound request a plugin makes goes through [`ProxiedFetch`]:
//! internal-proxy rewrite first, then public relays and the direct route,
//! all under one deadline and one cancellation token.

mod fetch;
pub mod guard;
pub mod relay;
pub mod rewrite;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;

use std::time::Duration;

pub use fetch::ProxiedFetch;
pub use relay::{Candidate, RelayTemplate};
pub use rewrite::{RewriteRule, RewriteTable};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

// ─── Configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base URL of the internal proxy; rewriting is skipped when unset.
    pub internal_proxy: Option<String>,
    /// Shared deadline for one request chain (default: 15 s).
    pub timeout: Duration,
    /// Response body cap (default: 10 MB).
    pub max_response_bytes: usize,
    pub https_relays: Vec<RelayTemplate>,
    pub http_relays: Vec<RelayTemplate>,
    pub referer_relay: RelayTemplate,
    /// Permit loopback/private targets (default: false).
    pub allow_private_hosts: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            internal_proxy: None,
            timeout: Duration::from_secs(15),
            max_response_bytes: 10 * 1024 * 1024,
            https_relays: relay::DEFAULT_HTTPS_RELAYS
                .iter()
                .map(|s| RelayTemplate::new(*s))
                .collect(),
            http_relays: relay::DEFAULT_HTTP_RELAYS
                .iter()
                .map(|s| RelayTemplate::new(*s))
                .collect(),
            referer_relay: RelayTemplate::new(relay::DEFAULT_REFERER_RELAY),
            allow_private_hosts: false,
        }
    }
}

impl NetworkConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            internal_proxy: std::env::var("TUNEBRIDGE_INTERNAL_PROXY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            timeout: Duration::from_secs(
                std::env::var("TUNEBRIDGE_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(15),
            ),
            max_response_bytes: std::env::var("TUNEBRIDGE_MAX_RESPONSE_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(10)
                * 1024
                * 1024,
            https_relays: std::env::var("TUNEBRIDGE_HTTPS_RELAYS")
                .ok()
                .map(|v| relay::parse_relay_list(&v))
                .unwrap_or(defaults.https_relays),
            http_relays: std::env::var("TUNEBRIDGE_HTTP_RELAYS")
                .ok()
                .map(|v| relay::parse_relay_list(&v))
                .unwrap_or(defaults.http_relays),
            referer_relay: std::env::var("TUNEBRIDGE_REFERER_RELAY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| RelayTemplate::new(v.trim()))
                .unwrap_or(defaults.referer_relay),
            allow_private_hosts: std::env::var("TUNEBRIDGE_ALLOW_PRIVATE_HOSTS")
                .unwrap_or_default()
                .eq_ignore_ascii_case("true"),
        }
    }

    /// No relays, no proxy: only the direct route. Useful against local servers.
    pub fn direct_only() -> Self {
        Self {
            https_relays: Vec::new(),
            http_relays: Vec::new(),
            allow_private_hosts: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_config_default() {
        let config = NetworkConfig::default();
        assert!(config.internal_proxy.is_none());
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.max_response_bytes, 10 * 1024 * 1024);
        assert_eq!(config.https_relays.len(), 3);
        assert_eq!(config.http_relays.len(), 2);
        assert!(!config.allow_private_hosts);
    }

    #[test]
    fn test_network_config_from_env() {
        std::env::set_var("TUNEBRIDGE_INTERNAL_PROXY", "https://proxy.internal");
        std::env::set_var("TUNEBRIDGE_HTTP_TIMEOUT_SECS", "3");
        std::env::set_var("TUNEBRIDGE_MAX_RESPONSE_MB", "2");
        std::env::set_var("TUNEBRIDGE_HTTPS_RELAYS", "https://r1/{url}");
        std::env::set_var("TUNEBRIDGE_ALLOW_PRIVATE_HOSTS", "TRUE");

        let config = NetworkConfig::from_env();
        assert_eq!(config.internal_proxy.as_deref(), Some("https://proxy.internal"));
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.max_response_bytes, 2 * 1024 * 1024);
        assert_eq!(config.https_relays, vec![RelayTemplate::new("https://r1/{url}")]);
        assert_eq!(config.http_relays.len(), 2);
        assert!(config.allow_private_hosts);

        // Clean up
        std::env::remove_var("TUNEBRIDGE_INTERNAL_PROXY");
        std::env::remove_var("TUNEBRIDGE_HTTP_TIMEOUT_SECS");
        std::env::remove_var("TUNEBRIDGE_MAX_RESPONSE_MB");
        std::env::remove_var("TUNEBRIDGE_HTTPS_RELAYS");
        std::env::remove_var("TUNEBRIDGE_ALLOW_PRIVATE_HOSTS");

        let config_default = NetworkConfig::from_env();
        assert!(!config_default.allow_private_hosts);
    }
}
