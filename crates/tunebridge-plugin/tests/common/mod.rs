// Shared test utilities for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tunebridge_plugin::code_cache::CodeCache;
use tunebridge_plugin::loader::CodeLoader;
use tunebridge_plugin::net::{NetworkConfig, ProxiedFetch, RelayTemplate, ReqwestTransport};
use tunebridge_plugin::request::AxiosShim;
use tunebridge_plugin::sandbox::{ExecutionGate, HostServices, SandboxConfig};
use tunebridge_plugin::{
    InstalledPlugin, KeyValueStore, LyricCache, PluginDescriptor, PluginHost, UserVariables,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Direct-only network config that may reach the local mock server, with
/// the referer relay pointed at `base` as well.
pub fn local_network(base: &str) -> NetworkConfig {
    NetworkConfig {
        referer_relay: RelayTemplate::new(format!("{base}/relay?url={{url_encoded}}")),
        timeout: Duration::from_secs(5),
        ..NetworkConfig::direct_only()
    }
}

/// A host over a real reqwest transport and a private execution gate.
pub fn test_host(
    network: NetworkConfig,
    store: Arc<dyn KeyValueStore>,
    variables: UserVariables,
) -> PluginHost {
    let transport = ReqwestTransport::from_config(&network).expect("reqwest client");
    let fetch = Arc::new(ProxiedFetch::new(Arc::new(transport), network));
    let axios = AxiosShim::new(fetch.clone(), LyricCache::new());
    let loader = CodeLoader::new(fetch, CodeCache::new(store));
    PluginHost::new(loader, HostServices::new(axios, variables), SandboxConfig::default())
        .with_gate(Arc::new(ExecutionGate::new()))
}

/// Serve `code` at `route` on the mock server.
pub async fn serve_plugin(server: &MockServer, route: &str, code: &str) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/javascript")
                .set_body_string(code),
        )
        .mount(server)
        .await;
}

pub fn installed(name: &str, url: impl Into<String>) -> InstalledPlugin {
    InstalledPlugin::install(PluginDescriptor::new(name, url)).expect("valid descriptor")
}

/// Substitute the mock server address into plugin source.
pub fn plugin_source(template: &str, server: &MockServer) -> String {
    template.replace("{base}", &server.uri())
}
