//! Axios-compatible request layer.
//!
//! The `axios` shim in the sandbox merges defaults and runs interceptors in
//! JavaScript, then hands one flattened [`RequestConfig`] to
//! [`AxiosShim::request`]. Everything upstream-specific happens here: JSONP
//! unwrapping, HTML and referer detection, POST folding for the qq.com
//! gateway and the lyric side channel.

pub mod jsonp;
pub mod referer;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::PluginError;
use crate::lyric_cache::LyricCache;
use crate::net::transport::looks_like_html;
use crate::net::{HttpRequest, HttpResponse, ProxiedFetch};
use crate::shims::qs;

/// Query parameters that identify the song a response is about.
const SONG_ID_PARAMS: [&str; 3] = ["songmid", "musicid", "id"];

/// Request options as plugins pass them to axios.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default, rename = "baseURL")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub response_type: Option<String>,
    /// Milliseconds; `0` or absent means the network default.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl RequestConfig {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    fn method(&self) -> String {
        self.method
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_ascii_uppercase()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| header_text(v))
    }

    fn wants_text(&self) -> bool {
        self.response_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("text"))
    }

    /// JSON is expected unless the request opts out: a non-JSON
    /// `responseType`, an `Accept` header naming `text/html`, or a target
    /// that is itself an `.html` page. An unset `responseType` is axios'
    /// default `json`.
    fn expects_json(&self) -> bool {
        if self
            .response_type
            .as_deref()
            .is_some_and(|t| !t.is_empty() && !t.eq_ignore_ascii_case("json"))
        {
            return false;
        }
        let wants_html = self
            .header("accept")
            .is_some_and(|a| a.to_ascii_lowercase().contains("text/html"));
        let html_page = Url::parse(&self.full_url()).is_ok_and(|u| {
            let path = u.path().to_ascii_lowercase();
            path.ends_with(".html") || path.ends_with(".htm")
        });
        !wants_html && !html_page
    }

    /// `baseURL` joined with `url`, plus serialized `params`.
    pub fn full_url(&self) -> String {
        let mut url = match self.base_url.as_deref() {
            Some(base) if !base.is_empty() && !is_absolute(&self.url) => {
                if self.url.is_empty() {
                    base.to_string()
                } else {
                    format!(
                        "{}/{}",
                        base.trim_end_matches('/'),
                        self.url.trim_start_matches('/')
                    )
                }
            }
            _ => self.url.clone(),
        };
        if let Some(ref params) = self.params {
            let query = qs::stringify(params, true);
            if !query.is_empty() {
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(&query);
            }
        }
        url
    }
}

/// The value a plugin's axios promise resolves with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxiosResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Map<String, Value>,
    pub data: Value,
}

fn is_absolute(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn header_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn status_text(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Clone)]
pub struct AxiosShim {
    fetch: Arc<ProxiedFetch>,
    lyrics: LyricCache,
}

impl AxiosShim {
    pub fn new(fetch: Arc<ProxiedFetch>, lyrics: LyricCache) -> Self {
        Self { fetch, lyrics }
    }

    pub fn fetcher(&self) -> &Arc<ProxiedFetch> {
        &self.fetch
    }

    pub fn lyrics(&self) -> &LyricCache {
        &self.lyrics
    }

    /// Turn an axios config into the outbound request.
    pub fn build_request(&self, config: &RequestConfig) -> Result<HttpRequest, PluginError> {
        let raw_url = config.full_url();
        let target = Url::parse(&raw_url)?;
        let mut method = config.method();

        let mut headers: Vec<(String, String)> = config
            .headers
            .iter()
            .filter_map(|(k, v)| header_text(v).map(|v| (k.clone(), v)))
            .collect();
        let has_header = |headers: &[(String, String)], name: &str| {
            headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
        };

        let data = config.data.as_ref().filter(|d| !d.is_null());
        let mut url = raw_url.clone();
        let mut body = None;

        match data {
            Some(data) if referer::is_foldable_post(&target, &method) => {
                url = referer::fold_post_to_get(&target, data);
                method = "GET".to_string();
                headers.retain(|(k, _)| !k.eq_ignore_ascii_case("content-type"));
                tracing::debug!(target_url = %raw_url, "folded POST into GET");
            }
            Some(Value::String(text)) => body = Some(text.clone()),
            Some(data) => {
                let form = config
                    .header("content-type")
                    .is_some_and(|ct| ct.contains("application/x-www-form-urlencoded"));
                if form {
                    body = Some(qs::stringify(data, true));
                } else {
                    body = Some(data.to_string());
                    if !has_header(&headers, "content-type") {
                        headers.push(("Content-Type".into(), "application/json".into()));
                    }
                }
            }
            None => {}
        }

        if !has_header(&headers, "referer") {
            if let Some(referer) = referer::default_referer(&target) {
                headers.push(("Referer".into(), referer.to_string()));
            }
        }

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }

    /// Perform one axios request.
    pub async fn request(
        &self,
        config: &RequestConfig,
        cancel: &CancellationToken,
    ) -> Result<AxiosResponse, PluginError> {
        let request = self.build_request(config)?;
        let timeout = config
            .timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let resp = self
            .fetch
            .fetch_with(request.clone(), timeout, cancel)
            .await?;
        let (resp, data) = self.interpret(config, &request, resp)?;

        let data = if referer::is_invalid_referer(&data) {
            tracing::debug!(target_url = %request.url, "upstream rejected referer, retrying via relay");
            let retried = self
                .fetch
                .fetch_via_referer_relay(request.clone(), timeout, cancel)
                .await;
            match retried {
                Err(PluginError::Cancelled) => return Err(PluginError::Cancelled),
                Err(_) => return Err(PluginError::RefererRequired(request.url)),
                Ok(second) => {
                    let (_, data) = self.interpret(config, &request, second)?;
                    if referer::is_invalid_referer(&data) {
                        return Err(PluginError::RefererRequired(request.url));
                    }
                    data
                }
            }
        } else {
            data
        };

        let fallback_id = song_id_param(&request.url);
        // raw-JSONP and text responses still carry lyrics worth recording
        let found = match &data {
            Value::String(text) => self.lyrics.observe(&jsonp::parse_body(text), fallback_id.as_deref()),
            other => self.lyrics.observe(other, fallback_id.as_deref()),
        };
        if found > 0 {
            tracing::debug!(target_url = %request.url, found, "recorded lyrics from response");
        }

        let headers = resp
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Ok(AxiosResponse {
            status: resp.status,
            status_text: status_text(resp.status),
            headers,
            data,
        })
    }

    fn interpret(
        &self,
        config: &RequestConfig,
        request: &HttpRequest,
        resp: HttpResponse,
    ) -> Result<(HttpResponse, Value), PluginError> {
        if config.wants_text() || jsonp::is_raw_jsonp_endpoint(&request.url) {
            let data = Value::String(resp.body.clone());
            return Ok((resp, data));
        }
        let data = jsonp::parse_body(&resp.body);
        if data.is_string() && config.expects_json() && (resp.is_html() || looks_like_html(&resp.body)) {
            return Err(PluginError::HtmlInsteadOfJson(request.url.clone()));
        }
        Ok((resp, data))
    }
}

fn song_id_param(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    SONG_ID_PARAMS.iter().find_map(|name| {
        parsed
            .query_pairs()
            .find(|(k, v)| k == name && !v.is_empty())
            .map(|(_, v)| v.into_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::ScriptedTransport;
    use crate::net::NetworkConfig;
    use serde_json::json;

    fn shim(transport: ScriptedTransport) -> (AxiosShim, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let config = NetworkConfig {
            https_relays: Vec::new(),
            http_relays: Vec::new(),
            ..NetworkConfig::default()
        };
        let fetch = Arc::new(ProxiedFetch::new(transport.clone(), config));
        (AxiosShim::new(fetch, LyricCache::new()), transport)
    }

    // ── URL building ────────────────────────────────────────────────

    #[test]
    fn test_full_url_with_base_and_params() {
        let config = RequestConfig {
            url: "/search".into(),
            base_url: Some("https://api.example.org/v1/".into()),
            params: Some(json!({"q": "a b", "page": 2, "skip": null})),
            ..RequestConfig::default()
        };
        assert_eq!(config.full_url(), "https://api.example.org/v1/search?q=a%20b&page=2");
    }

    #[test]
    fn test_absolute_url_ignores_base() {
        let config = RequestConfig {
            url: "https://other.example/x?a=1".into(),
            base_url: Some("https://api.example.org".into()),
            params: Some(json!({"b": 2})),
            ..RequestConfig::default()
        };
        assert_eq!(config.full_url(), "https://other.example/x?a=1&b=2");
    }

    #[test]
    fn test_deserialize_axios_config() {
        let config: RequestConfig = serde_json::from_value(json!({
            "url": "/a",
            "baseURL": "https://x.example",
            "responseType": "text",
            "timeout": 500,
            "headers": {"X-Num": 1}
        }))
        .unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://x.example"));
        assert!(config.wants_text());
        assert_eq!(config.header("x-num").as_deref(), Some("1"));
    }

    // ── Request building ────────────────────────────────────────────

    #[test]
    fn test_json_body_gets_content_type() {
        let (shim, _) = shim(ScriptedTransport::default());
        let req = shim
            .build_request(&RequestConfig {
                url: "https://api.example.org/x".into(),
                method: Some("post".into()),
                data: Some(json!({"a": 1})),
                ..RequestConfig::default()
            })
            .unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.body.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_form_body_uses_qs() {
        let (shim, _) = shim(ScriptedTransport::default());
        let mut headers = Map::new();
        headers.insert(
            "Content-Type".into(),
            json!("application/x-www-form-urlencoded"),
        );
        let req = shim
            .build_request(&RequestConfig {
                url: "https://api.example.org/x".into(),
                method: Some("POST".into()),
                headers,
                data: Some(json!({"a": "1 2", "b": {"c": 3}})),
                ..RequestConfig::default()
            })
            .unwrap();
        assert_eq!(req.body.as_deref(), Some("a=1%202&b%5Bc%5D=3"));
    }

    #[test]
    fn test_musicu_post_folded_with_referer() {
        let (shim, _) = shim(ScriptedTransport::default());
        let req = shim
            .build_request(&RequestConfig {
                url: "https://u.y.qq.com/cgi-bin/musicu.fcg".into(),
                method: Some("POST".into()),
                data: Some(json!({"req": 1})),
                ..RequestConfig::default()
            })
            .unwrap();
        assert_eq!(req.method, "GET");
        assert!(req.body.is_none());
        assert!(req.url.starts_with("https://u.y.qq.com/cgi-bin/musicu.fcg?data="));
        assert_eq!(req.header("referer"), Some("https://y.qq.com/"));
    }

    #[test]
    fn test_explicit_referer_kept() {
        let (shim, _) = shim(ScriptedTransport::default());
        let mut headers = Map::new();
        headers.insert("referer".into(), json!("https://i.y.qq.com/"));
        let req = shim
            .build_request(&RequestConfig {
                url: "https://c.y.qq.com/x".into(),
                headers,
                ..RequestConfig::default()
            })
            .unwrap();
        assert_eq!(req.header("Referer"), Some("https://i.y.qq.com/"));
        assert_eq!(req.headers.len(), 1);
    }

    // ── Response handling ───────────────────────────────────────────

    #[tokio::test]
    async fn test_jsonp_unwrapped() {
        let (shim, _) = shim(ScriptedTransport::default().route(
            "https://api.example.org/",
            200,
            "text/javascript",
            r#"foo({"code":200,"data":{"songs":[]}})"#,
        ));
        let resp = shim
            .request(&RequestConfig::get("https://api.example.org/s"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.status_text, "OK");
        assert_eq!(resp.data, json!({"code": 200, "data": {"songs": []}}));
    }

    #[tokio::test]
    async fn test_raw_jsonp_endpoint_keeps_text() {
        let body = r#"MusicJsonCallback({"retcode":0,"lyric":"abc"})"#;
        let (shim, _) = shim(ScriptedTransport::default().route(
            "https://c.y.qq.com/",
            200,
            "text/javascript",
            body,
        ));
        let resp = shim
            .request(
                &RequestConfig::get(
                    "https://c.y.qq.com/lyric/fcgi-bin/fcg_query_lyric_new.fcg?songmid=001",
                ),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(resp.data, json!(body));
    }

    #[tokio::test]
    async fn test_html_where_json_expected() {
        let (shim, _) = shim(ScriptedTransport::default().route(
            "https://api.example.org/",
            200,
            "text/html",
            "<!DOCTYPE html><html><body>captcha</body></html>",
        ));
        let config = RequestConfig {
            response_type: Some("json".into()),
            ..RequestConfig::get("https://api.example.org/s")
        };
        let err = shim
            .request(&config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::HtmlInsteadOfJson(_)));
    }

    #[tokio::test]
    async fn test_default_response_type_rejects_html() {
        let (shim, _) = shim(ScriptedTransport::default().route(
            "https://api.example.org/",
            200,
            "text/html",
            "<!DOCTYPE html><html><body>blocked</body></html>",
        ));
        let err = shim
            .request(&RequestConfig::get("https://api.example.org/search?q=a"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::HtmlInsteadOfJson(_)));
    }

    #[tokio::test]
    async fn test_html_allowed_when_not_expecting_json() {
        let (shim, _) = shim(ScriptedTransport::default().route(
            "https://www.example.org/",
            200,
            "text/html",
            "<html><body><p>x</p></body></html>",
        ));
        let mut headers = Map::new();
        headers.insert("Accept".into(), json!("text/html,application/xhtml+xml"));
        let page = RequestConfig {
            headers,
            ..RequestConfig::get("https://www.example.org/page")
        };
        let resp = shim.request(&page, &CancellationToken::new()).await.unwrap();
        assert!(resp.data.is_string());

        let resp = shim
            .request(&RequestConfig::get("https://www.example.org/album/1.html"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(resp.data.is_string());
    }

    #[tokio::test]
    async fn test_plain_text_body_passes_through_by_default() {
        let (shim, _) = shim(ScriptedTransport::default().route(
            "https://api.example.org/",
            200,
            "text/plain",
            "not json at all",
        ));
        let resp = shim
            .request(&RequestConfig::get("https://api.example.org/raw"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.data, json!("not json at all"));
    }

    #[test]
    fn test_expects_json_rules() {
        assert!(RequestConfig::get("https://x.example/api").expects_json());

        let mut headers = Map::new();
        headers.insert("Accept".into(), json!("application/json, text/plain, */*"));
        let axios_default = RequestConfig {
            headers,
            response_type: Some("json".into()),
            ..RequestConfig::get("https://x.example/api")
        };
        assert!(axios_default.expects_json());

        let text = RequestConfig {
            response_type: Some("arraybuffer".into()),
            ..RequestConfig::get("https://x.example/api")
        };
        assert!(!text.expects_json());

        let mut headers = Map::new();
        headers.insert("accept".into(), json!("text/html"));
        let browser = RequestConfig {
            headers,
            ..RequestConfig::get("https://x.example/api")
        };
        assert!(!browser.expects_json());
        assert!(!RequestConfig::get("https://x.example/index.HTM").expects_json());
    }

    #[tokio::test]
    async fn test_raw_jsonp_lyric_endpoint_feeds_lyric_cache() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode("[00:01.00]hello");
        let body = format!(r#"MusicJsonCallback({{"retcode":0,"lyric":"{encoded}"}})"#);
        let (shim, _) = shim(ScriptedTransport::default().route(
            "https://c.y.qq.com/",
            200,
            "text/javascript",
            &body,
        ));
        let resp = shim
            .request(
                &RequestConfig::get(
                    "https://c.y.qq.com/lyric/fcgi-bin/fcg_query_lyric_new.fcg?songmid=003abc&format=json",
                ),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(resp.data, json!(body));
        assert_eq!(shim.lyrics().get("003abc").as_deref(), Some("[00:01.00]hello"));
    }

    #[tokio::test]
    async fn test_invalid_referer_becomes_referer_required() {
        let rejected = r#"{"code":0,"subcode":1,"msg":"request invalid referer"}"#;
        let (shim, transport) = shim(
            ScriptedTransport::default()
                .route("https://c.y.qq.com/", 200, "application/json", rejected)
                .route("https://cors.eu.org/", 200, "application/json", rejected),
        );
        let err = shim
            .request(&RequestConfig::get("https://c.y.qq.com/v8/fcg"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::RefererRequired(_)));
        assert_eq!(err.kind(), "referer_required");
        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], "https://cors.eu.org/https://c.y.qq.com/v8/fcg");
    }

    #[tokio::test]
    async fn test_referer_relay_recovers() {
        let (shim, _) = shim(
            ScriptedTransport::default()
                .route(
                    "https://c.y.qq.com/",
                    200,
                    "application/json",
                    r#"{"code":0,"subcode":1,"msg":"invalid referer"}"#,
                )
                .route("https://cors.eu.org/", 200, "application/json", r#"{"code":0,"data":[]}"#),
        );
        let resp = shim
            .request(&RequestConfig::get("https://c.y.qq.com/v8/fcg"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.data, json!({"code": 0, "data": []}));
    }

    #[tokio::test]
    async fn test_lyric_observed_with_query_fallback() {
        let (shim, _) = shim(ScriptedTransport::default().route(
            "https://api.example.org/",
            200,
            "application/json",
            r#"{"code":0,"lyric":"[00:01.00]hello"}"#,
        ));
        shim.request(
            &RequestConfig::get("https://api.example.org/lyric?songmid=abc123"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(shim.lyrics().get("abc123").as_deref(), Some("[00:01.00]hello"));
    }

    #[tokio::test]
    async fn test_exhausted_chain_propagates() {
        let (shim, _) = shim(ScriptedTransport::default());
        let err = shim
            .request(&RequestConfig::get("https://api.example.org/s"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_network_failure());
    }
}
