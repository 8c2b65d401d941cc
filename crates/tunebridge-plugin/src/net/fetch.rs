use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::guard;
use super::relay::{self, Candidate, RelayTemplate};
use super::rewrite::RewriteTable;
use super::transport::{HttpRequest, HttpResponse, Transport};
use super::NetworkConfig;
use crate::error::{Attempt, AttemptLog, PluginError};

enum AttemptFailure {
    Rejected(String),
    DeadlineExpired,
    Cancelled,
}

/// Drop-in fetch with URL rewriting and proxy-chain fallback.
///
/// Candidates run strictly in order: the internal proxy (when the target
/// matches the rewrite table and a proxy base is configured), then the
/// direct route and public relays ordered by scheme. The first acceptable
/// response wins.
pub struct ProxiedFetch {
    transport: Arc<dyn Transport>,
    config: NetworkConfig,
    rewrites: RewriteTable,
}

impl std::fmt::Debug for ProxiedFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxiedFetch")
            .field("config", &self.config)
            .field("rewrites", &self.rewrites.rules().len())
            .finish_non_exhaustive()
    }
}

impl ProxiedFetch {
    pub fn new(transport: Arc<dyn Transport>, config: NetworkConfig) -> Self {
        Self {
            transport,
            config,
            rewrites: RewriteTable::default(),
        }
    }

    pub fn with_rewrites(mut self, rewrites: RewriteTable) -> Self {
        self.rewrites = rewrites;
        self
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Fetch with the configured deadline and no external cancellation.
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, PluginError> {
        self.fetch_with(request, None, &CancellationToken::new())
            .await
    }

    /// Run the full candidate chain for `request`.
    ///
    /// `timeout` overrides the configured deadline for this chain.
    pub async fn fetch_with(
        &self,
        request: HttpRequest,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, PluginError> {
        let target = self.check_target(&request.url)?;

        let mut candidates = Vec::new();
        if let Some(ref base) = self.config.internal_proxy {
            if let Some(proxied) = self.rewrites.rewrite(&target, base) {
                candidates.push(Candidate::InternalProxy(proxied));
            }
        }
        candidates.extend(relay::fallback_candidates(
            &request.url,
            &self.config.https_relays,
            &self.config.http_relays,
        ));

        self.run_chain(request, candidates, timeout, cancel).await
    }

    /// One attempt through the header-forwarding relay.
    pub async fn fetch_via_referer_relay(
        &self,
        request: HttpRequest,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, PluginError> {
        self.check_target(&request.url)?;
        let candidates = vec![Candidate::Relay(
            self.config.referer_relay.render(&request.url),
        )];
        self.run_chain(request, candidates, timeout, cancel).await
    }

    /// Template used for referer-forwarding retries.
    pub fn referer_relay(&self) -> &RelayTemplate {
        &self.config.referer_relay
    }

    fn check_target(&self, raw: &str) -> Result<Url, PluginError> {
        let target = Url::parse(raw)?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(PluginError::Http(format!(
                "unsupported URL scheme '{}' in '{raw}'",
                target.scheme()
            )));
        }
        if !self.config.allow_private_hosts {
            guard::check_public_target(&target)?;
        }
        Ok(target)
    }

    async fn run_chain(
        &self,
        request: HttpRequest,
        candidates: Vec<Candidate>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, PluginError> {
        let deadline = Instant::now() + timeout.unwrap_or(self.config.timeout);
        let mut attempts = AttemptLog::default();

        for candidate in candidates {
            match self.attempt(&request, &candidate, deadline, cancel).await {
                Ok(mut resp) => {
                    tracing::debug!(
                        target_url = %request.url,
                        candidate = %candidate,
                        status = resp.status,
                        "request candidate succeeded"
                    );
                    if !matches!(candidate, Candidate::Direct(_)) {
                        resp.url = request.url.clone();
                    }
                    return Ok(resp);
                }
                Err(AttemptFailure::Rejected(outcome)) => {
                    tracing::debug!(
                        target_url = %request.url,
                        candidate = %candidate,
                        "request candidate failed: {outcome}"
                    );
                    attempts.push(Attempt::new(candidate.to_string(), outcome));
                }
                Err(AttemptFailure::DeadlineExpired) => {
                    attempts.push(Attempt::new(candidate.to_string(), "deadline exceeded"));
                    break;
                }
                Err(AttemptFailure::Cancelled) => {
                    tracing::debug!(target_url = %request.url, "request chain cancelled");
                    return Err(PluginError::Cancelled);
                }
            }
        }

        tracing::warn!(
            target_url = %request.url,
            attempts = attempts.len(),
            "all request candidates failed"
        );
        Err(PluginError::NetworkExhausted {
            target: request.url,
            attempts,
        })
    }

    async fn attempt(
        &self,
        request: &HttpRequest,
        candidate: &Candidate,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, AttemptFailure> {
        if cancel.is_cancelled() {
            return Err(AttemptFailure::Cancelled);
        }
        if Instant::now() >= deadline {
            return Err(AttemptFailure::DeadlineExpired);
        }

        let send = self.transport.send(request.retarget(candidate.url()));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AttemptFailure::Cancelled),
            r = tokio::time::timeout_at(deadline, send) => r,
        };

        let resp = match result {
            Err(_elapsed) => return Err(AttemptFailure::DeadlineExpired),
            Ok(Err(e)) => return Err(AttemptFailure::Rejected(e.to_string())),
            Ok(Ok(resp)) => resp,
        };

        if !resp.is_success() {
            return Err(AttemptFailure::Rejected(format!("HTTP {}", resp.status)));
        }
        if matches!(candidate, Candidate::InternalProxy(_)) && resp.is_html() {
            return Err(AttemptFailure::Rejected(format!(
                "HTTP {} with HTML body",
                resp.status
            )));
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::ScriptedTransport;

    fn config() -> NetworkConfig {
        NetworkConfig {
            internal_proxy: Some("https://proxy.internal".into()),
            https_relays: vec![
                RelayTemplate::new("https://relay-a.example/?url={url_encoded}"),
                RelayTemplate::new("https://relay-b.example/{url}"),
            ],
            http_relays: vec![RelayTemplate::new("https://relay-a.example/?url={url_encoded}")],
            ..NetworkConfig::default()
        }
    }

    fn fetcher(transport: Arc<ScriptedTransport>) -> ProxiedFetch {
        ProxiedFetch::new(transport, config())
    }

    // ── Rewrite path ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_rewritten_request_wins_without_relays() {
        let transport = Arc::new(
            ScriptedTransport::default().route("https://proxy.internal/", 200, "application/json", "{}"),
        );
        let resp = fetcher(transport.clone())
            .fetch(HttpRequest::get("https://u.y.qq.com/cgi-bin/musicu.fcg?x=1"))
            .await
            .unwrap();
        assert_eq!(resp.body, "{}");
        assert_eq!(resp.url, "https://u.y.qq.com/cgi-bin/musicu.fcg?x=1");
        assert_eq!(
            transport.seen(),
            vec!["https://proxy.internal/proxy/qq-u/cgi-bin/musicu.fcg?x=1"]
        );
    }

    #[tokio::test]
    async fn test_html_from_proxy_falls_back_to_direct() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .route("https://proxy.internal/", 200, "text/html", "<html>blocked</html>")
                .route("https://u.y.qq.com/", 200, "application/json", "{\"code\":0}"),
        );
        let resp = fetcher(transport.clone())
            .fetch(HttpRequest::get("https://u.y.qq.com/cgi-bin/musicu.fcg"))
            .await
            .unwrap();
        assert_eq!(resp.body, "{\"code\":0}");
        assert_eq!(transport.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_url_skips_proxy() {
        let transport = Arc::new(
            ScriptedTransport::default().route("https://example.org/", 200, "text/plain", "ok"),
        );
        fetcher(transport.clone())
            .fetch(HttpRequest::get("https://example.org/a"))
            .await
            .unwrap();
        assert_eq!(transport.seen(), vec!["https://example.org/a"]);
    }

    // ── Relay ordering ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_https_tries_direct_then_relays_in_order() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .fail("https://example.org/", "tls handshake failed")
                .route("https://relay-a.example/", 502, "text/plain", "bad gateway")
                .route("https://relay-b.example/", 200, "application/json", "[]"),
        );
        let resp = fetcher(transport.clone())
            .fetch(HttpRequest::get("https://example.org/a"))
            .await
            .unwrap();
        assert_eq!(resp.body, "[]");
        assert_eq!(resp.url, "https://example.org/a");
        let seen = transport.seen();
        assert_eq!(seen[0], "https://example.org/a");
        assert!(seen[1].starts_with("https://relay-a.example/?url=https%3A%2F%2Fexample.org"));
        assert_eq!(seen[2], "https://relay-b.example/https://example.org/a");
    }

    #[tokio::test]
    async fn test_http_tries_relays_then_direct() {
        let transport = Arc::new(
            ScriptedTransport::default().route("http://example.org/", 200, "text/plain", "ok"),
        );
        fetcher(transport.clone())
            .fetch(HttpRequest::get("http://example.org/a"))
            .await
            .unwrap();
        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with("https://relay-a.example/"));
        assert_eq!(seen[1], "http://example.org/a");
    }

    #[tokio::test]
    async fn test_exhausted_lists_every_attempt() {
        let transport = Arc::new(
            ScriptedTransport::default().route("https://example.org/", 503, "text/plain", "down"),
        );
        let err = fetcher(transport)
            .fetch(HttpRequest::get("https://example.org/a"))
            .await
            .unwrap_err();
        match err {
            PluginError::NetworkExhausted { target, attempts } => {
                assert_eq!(target, "https://example.org/a");
                assert_eq!(attempts.len(), 3);
                let first = attempts.iter().next().unwrap();
                assert_eq!(first.target, "direct https://example.org/a");
                assert_eq!(first.outcome, "HTTP 503");
            }
            other => panic!("expected NetworkExhausted, got {other:?}"),
        }
    }

    // ── Deadline and cancellation ───────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_deadline_ends_chain() {
        let transport = Arc::new(ScriptedTransport::default().hang("https://example.org/"));
        let err = fetcher(transport.clone())
            .fetch_with(
                HttpRequest::get("https://example.org/slow"),
                Some(Duration::from_secs(2)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            PluginError::NetworkExhausted { attempts, .. } => {
                assert_eq!(attempts.len(), 1);
                assert_eq!(attempts.iter().next().unwrap().outcome, "deadline exceeded");
            }
            other => panic!("expected NetworkExhausted, got {other:?}"),
        }
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let transport = Arc::new(ScriptedTransport::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetcher(transport.clone())
            .fetch_with(HttpRequest::get("https://example.org/"), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Cancelled));
        assert!(transport.seen().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_chain() {
        let transport = Arc::new(ScriptedTransport::default().hang("https://example.org/"));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = fetcher(transport.clone())
            .fetch_with(HttpRequest::get("https://example.org/"), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Cancelled));
        assert_eq!(transport.seen().len(), 1);
    }

    // ── Target checks ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_private_target_blocked() {
        let transport = Arc::new(ScriptedTransport::default());
        let err = fetcher(transport.clone())
            .fetch(HttpRequest::get("http://127.0.0.1:8080/admin"))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::PermissionDenied(_)));
        assert!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn test_non_http_scheme_rejected() {
        let transport = Arc::new(ScriptedTransport::default());
        let err = fetcher(transport)
            .fetch(HttpRequest::get("file:///etc/passwd"))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Http(_)));
    }

    #[tokio::test]
    async fn test_referer_relay_single_attempt() {
        let transport = Arc::new(ScriptedTransport::default());
        let err = fetcher(transport.clone())
            .fetch_via_referer_relay(
                HttpRequest::get("https://c.y.qq.com/lyric"),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NetworkExhausted { .. }));
        assert_eq!(transport.seen(), vec!["https://cors.eu.org/https://c.y.qq.com/lyric"]);
    }
}
