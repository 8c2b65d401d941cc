//! In-memory transport for fallback-chain tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::transport::{HttpRequest, HttpResponse, Transport};
use crate::error::PluginError;

type Route = (String, Result<(u16, String, String), String>);

/// Answers by URL prefix (first matching route wins) and records every
/// request it was asked for.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Vec<Route>,
    hang_prefix: Option<String>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn route(
        mut self,
        prefix: &str,
        status: u16,
        content_type: &str,
        body: impl Into<String>,
    ) -> Self {
        self.routes.push((
            prefix.to_string(),
            Ok((status, content_type.to_string(), body.into())),
        ));
        self
    }

    pub(crate) fn fail(mut self, prefix: &str, message: &str) -> Self {
        self.routes.push((prefix.to_string(), Err(message.to_string())));
        self
    }

    pub(crate) fn hang(mut self, prefix: &str) -> Self {
        self.hang_prefix = Some(prefix.to_string());
        self
    }

    /// URLs requested so far, in order.
    pub(crate) fn seen(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PluginError> {
        self.seen.lock().unwrap().push(request.clone());
        if let Some(ref prefix) = self.hang_prefix {
            if request.url.starts_with(prefix.as_str()) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
        let route = self
            .routes
            .iter()
            .find(|(prefix, _)| request.url.starts_with(prefix.as_str()));
        match route {
            Some((_, Ok((status, ct, body)))) => Ok(HttpResponse {
                status: *status,
                headers: HashMap::from([("content-type".to_string(), ct.clone())]),
                body: body.clone(),
                url: request.url,
            }),
            Some((_, Err(msg))) => Err(PluginError::Http(msg.clone())),
            None => Err(PluginError::Http("connection refused".into())),
        }
    }
}
