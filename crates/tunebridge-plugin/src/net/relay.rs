//! Public CORS relay templates and candidate ordering.

use std::fmt;

pub const DEFAULT_HTTPS_RELAYS: [&str; 3] = [
    "https://corsproxy.io/?url={url_encoded}",
    "https://api.allorigins.win/raw?url={url_encoded}",
    "https://api.codetabs.com/v1/proxy?quest={url}",
];

pub const DEFAULT_HTTP_RELAYS: [&str; 2] = [
    "https://api.allorigins.win/raw?url={url_encoded}",
    "https://api.codetabs.com/v1/proxy?quest={url}",
];

/// Relay that forwards request headers (notably `Referer`) upstream.
pub const DEFAULT_REFERER_RELAY: &str = "https://cors.eu.org/{url}";

/// A relay URL template.
///
/// `{url}` is replaced with the raw target and `{url_encoded}` with the
/// percent-encoded target. A template with neither placeholder gets the
/// encoded target appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTemplate(String);

impl RelayTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn render(&self, target: &str) -> String {
        let template = &self.0;
        if template.contains("{url_encoded}") || template.contains("{url}") {
            template
                .replace("{url_encoded}", &urlencoding::encode(target))
                .replace("{url}", target)
        } else {
            format!("{template}{}", urlencoding::encode(target))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parse a comma-separated template list. `direct` entries are dropped
/// because the direct attempt is always placed by scheme.
pub fn parse_relay_list(raw: &str) -> Vec<RelayTemplate> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("direct"))
        .map(RelayTemplate::new)
        .collect()
}

/// One way of reaching an upstream URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    InternalProxy(String),
    Direct(String),
    Relay(String),
}

impl Candidate {
    pub fn url(&self) -> &str {
        match self {
            Self::InternalProxy(u) | Self::Direct(u) | Self::Relay(u) => u,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InternalProxy(_) => "proxy",
            Self::Direct(_) => "direct",
            Self::Relay(_) => "relay",
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.url())
    }
}

/// Relay and direct candidates for `target`: direct first for HTTPS
/// targets, last for HTTP targets.
pub fn fallback_candidates(
    target: &str,
    https_relays: &[RelayTemplate],
    http_relays: &[RelayTemplate],
) -> Vec<Candidate> {
    let is_https = target.to_ascii_lowercase().starts_with("https://");
    let relays = if is_https { https_relays } else { http_relays };
    let mut out = Vec::with_capacity(relays.len() + 1);
    if is_https {
        out.push(Candidate::Direct(target.to_string()));
    }
    out.extend(relays.iter().map(|r| Candidate::Relay(r.render(target))));
    if !is_https {
        out.push(Candidate::Direct(target.to_string()));
    }
    out
}
