//! Plugin host error types.

use std::fmt;

use thiserror::Error;

/// One failed step of a fallback chain (a download source or a relay
/// candidate) and why it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// What was tried: a URL, or a URL tagged with the candidate kind.
    pub target: String,
    /// HTTP status or exception text.
    pub outcome: String,
}

impl Attempt {
    pub fn new(target: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            outcome: outcome.into(),
        }
    }
}

/// Ordered list of attempts, rendered one per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptLog(pub Vec<Attempt>);

impl AttemptLog {
    pub fn push(&mut self, attempt: Attempt) {
        self.0.push(attempt);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attempt> {
        self.0.iter()
    }
}

impl fmt::Display for AttemptLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attempt) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {} → {}", attempt.target, attempt.outcome)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("failed to download plugin '{plugin}' from every source:\n{attempts}")]
    DownloadFailure { plugin: String, attempts: AttemptLog },

    #[error("plugin execution failed: {0}")]
    Execution(String),

    #[error("no valid implementation exported")]
    NoValidExport,

    #[error("all network candidates failed for {target}:\n{attempts}")]
    NetworkExhausted { target: String, attempts: AttemptLog },

    #[error("upstream requires a Referer header that relays cannot forward: {0}")]
    RefererRequired(String),

    #[error("HTML document returned where JSON was expected: {0}")]
    HtmlInsteadOfJson(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("operation not supported by plugin: {0}")]
    Unsupported(String),

    #[error("no playable stream: {0}")]
    StreamUnavailable(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("semver error: {0}")]
    Semver(#[from] semver::Error),
}

impl PluginError {
    /// Stable tag handed to plugin JavaScript as `error.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidDescriptor(_) => "invalid_descriptor",
            Self::DownloadFailure { .. } => "download_failure",
            Self::Execution(_) => "execution",
            Self::NoValidExport => "no_valid_export",
            Self::NetworkExhausted { .. } => "network_exhausted",
            Self::RefererRequired(_) => "referer_required",
            Self::HtmlInsteadOfJson(_) => "html_instead_of_json",
            Self::Cancelled => "cancelled",
            Self::Http(_) => "http",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::InvalidState(_) => "invalid_state",
            Self::Unsupported(_) => "unsupported",
            Self::StreamUnavailable(_) => "stream_unavailable",
            Self::Sandbox(_) => "sandbox",
            Self::Store(_) => "store",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Url(_) => "url",
            Self::Semver(_) => "semver",
        }
    }

    /// Whether the error came from running or classifying plugin code.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::Execution(_) | Self::NoValidExport)
    }

    /// Whether the error is a network-shaped failure of one request chain.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkExhausted { .. }
                | Self::RefererRequired(_)
                | Self::HtmlInsteadOfJson(_)
                | Self::Http(_)
        )
    }
}
