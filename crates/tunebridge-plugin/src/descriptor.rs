//! Plugin descriptors, installed-plugin records and feed parsing.
//!
//! A descriptor is the static identity and fetch location of a plugin as
//! published by a feed. Installing a descriptor assigns it a stable id that
//! keys the code cache, user variables and log output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PluginError;

/// Maximum plugin name length in characters.
const MAX_NAME_LEN: usize = 128;

/// Identity and location of a plugin, as issued by a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<String>,
}

/// A descriptor after installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPlugin {
    pub id: String,
    #[serde(flatten)]
    pub descriptor: PluginDescriptor,
    pub enabled: bool,
    pub installed_at: DateTime<Utc>,
}

// ─── Validation helpers ─────────────────────────────────────────────

/// Accept only absolute `http`/`https` URLs with a host.
fn validate_source_url(url: &str, field_name: &str) -> Result<(), PluginError> {
    let parsed = url::Url::parse(url).map_err(|_| {
        PluginError::InvalidDescriptor(format!("{field_name} is not an absolute URL: '{url}'"))
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PluginError::InvalidDescriptor(format!(
            "{field_name} must use http or https, got scheme '{}' in '{url}'",
            parsed.scheme()
        )));
    }

    if parsed.host_str().is_none() {
        return Err(PluginError::InvalidDescriptor(format!(
            "{field_name} has no host: '{url}'"
        )));
    }

    Ok(())
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            version: None,
            description: None,
            mirrors: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_mirrors<I, S>(mut self, mirrors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mirrors = mirrors.into_iter().map(Into::into).collect();
        self
    }

    /// Validate all fields of the descriptor.
    pub fn validate(&self) -> Result<(), PluginError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(PluginError::InvalidDescriptor(
                "name must not be empty".into(),
            ));
        }
        let len = name.chars().count();
        if len > MAX_NAME_LEN {
            return Err(PluginError::InvalidDescriptor(format!(
                "name must be at most {MAX_NAME_LEN} characters, got {len}"
            )));
        }

        validate_source_url(&self.url, "url")?;
        for (i, mirror) in self.mirrors.iter().enumerate() {
            validate_source_url(mirror, &format!("mirrors[{i}]"))?;
        }

        if let Some(ref version) = self.version {
            if version.trim().is_empty() {
                return Err(PluginError::InvalidDescriptor(
                    "version must not be empty when present".into(),
                ));
            }
        }

        Ok(())
    }

    /// Primary URL followed by every mirror, in download order.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.mirrors.iter().map(String::as_str))
    }

    /// Whether this descriptor carries an older version than `installed`.
    ///
    /// Only answers for versions that both parse as semver (a leading `v`
    /// is tolerated); free-form versions never count as a downgrade.
    pub fn is_downgrade_from(&self, installed: &PluginDescriptor) -> bool {
        fn parse(v: Option<&str>) -> Option<semver::Version> {
            let v = v?.trim();
            semver::Version::parse(v.strip_prefix('v').unwrap_or(v)).ok()
        }
        match (parse(self.version.as_deref()), parse(installed.version.as_deref())) {
            (Some(offered), Some(current)) => offered < current,
            _ => false,
        }
    }

    /// Version string used for cache validation; absent versions compare as empty.
    pub fn version_key(&self) -> &str {
        self.version.as_deref().unwrap_or("")
    }
}

impl InstalledPlugin {
    /// Install a validated descriptor under a fresh UUID v4.
    pub fn install(descriptor: PluginDescriptor) -> Result<Self, PluginError> {
        descriptor.validate()?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            descriptor,
            enabled: true,
            installed_at: Utc::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

// ─── Feeds ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum FeedDocument {
    Wrapped { plugins: Vec<PluginDescriptor> },
    Bare(Vec<PluginDescriptor>),
}

/// Parse a plugin feed: either `{"plugins": [...]}` or a bare array.
///
/// Invalid entries are skipped with a warning so that one bad descriptor
/// does not hide the rest of the feed.
pub fn parse_feed(body: &str) -> Result<Vec<PluginDescriptor>, PluginError> {
    let document: FeedDocument = serde_json::from_str(body.trim_start_matches('\u{feff}'))?;
    let descriptors = match document {
        FeedDocument::Wrapped { plugins } => plugins,
        FeedDocument::Bare(plugins) => plugins,
    };

    Ok(descriptors
        .into_iter()
        .filter(|d| match d.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(plugin = %d.name, "skipping invalid feed entry: {e}");
                false
            }
        })
        .collect())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> PluginDescriptor {
        PluginDescriptor::new("QQ Music", "https://plugins.example.com/qq.js")
            .with_version("1.2.0")
            .with_mirrors(["https://mirror.example.org/qq.js"])
    }

    // ── Validation ──────────────────────────────────────────────────

    #[test]
    fn test_valid_descriptor() {
        descriptor().validate().unwrap();
    }

    #[test]
    fn test_reject_empty_name() {
        let mut d = descriptor();
        d.name = "   ".into();
        let err = d.validate().unwrap_err();
        assert!(matches!(err, PluginError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_downgrade_detection() {
        let current = descriptor();
        assert!(descriptor().with_version("1.1.9").is_downgrade_from(&current));
        assert!(descriptor().with_version("v1.0.0").is_downgrade_from(&current));
        assert!(!descriptor().with_version("1.3.0").is_downgrade_from(&current));
        assert!(!descriptor().with_version("2024-05-01").is_downgrade_from(&current));
        let mut unversioned = descriptor();
        unversioned.version = None;
        assert!(!unversioned.is_downgrade_from(&current));
    }

    #[test]
    fn test_reject_long_name() {
        let mut d = descriptor();
        d.name = "x".repeat(129);
        assert!(d.validate().is_err());
        d.name = "x".repeat(128);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_reject_relative_url() {
        let mut d = descriptor();
        d.url = "plugins/qq.js".into();
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn test_reject_file_scheme() {
        let mut d = descriptor();
        d.url = "file:///etc/passwd".into();
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_reject_bad_mirror() {
        let d = descriptor().with_mirrors(["ftp://mirror.example.org/qq.js"]);
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("mirrors[0]"));
    }

    #[test]
    fn test_reject_blank_version() {
        let d = descriptor().with_version("");
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_sources_order() {
        let d = descriptor().with_mirrors(["https://a.example/p.js", "https://b.example/p.js"]);
        let sources: Vec<&str> = d.sources().collect();
        assert_eq!(
            sources,
            vec![
                "https://plugins.example.com/qq.js",
                "https://a.example/p.js",
                "https://b.example/p.js"
            ]
        );
    }

    // ── Install ─────────────────────────────────────────────────────

    #[test]
    fn test_install_assigns_uuid() {
        let installed = InstalledPlugin::install(descriptor()).unwrap();
        assert!(Uuid::parse_str(&installed.id).is_ok());
        assert!(installed.enabled);
        assert_eq!(installed.name(), "QQ Music");
    }

    #[test]
    fn test_installed_serialization_is_flat() {
        let installed = InstalledPlugin::install(descriptor()).unwrap();
        let json = serde_json::to_value(&installed).unwrap();
        assert_eq!(json["name"], "QQ Music");
        assert_eq!(json["version"], "1.2.0");
        assert!(json.get("installedAt").is_some());
        let back: InstalledPlugin = serde_json::from_value(json).unwrap();
        assert_eq!(back, installed);
    }

    // ── Feeds ───────────────────────────────────────────────────────

    #[test]
    fn test_parse_wrapped_feed() {
        let body = r#"{"plugins":[{"name":"a","url":"https://x.example/a.js","version":"1"}]}"#;
        let feed = parse_feed(body).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].version.as_deref(), Some("1"));
    }

    #[test]
    fn test_parse_bare_feed_skips_invalid() {
        let body = r#"[
            {"name":"a","url":"https://x.example/a.js"},
            {"name":"","url":"https://x.example/b.js"},
            {"name":"c","url":"not-a-url"}
        ]"#;
        let feed = parse_feed(body).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].name, "a");
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        assert!(matches!(
            parse_feed("<html>oops</html>"),
            Err(PluginError::Serialization(_))
        ));
    }
}
