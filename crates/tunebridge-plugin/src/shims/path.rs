//! POSIX path helpers for the `path` shim and URL parsing for `url`/`URL`.

use serde::Serialize;
use url::Url;

use crate::error::PluginError;

pub const SEP: &str = "/";

// ─── path ─────────────────────────────────────────────────────────────

/// Collapse `.`/`..` segments and duplicate separators.
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let absolute = path.starts_with('/');
    let trailing = path.ends_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let mut out = parts.join("/");
    if absolute {
        out.insert(0, '/');
    }
    if out.is_empty() {
        return ".".to_string();
    }
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    out
}

pub fn join(parts: &[String]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("/");
    normalize(&joined)
}

/// Right-to-left until an absolute path is formed, rooted at `/`.
pub fn resolve(parts: &[String]) -> String {
    let mut acc = String::new();
    for part in parts.iter().rev().filter(|p| !p.is_empty()) {
        acc = if acc.is_empty() {
            part.clone()
        } else {
            format!("{part}/{acc}")
        };
        if part.starts_with('/') {
            break;
        }
    }
    if !acc.starts_with('/') {
        acc.insert(0, '/');
    }
    let out = normalize(&acc);
    if out.len() > 1 {
        out.trim_end_matches('/').to_string()
    } else {
        out
    }
}

pub fn basename(path: &str, ext: Option<&str>) -> String {
    let trimmed = path.trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    match ext {
        Some(ext) if !ext.is_empty() && base != ext => {
            base.strip_suffix(ext).unwrap_or(base).to_string()
        }
        _ => base.to_string(),
    }
}

pub fn dirname(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => trimmed[..i].trim_end_matches('/').to_string(),
        None => ".".to_string(),
    }
}

pub fn extname(path: &str) -> String {
    let base = basename(path, None);
    match base.rfind('.') {
        Some(0) | None => String::new(),
        Some(i) => base[i..].to_string(),
    }
}

// ─── url ──────────────────────────────────────────────────────────────

/// WHATWG URL components in the shape of a browser `URL` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlParts {
    pub href: String,
    pub origin: String,
    pub protocol: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub hostname: String,
    pub port: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
}

impl From<&Url> for UrlParts {
    fn from(url: &Url) -> Self {
        let hostname = url.host_str().unwrap_or_default().to_string();
        let port = url.port().map(|p| p.to_string()).unwrap_or_default();
        let host = if port.is_empty() {
            hostname.clone()
        } else {
            format!("{hostname}:{port}")
        };
        Self {
            href: url.to_string(),
            origin: url.origin().ascii_serialization(),
            protocol: format!("{}:", url.scheme()),
            username: url.username().to_string(),
            password: url.password().unwrap_or_default().to_string(),
            host,
            hostname,
            port,
            pathname: url.path().to_string(),
            search: url.query().map(|q| format!("?{q}")).unwrap_or_default(),
            hash: url.fragment().map(|f| format!("#{f}")).unwrap_or_default(),
        }
    }
}

/// `new URL(input, base?)`.
pub fn parse_url(input: &str, base: Option<&str>) -> Result<UrlParts, PluginError> {
    let url = match base.filter(|b| !b.is_empty()) {
        Some(base) => Url::parse(base)?.join(input)?,
        None => Url::parse(input)?,
    };
    Ok(UrlParts::from(&url))
}

/// Node's `url.resolve(from, to)`.
pub fn resolve_url(from: &str, to: &str) -> Result<String, PluginError> {
    Ok(Url::parse(from)?.join(to)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    // ── path ────────────────────────────────────────────────────────

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a//b/./c/../d"), "/a/b/d");
        assert_eq!(normalize("a/../../b"), "../b");
        assert_eq!(normalize("/../x"), "/x");
        assert_eq!(normalize("a/b/"), "a/b/");
        assert_eq!(normalize(""), ".");
    }

    #[test]
    fn test_join_and_resolve() {
        assert_eq!(join(&strings(&["/foo", "bar", "baz/asdf", "quux", ".."])), "/foo/bar/baz/asdf");
        assert_eq!(join(&strings(&["a", "", "b"])), "a/b");
        assert_eq!(resolve(&strings(&["/foo/bar", "./baz"])), "/foo/bar/baz");
        assert_eq!(resolve(&strings(&["/foo/bar", "/tmp/file/"])), "/tmp/file");
        assert_eq!(resolve(&strings(&["a", "b"])), "/a/b");
    }

    #[test]
    fn test_basename_dirname_extname() {
        assert_eq!(basename("/foo/bar/song.mp3", None), "song.mp3");
        assert_eq!(basename("/foo/bar/song.mp3", Some(".mp3")), "song");
        assert_eq!(basename("/foo/bar/", None), "bar");
        assert_eq!(dirname("/foo/bar/song.mp3"), "/foo/bar");
        assert_eq!(dirname("/foo"), "/");
        assert_eq!(dirname("song"), ".");
        assert_eq!(extname("index.coffee.md"), ".md");
        assert_eq!(extname(".profile"), "");
        assert_eq!(extname("noext"), "");
    }

    // ── url ─────────────────────────────────────────────────────────

    #[test]
    fn test_parse_url_components() {
        let parts = parse_url("https://user:pw@music.example.com:8443/a/b?x=1#frag", None).unwrap();
        assert_eq!(parts.protocol, "https:");
        assert_eq!(parts.host, "music.example.com:8443");
        assert_eq!(parts.hostname, "music.example.com");
        assert_eq!(parts.port, "8443");
        assert_eq!(parts.pathname, "/a/b");
        assert_eq!(parts.search, "?x=1");
        assert_eq!(parts.hash, "#frag");
        assert_eq!(parts.origin, "https://music.example.com:8443");
        assert_eq!(parts.username, "user");
    }

    #[test]
    fn test_parse_url_with_base() {
        let parts = parse_url("../c?y=2", Some("https://x.example/a/b/")).unwrap();
        assert_eq!(parts.href, "https://x.example/a/c?y=2");
        assert!(parse_url("relative/only", None).is_err());
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url("http://example.com/one", "/two").unwrap(), "http://example.com/two");
        assert_eq!(resolve_url("http://example.com/a/", "b").unwrap(), "http://example.com/a/b");
    }
}
