//! Static upstream → internal-proxy rewrite table.

use url::Url;

/// One row of the rewrite table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    /// Exact hostname, or `*.suffix` to match any subdomain (and the suffix itself).
    pub host_pattern: String,
    /// Only URLs whose path starts with this prefix match.
    pub path_prefix: Option<String>,
    /// Path prefix on the internal proxy the request is forwarded to.
    pub proxy_prefix: String,
}

impl RewriteRule {
    pub fn new(host_pattern: &str, proxy_prefix: &str) -> Self {
        Self {
            host_pattern: host_pattern.to_string(),
            path_prefix: None,
            proxy_prefix: proxy_prefix.to_string(),
        }
    }

    pub fn with_path_prefix(mut self, prefix: &str) -> Self {
        self.path_prefix = Some(prefix.to_string());
        self
    }

    fn host_matches(&self, host: &str) -> bool {
        if let Some(suffix) = self.host_pattern.strip_prefix("*.") {
            host == suffix || host.ends_with(&format!(".{suffix}"))
        } else {
            host == self.host_pattern
        }
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        self.host_matches(&host.to_ascii_lowercase())
            && self
                .path_prefix
                .as_deref()
                .map_or(true, |prefix| url.path().starts_with(prefix))
    }
}

/// Ordered rewrite rules; the first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteTable {
    rules: Vec<RewriteRule>,
}

impl Default for RewriteTable {
    fn default() -> Self {
        Self::new(vec![
            RewriteRule::new("u.y.qq.com", "/proxy/qq-u"),
            RewriteRule::new("c.y.qq.com", "/proxy/qq-c"),
            RewriteRule::new("interface.music.163.com", "/proxy/netease-interface"),
            RewriteRule::new("music.163.com", "/proxy/netease"),
            RewriteRule::new("www.kuwo.cn", "/proxy/kuwo").with_path_prefix("/api/"),
            RewriteRule::new("complexsearch.kugou.com", "/proxy/kugou-search"),
            RewriteRule::new("*.kugou.com", "/proxy/kugou"),
        ])
    }
}

impl RewriteTable {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// The internal-proxy URL for `target`, or `None` when no rule matches.
    ///
    /// The target's path and query are appended verbatim to
    /// `{proxy_base}{proxy_prefix}`.
    pub fn rewrite(&self, target: &Url, proxy_base: &str) -> Option<String> {
        let rule = self.rules.iter().find(|r| r.matches(target))?;
        let mut out = format!(
            "{}{}{}",
            proxy_base.trim_end_matches('/'),
            rule.proxy_prefix,
            target.path()
        );
        if let Some(query) = target.query() {
            out.push('?');
            out.push_str(query);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(table: &RewriteTable, url: &str) -> Option<String> {
        table.rewrite(&Url::parse(url).unwrap(), "https://proxy.internal/")
    }

    #[test]
    fn test_exact_host_rewrite_keeps_path_and_query() {
        let table = RewriteTable::default();
        assert_eq!(
            rewrite(&table, "https://u.y.qq.com/cgi-bin/musicu.fcg?data=%7B%7D").as_deref(),
            Some("https://proxy.internal/proxy/qq-u/cgi-bin/musicu.fcg?data=%7B%7D")
        );
    }

    #[test]
    fn test_first_match_wins() {
        let table = RewriteTable::new(vec![
            RewriteRule::new("*.example.com", "/first"),
            RewriteRule::new("api.example.com", "/second"),
        ]);
        assert_eq!(
            rewrite(&table, "https://api.example.com/x").as_deref(),
            Some("https://proxy.internal/first/x")
        );
    }

    #[test]
    fn test_wildcard_matches_suffix_and_subdomains() {
        let table = RewriteTable::default();
        assert!(rewrite(&table, "https://wwwapi.kugou.com/yy/index.php").is_some());
        assert!(rewrite(&table, "https://kugou.com/").is_some());
        assert!(rewrite(&table, "https://notkugou.com/").is_none());
    }

    #[test]
    fn test_path_prefix_restricts_match() {
        let table = RewriteTable::default();
        assert!(rewrite(&table, "https://www.kuwo.cn/api/www/search").is_some());
        assert!(rewrite(&table, "https://www.kuwo.cn/play_detail/1").is_none());
    }

    #[test]
    fn test_unmatched_passes_through() {
        assert!(rewrite(&RewriteTable::default(), "https://example.org/").is_none());
        assert!(rewrite(&RewriteTable::empty(), "https://u.y.qq.com/").is_none());
    }
}
