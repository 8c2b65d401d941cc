//! JSONP unwrapping.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Callback names seen in upstream responses that do not always match the
/// generic identifier pattern (trailing comments, odd whitespace).
pub const KNOWN_CALLBACKS: [&str; 5] = [
    "MusicJsonCallback",
    "callback",
    "jsonCallback",
    "jsonp1",
    "getOneSongInfoCallback",
];

/// Endpoints whose plugins parse the JSONP text themselves.
pub const RAW_JSONP_ENDPOINTS: [&str; 2] = ["fcg_query_lyric_new.fcg", "fcg_query_lyric_yqq.fcg"];

static GENERIC_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:/\*\*/\s*)?[A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*\s*\(([\s\S]*)\)\s*;?\s*$")
        .expect("jsonp regex")
});

/// Whether responses from `url` should be handed over as raw text.
pub fn is_raw_jsonp_endpoint(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    RAW_JSONP_ENDPOINTS.iter().any(|e| path.ends_with(e))
}

fn strip_known_callback(body: &str) -> Option<&str> {
    KNOWN_CALLBACKS.iter().find_map(|name| {
        let rest = body.strip_prefix(name)?.trim_start().strip_prefix('(')?;
        let end = rest.rfind(')')?;
        Some(&rest[..end])
    })
}

/// The JSON text inside a JSONP call, if `body` is one.
pub fn unwrap_jsonp(body: &str) -> Option<&str> {
    let trimmed = body.trim();
    if let Some(inner) = strip_known_callback(trimmed) {
        return Some(inner.trim());
    }
    GENERIC_CALL
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Parse a response body: JSON, then JSONP-wrapped JSON, else the text itself.
pub fn parse_body(body: &str) -> Value {
    let trimmed = body.trim_start_matches('\u{feff}').trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }
    if let Some(inner) = unwrap_jsonp(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            return value;
        }
    }
    Value::String(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generic_callback() {
        let v = parse_body(r#"foo({"code":200,"data":{"songs":[]}})"#);
        assert_eq!(v, json!({"code": 200, "data": {"songs": []}}));
    }

    #[test]
    fn test_known_callbacks() {
        for name in KNOWN_CALLBACKS {
            let body = format!("{name}({{\"code\":0}});");
            assert_eq!(parse_body(&body), json!({"code": 0}), "callback {name}");
        }
    }

    #[test]
    fn test_known_callback_with_trailing_comment() {
        let v = parse_body("MusicJsonCallback({\"retcode\":0})\n// end");
        assert_eq!(v, json!({"retcode": 0}));
    }

    #[test]
    fn test_dotted_callback_and_padding_comment() {
        assert_eq!(parse_body("/**/ jQuery.cb_1 ( [1,2] ) ;"), json!([1, 2]));
    }

    #[test]
    fn test_plain_json_and_text() {
        assert_eq!(parse_body(" {\"a\":1} "), json!({"a": 1}));
        assert_eq!(parse_body("<html></html>"), json!("<html></html>"));
        assert_eq!(parse_body("foo(not json)"), json!("foo(not json)"));
    }

    #[test]
    fn test_raw_endpoints() {
        assert!(is_raw_jsonp_endpoint(
            "https://c.y.qq.com/lyric/fcgi-bin/fcg_query_lyric_new.fcg?songmid=x"
        ));
        assert!(is_raw_jsonp_endpoint("https://c.y.qq.com/lyric/fcgi-bin/fcg_query_lyric_yqq.fcg"));
        assert!(!is_raw_jsonp_endpoint("https://c.y.qq.com/soso/fcgi-bin/client_search_cp"));
    }
}
