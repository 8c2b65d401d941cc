//! Upstream quirks of the qq.com family: Referer checks and the musicu
//! gateway's GET form.

use serde_json::Value;
use url::Url;

const QQ_REFERER: &str = "https://y.qq.com/";

const MUSICU_HOST: &str = "u.y.qq.com";
const MUSICU_PATH: &str = "/cgi-bin/musicu.fcg";

/// Referer to add when a request to `url` carries none.
pub fn default_referer(url: &Url) -> Option<&'static str> {
    let host = url.host_str()?.to_ascii_lowercase();
    (host == "qq.com" || host.ends_with(".qq.com")).then_some(QQ_REFERER)
}

/// `{code: 0, subcode: 1, msg: "... invalid referer ..."}` in a 200 body.
pub fn is_invalid_referer(body: &Value) -> bool {
    let code = body.get("code").and_then(Value::as_i64);
    let subcode = body.get("subcode").and_then(Value::as_i64);
    let msg = body
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    code == Some(0) && subcode == Some(1) && msg.contains("invalid referer")
}

/// Whether a POST to `url` should be re-issued as `GET ?data=<json>`.
pub fn is_foldable_post(url: &Url, method: &str) -> bool {
    method.eq_ignore_ascii_case("POST")
        && url.host_str().is_some_and(|h| h.eq_ignore_ascii_case(MUSICU_HOST))
        && url.path() == MUSICU_PATH
}

/// Move a serialized JSON body into the `data` query parameter.
pub fn fold_post_to_get(url: &Url, body: &Value) -> String {
    let data = match body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut folded = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "data")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = folded.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("data", &data);
    }
    folded.to_string()
}
