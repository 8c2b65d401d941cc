//! Query-string codec with nested bracket notation.
//!
//! `stringify({a: {b: 1}, c: [x, y]})` gives `a%5Bb%5D=1&c%5B0%5D=x&c%5B1%5D=y`;
//! `parse` accepts both `a[b]=1` and `a[]=x` forms.

use serde_json::{Map, Value};

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn push_pairs(prefix: &str, value: &Value, encode: bool, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                push_pairs(&format!("{prefix}[{k}]"), v, encode, out);
            }
        }
        Value::Array(list) => {
            for (i, v) in list.iter().enumerate() {
                push_pairs(&format!("{prefix}[{i}]"), v, encode, out);
            }
        }
        scalar => {
            let text = scalar_text(scalar).unwrap_or_default();
            if encode {
                out.push(format!("{}={}", urlencoding::encode(prefix), urlencoding::encode(&text)));
            } else {
                out.push(format!("{prefix}={text}"));
            }
        }
    }
}

/// Serialize an object into `k=v` pairs joined by `&`.
///
/// Non-object inputs stringify to an empty string. `undefined`-like nulls
/// at the top level are skipped the way plugins expect.
pub fn stringify(value: &Value, encode: bool) -> String {
    let Value::Object(map) = value else {
        return String::new();
    };
    let mut out = Vec::new();
    for (k, v) in map {
        if v.is_null() {
            continue;
        }
        match v {
            Value::Object(_) | Value::Array(_) => push_pairs(k, v, encode, &mut out),
            scalar => {
                let text = scalar_text(scalar).unwrap_or_default();
                if encode {
                    out.push(format!("{}={}", urlencoding::encode(k), urlencoding::encode(&text)));
                } else {
                    out.push(format!("{k}={text}"));
                }
            }
        }
    }
    out.join("&")
}

fn decode_component(s: &str) -> String {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .unwrap_or(spaced)
}

/// Split `a[b][]` into `["a", "b", ""]`.
fn key_path(key: &str) -> Vec<String> {
    let Some(open) = key.find('[') else {
        return vec![key.to_string()];
    };
    let mut parts = vec![key[..open].to_string()];
    let mut rest = &key[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        match stripped.find(']') {
            Some(close) => {
                parts.push(stripped[..close].to_string());
                rest = &stripped[close + 1..];
            }
            None => break,
        }
    }
    parts
}

/// Indices above this become object keys, as in the JS `qs` package.
const ARRAY_LIMIT: usize = 20;

fn insert_path(target: &mut Value, path: &[String], value: String) {
    let Some((head, tail)) = path.split_first() else {
        return;
    };

    let is_index = head.is_empty() || head.parse::<usize>().is_ok_and(|i| i <= ARRAY_LIMIT);
    if is_index {
        if target.is_null() {
            *target = Value::Array(Vec::new());
        }
    } else if !target.is_object() {
        let converted = match std::mem::take(target) {
            Value::Array(list) => list
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            _ => Map::new(),
        };
        *target = Value::Object(converted);
    }

    match target {
        Value::Array(list) => {
            let index = if head.is_empty() {
                list.len()
            } else {
                head.parse::<usize>().unwrap_or(list.len())
            };
            if index >= list.len() {
                list.resize(index + 1, Value::Null);
            }
            if tail.is_empty() {
                list[index] = Value::String(value);
            } else {
                insert_path(&mut list[index], tail, value);
            }
        }
        Value::Object(map) => {
            let slot = map.entry(head.clone()).or_insert(Value::Null);
            if tail.is_empty() {
                *slot = Value::String(value);
            } else {
                insert_path(slot, tail, value);
            }
        }
        _ => {}
    }
}

/// Parse `a=1&b[c]=2&d[]=x` into nested objects and arrays of strings.
pub fn parse(query: &str) -> Value {
    let query = query.trim_start_matches('?');
    let mut root = Value::Object(Map::new());
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(raw_key);
        if key.is_empty() {
            continue;
        }
        let path = key_path(&key);
        insert_path(&mut root, &path, decode_component(raw_value));
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stringify_flat() {
        let s = stringify(&json!({"a": "x y", "b": 2, "c": true, "skip": null}), true);
        assert_eq!(s, "a=x%20y&b=2&c=true");
    }

    #[test]
    fn test_stringify_nested_unencoded() {
        let s = stringify(&json!({"a": {"b": 1}, "c": ["x", "y"]}), false);
        assert_eq!(s, "a[b]=1&c[0]=x&c[1]=y");
    }

    #[test]
    fn test_stringify_nested_encoded() {
        let s = stringify(&json!({"a": {"b": 1}}), true);
        assert_eq!(s, "a%5Bb%5D=1");
    }

    #[test]
    fn test_parse_nested() {
        let v = parse("?a=1&b[c]=2&b[d][e]=3&list[]=x&list[]=y&sp=a+b%21");
        assert_eq!(
            v,
            json!({
                "a": "1",
                "b": {"c": "2", "d": {"e": "3"}},
                "list": ["x", "y"],
                "sp": "a b!"
            })
        );
    }

    #[test]
    fn test_parse_indexed_array() {
        assert_eq!(parse("a[1]=y&a[0]=x"), json!({"a": ["x", "y"]}));
    }

    #[test]
    fn test_parse_large_index_becomes_key() {
        assert_eq!(parse("a[100]=x"), json!({"a": {"100": "x"}}));
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse(""), json!({}));
        assert_eq!(parse("novalue"), json!({"novalue": ""}));
    }
}
