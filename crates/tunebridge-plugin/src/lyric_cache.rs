//! Process-wide lyric side channel.
//!
//! Some upstream responses carry lyric text next to a song identifier even
//! though the plugin never forwards it. The request shim records those pairs
//! here and stream resolution reads them back when a plugin's media response
//! has no lyric of its own. Entries are never evicted.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use base64::Engine;
use serde_json::Value;

/// Identifier fields that may sit next to a lyric field.
const ID_FIELDS: [&str; 5] = ["songmid", "songMid", "mid", "musicid", "id"];

/// Lyric fields, in preference order.
const LYRIC_FIELDS: [&str; 3] = ["lyric", "lrc", "rawLrc"];

/// Objects deeper than this are not searched.
const MAX_DEPTH: usize = 6;

#[derive(Debug, Clone, Default)]
pub struct LyricCache {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl LyricCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared instance used by hosts that do not inject their own.
    pub fn global() -> &'static LyricCache {
        static GLOBAL: OnceLock<LyricCache> = OnceLock::new();
        GLOBAL.get_or_init(LyricCache::new)
    }

    pub fn insert(&self, key: impl Into<String>, lyric: impl Into<String>) {
        let key = key.into();
        if key.is_empty() {
            return;
        }
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, lyric.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    /// First hit among `keys`, in order.
    pub fn lookup<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Option<String> {
        let entries = self.entries.read().ok()?;
        keys.into_iter().find_map(|k| entries.get(k).cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk a response body and record every `(id, lyric)` pair found.
    ///
    /// `fallback_id` (e.g. a `songmid` query parameter of the request) keys
    /// lyrics that have no identifier beside them. Returns the number of
    /// entries recorded.
    pub fn observe(&self, body: &Value, fallback_id: Option<&str>) -> usize {
        let mut found = Vec::new();
        collect_lyrics(body, 0, &mut found);
        let mut recorded = 0;
        for (id, lyric) in found {
            if let Some(key) = id.or_else(|| fallback_id.map(str::to_string)) {
                self.insert(key, lyric);
                recorded += 1;
            }
        }
        recorded
    }
}

fn collect_lyrics(value: &Value, depth: usize, out: &mut Vec<(Option<String>, String)>) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            let lyric = LYRIC_FIELDS
                .iter()
                .find_map(|f| map.get(*f).and_then(Value::as_str))
                .and_then(decode_lyric);
            if let Some(lyric) = lyric {
                let id = crate::model::pick_str(value, &ID_FIELDS);
                out.push((id, lyric));
            }
            for child in map.values() {
                if child.is_object() || child.is_array() {
                    collect_lyrics(child, depth + 1, out);
                }
            }
        }
        Value::Array(list) => {
            for child in list {
                collect_lyrics(child, depth + 1, out);
            }
        }
        _ => {}
    }
}

/// Lyric text as stored upstream: plain LRC, or base64-encoded LRC.
pub fn decode_lyric(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if looks_like_lrc(raw) {
        return Some(raw.to_string());
    }
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(compact.as_bytes()) {
        if let Ok(text) = String::from_utf8(bytes) {
            let text = text.trim().to_string();
            if looks_like_lrc(&text) {
                return Some(text);
            }
        }
    }
    Some(raw.to_string())
}

fn looks_like_lrc(text: &str) -> bool {
    text.starts_with('[') || text.contains("\n[") || text.contains("[00:")
}
