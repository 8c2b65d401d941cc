//! Uniform item shapes returned by every adapted plugin.
//!
//! Plugins return loosely-typed JSON whose field names differ per catalog
//! (`songmid` vs `id`, `singer` arrays vs `artist` strings, ...). Each item
//! type maps the common spellings into typed fields and keeps the original
//! object in `raw` so it can be handed back to the plugin unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Quality tokens tried against `getMediaSource`, best first.
pub const QUALITY_ORDER: [&str; 4] = ["super", "high", "standard", "low"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Music,
    Artist,
    Album,
    Sheet,
}

impl SearchType {
    pub const ALL: [SearchType; 4] = [Self::Music, Self::Artist, Self::Album, Self::Sheet];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Music => "music",
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Sheet => "sheet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "music" | "song" | "songs" => Some(Self::Music),
            "artist" | "singer" => Some(Self::Artist),
            "album" => Some(Self::Album),
            "sheet" | "playlist" => Some(Self::Sheet),
            _ => None,
        }
    }
}

// ─── Lenient field access ─────────────────────────────────────────────

/// First non-empty string (or number rendered as string) among `keys`.
pub(crate) fn pick_str(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match item.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Name of a nested object (`{name}`/`{title}`) or a plain string.
fn pick_name(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match item.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(obj @ Value::Object(_)) => pick_str(obj, &["name", "title"]),
        Some(Value::Array(list)) => {
            let names: Vec<String> = list
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    other => pick_str(other, &["name", "title"]),
                })
                .filter(|s| !s.trim().is_empty())
                .collect();
            (!names.is_empty()).then(|| names.join(", "))
        }
        _ => None,
    })
}

fn pick_u64(item: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| match item.get(*k) {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// ─── Items ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork: Option<String>,
    /// Duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub raw: Value,
}

impl Track {
    pub fn from_plugin_item(item: &Value) -> Self {
        Self {
            id: pick_str(item, &["id", "songmid", "mid", "hash", "rid", "musicrid"])
                .unwrap_or_default(),
            title: pick_str(item, &["title", "name", "songname", "songName"]).unwrap_or_default(),
            artist: pick_name(item, &["artist", "singer", "artists", "ar", "singerName"]),
            album: pick_name(item, &["album", "albumName", "albumname", "al"]),
            artwork: pick_str(item, &["artwork", "cover", "coverImg", "pic", "img", "albumPic"]),
            duration: pick_u64(item, &["duration", "interval"]),
            raw: item.clone(),
        }
    }

    /// Candidate keys for the lyric side-channel cache, most specific first.
    pub fn lyric_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = ["songmid", "mid", "id"]
            .iter()
            .filter_map(|k| pick_str(&self.raw, &[k]))
            .collect();
        if !self.id.is_empty() && !keys.contains(&self.id) {
            keys.push(self.id.clone());
        }
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub raw: Value,
}

impl Artist {
    pub fn from_plugin_item(item: &Value) -> Self {
        Self {
            id: pick_str(item, &["id", "singerMID", "singermid", "mid", "artistid"])
                .unwrap_or_default(),
            name: pick_str(item, &["name", "title", "singerName", "artist"]).unwrap_or_default(),
            avatar: pick_str(item, &["avatar", "artwork", "pic", "img", "singerPic"]),
            description: pick_str(item, &["description", "desc", "intro"]),
            raw: item.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub raw: Value,
}

impl Album {
    pub fn from_plugin_item(item: &Value) -> Self {
        Self {
            id: pick_str(item, &["id", "albumMID", "albummid", "mid", "albumid"])
                .unwrap_or_default(),
            title: pick_str(item, &["title", "name", "albumName"]).unwrap_or_default(),
            artist: pick_name(item, &["artist", "singer", "singerName", "artists"]),
            artwork: pick_str(item, &["artwork", "cover", "pic", "img", "albumPic"]),
            date: pick_str(item, &["date", "publishDate", "publish_time", "pubTime"]),
            raw: item.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub play_count: Option<u64>,
    pub raw: Value,
}

impl Playlist {
    pub fn from_plugin_item(item: &Value) -> Self {
        Self {
            id: pick_str(item, &["id", "dissid", "tid", "topId", "listid"]).unwrap_or_default(),
            title: pick_str(item, &["title", "name", "dissname", "topTitle"]).unwrap_or_default(),
            artwork: pick_str(item, &["artwork", "coverImg", "cover", "pic", "imgurl"]),
            description: pick_str(item, &["description", "desc", "intro"]),
            creator: pick_name(item, &["creator", "author", "nickname"]),
            play_count: pick_u64(item, &["playCount", "listennum", "playcount"]),
            raw: item.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub title: String,
    pub raw: Value,
}

impl Tag {
    pub fn from_plugin_item(item: &Value) -> Self {
        Self {
            id: pick_str(item, &["id", "tagId", "categoryId"]).unwrap_or_default(),
            title: pick_str(item, &["title", "name", "categoryName"]).unwrap_or_default(),
            raw: item.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagGroup {
    pub title: String,
    pub data: Vec<Tag>,
}

impl TagGroup {
    pub fn from_plugin_item(item: &Value) -> Self {
        Self {
            title: pick_str(item, &["title", "name"]).unwrap_or_default(),
            data: items(item.get("data")).iter().map(Tag::from_plugin_item).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendTags {
    pub pinned: Vec<Tag>,
    pub data: Vec<TagGroup>,
}

impl RecommendTags {
    pub fn from_plugin_value(value: &Value) -> Self {
        Self {
            pinned: items(value.get("pinned")).iter().map(Tag::from_plugin_item).collect(),
            data: items(value.get("data"))
                .iter()
                .map(TagGroup::from_plugin_item)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopListGroup {
    pub title: String,
    pub data: Vec<Playlist>,
}

impl TopListGroup {
    pub fn from_plugin_item(item: &Value) -> Self {
        Self {
            title: pick_str(item, &["title", "name"]).unwrap_or_default(),
            data: items(item.get("data"))
                .iter()
                .map(Playlist::from_plugin_item)
                .collect(),
        }
    }
}

fn items(value: Option<&Value>) -> &[Value] {
    value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

// ─── Envelopes ────────────────────────────────────────────────────────

/// Pagination envelope for list operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub is_end: bool,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            is_end: true,
        }
    }

    /// Map a plugin envelope (`{data, isEnd}` or a bare array) item by item.
    ///
    /// A missing `isEnd` is treated as the last page.
    pub fn from_plugin_value(value: &Value, map: impl Fn(&Value) -> T) -> Self {
        match value {
            Value::Array(list) => Self {
                data: list.iter().map(map).collect(),
                is_end: true,
            },
            Value::Object(_) => Self {
                data: items(value.get("data")).iter().map(map).collect(),
                is_end: value.get("isEnd").and_then(Value::as_bool).unwrap_or(true),
            },
            _ => Self::empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamExtra {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyric: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
}

/// A playable URL plus optional side data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSource {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<StreamExtra>,
}

impl StreamSource {
    /// Accept `{url, extra?}` as returned by uniform plugins.
    pub fn from_plugin_value(value: &Value) -> Option<Self> {
        let url = match value {
            Value::String(s) => s.trim().to_string(),
            other => pick_str(other, &["url"])?,
        };
        if url.is_empty() {
            return None;
        }
        let extra = value
            .get("extra")
            .and_then(|e| serde_json::from_value::<StreamExtra>(e.clone()).ok());
        Some(Self { url, extra })
    }
}
