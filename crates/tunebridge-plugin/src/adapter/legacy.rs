//! Mapping for the single-entry-point plugin convention.
//!
//! These plugins expose `search(query, page, type)` plus optional
//! `getMediaSource(item, quality)`, `getAlbumInfo`, `getMusicSheetInfo`, ...
//! whose results use `musicList` envelopes and scatter lyric text across
//! several nesting shapes.

use serde_json::{json, Map, Value};

use super::MusicPlugin;
use crate::error::PluginError;
use crate::lyric_cache::{decode_lyric, LyricCache};
use crate::model::{pick_str, Page, SearchType, StreamExtra, StreamSource, Track, QUALITY_ORDER};

/// Search types listed in `supportedSearchType`; all of them when the
/// plugin declares nothing usable.
pub(super) fn declared_search_types(meta: &Map<String, Value>) -> Vec<SearchType> {
    let declared: Vec<SearchType> = meta
        .get("supportedSearchType")
        .and_then(Value::as_array)
        .map(|list| {
            let mut types = Vec::new();
            for ty in list.iter().filter_map(Value::as_str).filter_map(SearchType::parse) {
                if !types.contains(&ty) {
                    types.push(ty);
                }
            }
            types
        })
        .unwrap_or_default();
    if declared.is_empty() {
        SearchType::ALL.to_vec()
    } else {
        declared
    }
}

/// Track page from either `{musicList, isEnd}` or `{data, isEnd}`.
pub(super) fn track_page(value: &Value) -> Page<Track> {
    match value.get("musicList").and_then(Value::as_array) {
        Some(list) => Page {
            data: list.iter().map(Track::from_plugin_item).collect(),
            is_end: value.get("isEnd").and_then(Value::as_bool).unwrap_or(true),
        },
        None => Page::from_plugin_value(value, Track::from_plugin_item),
    }
}

/// Paths where media responses have been seen carrying lyric text.
const LYRIC_PATHS: [&[&str]; 7] = [
    &["lyric"],
    &["lrc"],
    &["rawLrc"],
    &["extra", "lyric"],
    &["data", "lyric"],
    &["lyric", "lyric"],
    &["lyric", "lrc"],
];

fn embedded_lyric(value: &Value) -> Option<String> {
    LYRIC_PATHS.iter().find_map(|path| {
        path.iter()
            .try_fold(value, |v, key| v.get(*key))
            .and_then(Value::as_str)
            .and_then(decode_lyric)
    })
}

/// Stream source from a `getMediaSource` answer: a bare URL string,
/// `{url, headers?}` or `{data: {url}}`.
fn media_source(value: &Value, quality: &str) -> Option<StreamSource> {
    let url = match value {
        Value::String(s) => Some(s.trim().to_string()),
        other => pick_str(other, &["url"]).or_else(|| {
            other.get("data").and_then(|d| pick_str(d, &["url"]))
        }),
    }
    .filter(|u| !u.is_empty())?;
    let headers = value.get("headers").filter(|h| h.is_object()).cloned();
    Some(StreamSource {
        url,
        extra: Some(StreamExtra {
            lyric: embedded_lyric(value),
            quality: Some(quality.to_string()),
            headers,
        }),
    })
}

/// Fill a missing lyric from the side-channel cache.
pub(super) fn attach_cached_lyric(
    source: &mut StreamSource,
    track: &Track,
    response: &Value,
    lyrics: &LyricCache,
) {
    let extra = source.extra.get_or_insert_with(StreamExtra::default);
    if extra.lyric.is_some() {
        return;
    }
    let mut keys = track.lyric_keys();
    if let Some(id) = pick_str(response, &["id", "songmid", "mid"]) {
        keys.push(id);
    }
    extra.lyric = lyrics.lookup(keys.iter().map(String::as_str));
}

/// Try each quality token in order; the first response with a URL wins.
pub(super) async fn resolve_by_quality(
    plugin: &MusicPlugin,
    track: &Track,
) -> Result<StreamSource, PluginError> {
    let mut failures = Vec::new();
    for quality in QUALITY_ORDER {
        match plugin
            .call("getMediaSource", vec![track.raw.clone(), json!(quality)])
            .await
        {
            Ok(value) => match media_source(&value, quality) {
                Some(mut source) => {
                    attach_cached_lyric(&mut source, track, &value, &plugin.lyrics);
                    tracing::debug!(plugin = %plugin.name, quality, "stream resolved");
                    return Ok(source);
                }
                None => failures.push(format!("{quality}: no url")),
            },
            Err(PluginError::Cancelled) => return Err(PluginError::Cancelled),
            Err(e) => {
                tracing::debug!(plugin = %plugin.name, quality, "getMediaSource failed: {e}");
                failures.push(format!("{quality}: {e}"));
            }
        }
    }
    Err(PluginError::StreamUnavailable(format!(
        "{} ({}): {}",
        track.title,
        track.id,
        failures.join("; ")
    )))
}
