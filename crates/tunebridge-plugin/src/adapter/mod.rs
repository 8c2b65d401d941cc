//! Plugin adapter: classifies what a plugin exported and exposes it as a
//! uniform [`MusicPlugin`].
//!
//! Plugins in the wild follow several calling conventions. The adapter asks
//! the interpreter what each export slot holds ([`ExportProbe`]), picks the
//! first usable one in priority order, and afterwards talks to the selected
//! instance through [`PluginInvoker`] by method name.

mod legacy;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::PluginError;
use crate::lyric_cache::LyricCache;
use crate::model::{
    Album, Artist, Page, Playlist, RecommendTags, SearchType, StreamSource, Tag, TopListGroup,
    Track,
};

// ─── Interpreter seams ──────────────────────────────────────────────────

/// Places a plugin can leave its implementation after its body ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportSlot {
    /// Result of the last `registerPlugin` factory.
    Registered,
    /// `module.exports`, or its `.default`.
    Exports,
    /// Result of calling `module.exports` when it is a function.
    Factory,
}

impl ExportSlot {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Exports => "exports",
            Self::Factory => "factory",
        }
    }
}

/// What an export slot holds, as reported by the interpreter.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportReport {
    pub present: bool,
    pub is_function: bool,
    /// Function-valued members, including inherited ones.
    pub members: BTreeSet<String>,
    /// Serializable metadata such as `platform` or `supportedSearchType`.
    pub meta: Map<String, Value>,
}

impl ExportReport {
    pub fn has(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    fn has_any(&self, members: &[&str]) -> bool {
        members.iter().any(|m| self.has(m))
    }
}

/// Inspects and selects export slots of an executed plugin.
#[async_trait]
pub trait ExportProbe: Send + Sync {
    /// Resolve `slot` (awaiting factories) and describe the result.
    async fn probe(&self, slot: ExportSlot) -> Result<ExportReport, PluginError>;

    /// Make a previously probed slot the instance later invocations target.
    async fn select(&self, slot: ExportSlot) -> Result<(), PluginError>;
}

/// Calls a method on the selected plugin instance.
#[async_trait]
pub trait PluginInvoker: Send + Sync {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, PluginError>;
}

// ─── Classification ─────────────────────────────────────────────────────

/// Calling convention a plugin was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportShape {
    /// `registerPlugin(factory)` whose result has `searchSongs`.
    RegisteredFactory,
    /// An export (or a factory export's result) with `searchSongs`.
    UniformExport,
    /// A single `search(query, page, type)` entry point plus optional extras.
    LegacySearchExport,
    /// No search at all, but streams or charts.
    CapabilityOnlyExport,
    Unusable,
}

impl ExportShape {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RegisteredFactory => "registered-factory",
            Self::UniformExport => "uniform-export",
            Self::LegacySearchExport => "legacy-search-export",
            Self::CapabilityOnlyExport => "capability-only-export",
            Self::Unusable => "unusable",
        }
    }

    fn is_uniform(self) -> bool {
        matches!(self, Self::RegisteredFactory | Self::UniformExport)
    }
}

const CAPABILITY_ONLY_MEMBERS: [&str; 3] = ["getTopLists", "getTopListDetail", "getMediaSource"];

/// Shape a single export report on its own.
fn shape_of(report: &ExportReport) -> ExportShape {
    if !report.present {
        ExportShape::Unusable
    } else if report.has("searchSongs") {
        ExportShape::UniformExport
    } else if report.has("search") {
        ExportShape::LegacySearchExport
    } else if report.has_any(&CAPABILITY_ONLY_MEMBERS) || report.meta.contains_key("platform") {
        ExportShape::CapabilityOnlyExport
    } else {
        ExportShape::Unusable
    }
}

/// Outcome of [`classify`]: the winning shape and what its slot holds.
#[derive(Debug, Clone)]
pub struct Classified {
    pub shape: ExportShape,
    pub report: ExportReport,
}

/// Walk the export slots in priority order and select the first usable one.
///
/// Registrations win over exports; a function export is called and its
/// result classified in its place. Returns [`PluginError::NoValidExport`]
/// when nothing usable was left behind.
pub async fn classify(probe: &dyn ExportProbe) -> Result<Classified, PluginError> {
    let registered = probe.probe(ExportSlot::Registered).await?;
    if registered.present && registered.has("searchSongs") {
        probe.select(ExportSlot::Registered).await?;
        return Ok(Classified {
            shape: ExportShape::RegisteredFactory,
            report: registered,
        });
    }

    let exports = probe.probe(ExportSlot::Exports).await?;
    let (slot, report) = if exports.is_function {
        (ExportSlot::Factory, probe.probe(ExportSlot::Factory).await?)
    } else {
        (ExportSlot::Exports, exports)
    };

    match shape_of(&report) {
        ExportShape::Unusable => Err(PluginError::NoValidExport),
        shape => {
            probe.select(slot).await?;
            Ok(Classified { shape, report })
        }
    }
}

// ─── Uniform interface ──────────────────────────────────────────────────

/// Feature a [`MusicPlugin`] offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Search,
    Stream,
    ArtistSongs,
    AlbumSongs,
    PlaylistSongs,
    TopLists,
    RecommendSheets,
}

impl Capability {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Stream => "stream",
            Self::ArtistSongs => "artist-songs",
            Self::AlbumSongs => "album-songs",
            Self::PlaylistSongs => "playlist-songs",
            Self::TopLists => "top-lists",
            Self::RecommendSheets => "recommend-sheets",
        }
    }
}

/// Uniform method names and the search type each serves.
const UNIFORM_SEARCH: [(SearchType, &str); 4] = [
    (SearchType::Music, "searchSongs"),
    (SearchType::Artist, "searchArtists"),
    (SearchType::Album, "searchAlbums"),
    (SearchType::Sheet, "searchPlaylists"),
];

/// An adapted plugin. One instance per load, replaced wholesale on reload.
pub struct MusicPlugin {
    name: String,
    shape: ExportShape,
    report: ExportReport,
    search_types: Vec<SearchType>,
    invoker: Arc<dyn PluginInvoker>,
    lyrics: LyricCache,
}

impl std::fmt::Debug for MusicPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicPlugin")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("search_types", &self.search_types)
            .finish_non_exhaustive()
    }
}

impl MusicPlugin {
    /// Wrap a classified plugin instance.
    pub fn adapt(
        name: impl Into<String>,
        classified: Classified,
        invoker: Arc<dyn PluginInvoker>,
        lyrics: LyricCache,
    ) -> Result<Self, PluginError> {
        let Classified { shape, report } = classified;
        let search_types = match shape {
            ExportShape::RegisteredFactory | ExportShape::UniformExport => UNIFORM_SEARCH
                .iter()
                .filter(|(_, method)| report.has(method))
                .map(|(ty, _)| *ty)
                .collect(),
            ExportShape::LegacySearchExport => legacy::declared_search_types(&report.meta),
            ExportShape::CapabilityOnlyExport => Vec::new(),
            ExportShape::Unusable => return Err(PluginError::NoValidExport),
        };
        Ok(Self {
            name: name.into(),
            shape,
            report,
            search_types,
            invoker,
            lyrics,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> ExportShape {
        self.shape
    }

    /// Metadata the plugin declared (`platform`, `version`, ...).
    pub fn meta(&self) -> &Map<String, Value> {
        &self.report.meta
    }

    pub fn platform(&self) -> Option<&str> {
        self.report.meta.get("platform").and_then(Value::as_str)
    }

    pub fn supported_search_types(&self) -> &[SearchType] {
        &self.search_types
    }

    pub fn supports_search(&self, ty: SearchType) -> bool {
        self.search_types.contains(&ty)
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = BTreeSet::new();
        if !self.search_types.is_empty() {
            caps.insert(Capability::Search);
        }
        let has = |m: &str| self.report.has(m);
        if has("getMediaSource") || (self.shape.is_uniform() && has("resolveStream")) {
            caps.insert(Capability::Stream);
        }
        if has("getTopLists") {
            caps.insert(Capability::TopLists);
        }
        if has(self.method_for(Capability::ArtistSongs)) {
            caps.insert(Capability::ArtistSongs);
        }
        if has(self.method_for(Capability::AlbumSongs)) {
            caps.insert(Capability::AlbumSongs);
        }
        if has(self.method_for(Capability::PlaylistSongs)) {
            caps.insert(Capability::PlaylistSongs);
        }
        if has("getRecommendSheetTags") || has("getRecommendSheetsByTag") {
            caps.insert(Capability::RecommendSheets);
        }
        caps.into_iter().collect()
    }

    /// Plugin-side method backing a catalog capability.
    fn method_for(&self, cap: Capability) -> &'static str {
        let uniform = self.shape.is_uniform();
        match cap {
            Capability::ArtistSongs if uniform => "getArtistSongs",
            Capability::ArtistSongs => "getArtistWorks",
            Capability::AlbumSongs if uniform => "getAlbumSongs",
            Capability::AlbumSongs => "getAlbumInfo",
            Capability::PlaylistSongs if uniform => "getPlaylistSongs",
            Capability::PlaylistSongs => "getMusicSheetInfo",
            Capability::Search => "searchSongs",
            Capability::Stream => "getMediaSource",
            Capability::TopLists => "getTopLists",
            Capability::RecommendSheets => "getRecommendSheetsByTag",
        }
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, PluginError> {
        if !self.report.has(method) {
            return Err(PluginError::Unsupported(format!("{}.{method}", self.name)));
        }
        tracing::debug!(plugin = %self.name, method, "invoking plugin method");
        self.invoker.invoke(method, args).await
    }

    // ── search ──────────────────────────────────────────────────────────

    async fn search_raw(
        &self,
        ty: SearchType,
        query: &str,
        page: u32,
    ) -> Result<Option<Value>, PluginError> {
        if !self.supports_search(ty) {
            return Ok(None);
        }
        let value = if self.shape.is_uniform() {
            let method = UNIFORM_SEARCH
                .iter()
                .find(|(t, _)| *t == ty)
                .map(|(_, m)| *m)
                .unwrap_or("searchSongs");
            self.call(method, vec![json!(query), json!(page)]).await?
        } else {
            self.call("search", vec![json!(query), json!(page), json!(ty.as_str())])
                .await?
        };
        Ok(Some(value))
    }

    pub async fn search_songs(&self, query: &str, page: u32) -> Result<Page<Track>, PluginError> {
        Ok(self
            .search_raw(SearchType::Music, query, page)
            .await?
            .map(|v| Page::from_plugin_value(&v, Track::from_plugin_item))
            .unwrap_or_else(Page::empty))
    }

    pub async fn search_artists(&self, query: &str, page: u32) -> Result<Page<Artist>, PluginError> {
        Ok(self
            .search_raw(SearchType::Artist, query, page)
            .await?
            .map(|v| Page::from_plugin_value(&v, Artist::from_plugin_item))
            .unwrap_or_else(Page::empty))
    }

    pub async fn search_albums(&self, query: &str, page: u32) -> Result<Page<Album>, PluginError> {
        Ok(self
            .search_raw(SearchType::Album, query, page)
            .await?
            .map(|v| Page::from_plugin_value(&v, Album::from_plugin_item))
            .unwrap_or_else(Page::empty))
    }

    pub async fn search_playlists(
        &self,
        query: &str,
        page: u32,
    ) -> Result<Page<Playlist>, PluginError> {
        Ok(self
            .search_raw(SearchType::Sheet, query, page)
            .await?
            .map(|v| Page::from_plugin_value(&v, Playlist::from_plugin_item))
            .unwrap_or_else(Page::empty))
    }

    // ── catalog ─────────────────────────────────────────────────────────

    pub async fn get_artist_songs(
        &self,
        artist: &Artist,
        page: u32,
    ) -> Result<Page<Track>, PluginError> {
        let method = self.method_for(Capability::ArtistSongs);
        let mut args = vec![artist.raw.clone(), json!(page)];
        if !self.shape.is_uniform() {
            args.push(json!(SearchType::Music.as_str()));
        }
        let value = self.call(method, args).await?;
        Ok(legacy::track_page(&value))
    }

    pub async fn get_album_songs(&self, album: &Album, page: u32) -> Result<Page<Track>, PluginError> {
        let method = self.method_for(Capability::AlbumSongs);
        let value = self.call(method, vec![album.raw.clone(), json!(page)]).await?;
        Ok(legacy::track_page(&value))
    }

    pub async fn get_playlist_songs(
        &self,
        playlist: &Playlist,
        page: u32,
    ) -> Result<Page<Track>, PluginError> {
        let method = self.method_for(Capability::PlaylistSongs);
        let value = self
            .call(method, vec![playlist.raw.clone(), json!(page)])
            .await?;
        Ok(legacy::track_page(&value))
    }

    pub async fn get_top_lists(&self) -> Result<Vec<TopListGroup>, PluginError> {
        let value = self.call("getTopLists", Vec::new()).await?;
        Ok(value
            .as_array()
            .map(|groups| groups.iter().map(TopListGroup::from_plugin_item).collect())
            .unwrap_or_default())
    }

    pub async fn get_top_list_detail(
        &self,
        top_list: &Playlist,
        page: u32,
    ) -> Result<Page<Track>, PluginError> {
        let value = self
            .call("getTopListDetail", vec![top_list.raw.clone(), json!(page)])
            .await?;
        Ok(legacy::track_page(&value))
    }

    pub async fn get_recommend_sheet_tags(&self) -> Result<RecommendTags, PluginError> {
        let value = self.call("getRecommendSheetTags", Vec::new()).await?;
        Ok(RecommendTags::from_plugin_value(&value))
    }

    pub async fn get_recommend_sheets_by_tag(
        &self,
        tag: &Tag,
        page: u32,
    ) -> Result<Page<Playlist>, PluginError> {
        let value = self
            .call("getRecommendSheetsByTag", vec![tag.raw.clone(), json!(page)])
            .await?;
        Ok(Page::from_plugin_value(&value, Playlist::from_plugin_item))
    }

    // ── streams ─────────────────────────────────────────────────────────

    /// Resolve a playable URL for `track`.
    ///
    /// Uniform plugins answer through `resolveStream`; everything else (and
    /// uniform plugins without it) walks the quality tokens against
    /// `getMediaSource`.
    pub async fn resolve_stream(&self, track: &Track) -> Result<StreamSource, PluginError> {
        if self.shape.is_uniform() && self.report.has("resolveStream") {
            let value = self.call("resolveStream", vec![track.raw.clone()]).await?;
            let mut source = StreamSource::from_plugin_value(&value).ok_or_else(|| {
                PluginError::StreamUnavailable(format!("{} returned no URL", self.name))
            })?;
            legacy::attach_cached_lyric(&mut source, track, &value, &self.lyrics);
            return Ok(source);
        }
        if self.report.has("getMediaSource") {
            return legacy::resolve_by_quality(self, track).await;
        }
        Err(PluginError::Unsupported(format!(
            "{} cannot resolve streams",
            self.name
        )))
    }
}
