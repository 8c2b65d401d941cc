//! TuneBridge plugin host
//!
//! Runs third-party JavaScript source plugins inside embedded QuickJS
//! interpreters, supplies them with the module shims and network stack they
//! expect, and adapts whatever they export into one uniform
//! [`MusicPlugin`] interface.

pub mod adapter;
pub mod code_cache;
pub mod descriptor;
pub mod error;
pub mod host;
pub mod loader;
pub mod lyric_cache;
pub mod model;
pub mod net;
pub mod registry;
pub mod request;
pub mod sandbox;
pub mod shims;
pub mod store;
pub mod variables;

pub use adapter::{Capability, ExportShape, MusicPlugin};
pub use descriptor::{parse_feed, InstalledPlugin, PluginDescriptor};
pub use error::PluginError;
pub use host::PluginHost;
pub use lyric_cache::LyricCache;
pub use model::{Album, Artist, Page, Playlist, SearchType, StreamSource, Tag, TopListGroup, Track};
pub use net::{NetworkConfig, ProxiedFetch};
pub use registry::{LoadStatus, PluginRecord, PluginRegistry};
pub use sandbox::{ExecutionGate, SandboxConfig};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use variables::UserVariables;
