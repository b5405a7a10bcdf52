//! Pull-based HLS playlist walk engine.
//!
//! Fetches a master or media playlist, follows its variants, renditions, segments, keys,
//! maps and session data, and streams them to the caller as they become fully resolved. The
//! engine holds all mutable state inside a single controller task; everything else — fetches,
//! refresh timers — runs as independent tasks that report back over a channel.
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use hls_walker::{DefaultLoader, WalkConfig, Walker};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WalkConfig::default();
//! let loader = Arc::new(DefaultLoader::new(config.http.clone(), None)?);
//! let (handle, mut events) = Walker::new("https://example.com/master.m3u8", config, loader).start();
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! handle.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod differ;
pub mod error;
pub mod events;
pub mod gate;
pub mod hash;
pub mod loader;
pub mod model;
pub mod parse;
pub mod pending;
pub mod walker;

pub use config::{HttpLoaderConfig, RefreshPolicy, WalkConfig, WalkOptions};
pub use error::WalkError;
pub use events::{RenditionSelector, SelectAll, VariantSelector, WalkData, WalkEvent};
pub use loader::{DefaultLoader, LoadOptions, Loader};
pub use model::{
    ByteRange, KeyRef, LoadedResource, MapRef, MasterPlaylist, MediaPlaylist, MediaPlaylistKind,
    ParsedPlaylist, Rendition, RenditionType, Segment, SessionDataEntry, Variant,
};
pub use walker::{ControllerState, WalkHandle, Walker};
