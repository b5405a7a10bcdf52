//! Events published to the consumer (SPEC_FULL.md §6).

use std::sync::Arc;

use crate::error::WalkError;
use crate::model::{MasterPlaylist, MediaPlaylist, Rendition, Segment, Variant};

/// A master playlist, media playlist, or segment, cloned through the Cloner (C2)
/// before being handed to the consumer.
#[derive(Debug, Clone)]
pub enum WalkData {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
    Segment(Arc<Segment>),
}

#[derive(Debug, Clone)]
pub enum WalkEvent {
    Data(WalkData),
    Error(WalkError),
}

/// Synchronous selection hook invoked before loading a master playlist's media playlists.
/// Defaults to "load everything" when the consumer doesn't override it.
pub trait VariantSelector: Send + Sync {
    fn select(&self, variants: &[Variant]) -> Vec<usize>;
}

/// Synchronous selection hook invoked before loading a variant's alternate renditions.
pub trait RenditionSelector: Send + Sync {
    fn select(&self, renditions: &[Rendition]) -> Vec<usize>;
}

/// Default selector: accept every candidate, matching "defaults to all" in SPEC_FULL.md §6.
pub struct SelectAll;

impl VariantSelector for SelectAll {
    fn select(&self, variants: &[Variant]) -> Vec<usize> {
        (0..variants.len()).collect()
    }
}

impl RenditionSelector for SelectAll {
    fn select(&self, renditions: &[Rendition]) -> Vec<usize> {
        (0..renditions.len()).collect()
    }
}
