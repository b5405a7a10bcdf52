//! C5: diffs successive playlist generations against each other.
//!
//! Master-playlist diffing surfaces which variants/renditions appeared or disappeared so the
//! controller knows what to start or stop fetching. Media-playlist diffing is mostly
//! [`MediaPlaylist::inherit_from`] plus the unchanged-vs-changed check the refresh policy
//! needs.

use std::collections::HashSet;
use std::sync::Arc;

use crate::model::{KeyRef, MasterPlaylist, MediaPlaylist};

/// What changed between two generations of a master playlist.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MasterDiff {
    pub added_variant_indices: Vec<usize>,
    pub removed_variant_uris: Vec<String>,
    pub added_rendition_indices: Vec<usize>,
    pub removed_rendition_uris: Vec<String>,
}

impl MasterDiff {
    pub fn is_empty(&self) -> bool {
        self.added_variant_indices.is_empty()
            && self.removed_variant_uris.is_empty()
            && self.added_rendition_indices.is_empty()
            && self.removed_rendition_uris.is_empty()
    }
}

/// Compares `current` against `previous` (absent on the first fetch, in which case every
/// variant/rendition counts as added).
pub fn diff_master(previous: Option<&MasterPlaylist>, current: &MasterPlaylist) -> MasterDiff {
    let prior_variant_uris: HashSet<&str> = previous
        .map(|p| p.variants.iter().map(|v| v.uri.as_str()).collect())
        .unwrap_or_default();
    let current_variant_uris: HashSet<&str> =
        current.variants.iter().map(|v| v.uri.as_str()).collect();

    let added_variant_indices = current
        .variants
        .iter()
        .enumerate()
        .filter(|(_, v)| !prior_variant_uris.contains(v.uri.as_str()))
        .map(|(i, _)| i)
        .collect();

    let removed_variant_uris = prior_variant_uris
        .difference(&current_variant_uris)
        .map(|s| s.to_string())
        .collect();

    let prior_rendition_uris: HashSet<&str> = previous
        .map(|p| p.renditions.iter().filter_map(|r| r.uri.as_deref()).collect())
        .unwrap_or_default();
    let current_rendition_uris: HashSet<&str> = current
        .renditions
        .iter()
        .filter_map(|r| r.uri.as_deref())
        .collect();

    let added_rendition_indices = current
        .renditions
        .iter()
        .enumerate()
        .filter(|(_, r)| match r.uri.as_deref() {
            Some(uri) => !prior_rendition_uris.contains(uri),
            None => false,
        })
        .map(|(i, _)| i)
        .collect();

    let removed_rendition_uris = prior_rendition_uris
        .difference(&current_rendition_uris)
        .map(|s| s.to_string())
        .collect();

    MasterDiff {
        added_variant_indices,
        removed_variant_uris,
        added_rendition_indices,
        removed_rendition_uris,
    }
}

/// Session-data entries that carry a URI but haven't resolved their payload yet (C7 gate
/// feeders).
pub fn pending_session_data_indices(master: &MasterPlaylist) -> Vec<usize> {
    master
        .session_data
        .iter()
        .enumerate()
        .filter(|(_, sd)| !sd.is_complete() && sd.uri.is_some())
        .map(|(i, _)| i)
        .collect()
}

/// Session keys that still need their key material fetched.
pub fn pending_session_keys(master: &MasterPlaylist) -> Vec<Arc<KeyRef>> {
    master
        .session_keys
        .iter()
        .filter(|k| k.data.is_none())
        .cloned()
        .collect()
}

/// Byte-identical refetch check driving C4's unchanged-vs-live refresh cadence.
pub fn master_unchanged(previous: &MasterPlaylist, current: &MasterPlaylist) -> bool {
    previous.hash == current.hash
}

pub fn media_unchanged(previous: &MediaPlaylist, current: &MediaPlaylist) -> bool {
    previous.hash == current.hash
}
