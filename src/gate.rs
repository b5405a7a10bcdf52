//! C7: emission gating. Nothing reaches the consumer until it is fully resolved, and nothing
//! is ever emitted twice within the same walk (D2).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::model::{MasterPlaylist, Segment};

/// Tracks which segment identities have already been handed to the consumer, per media
/// playlist URI, so a live refresh that re-sees an inherited segment doesn't re-emit it.
#[derive(Debug, Default)]
pub struct SegmentEmitGate {
    emitted: HashMap<String, HashSet<String>>,
}

impl SegmentEmitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the segments from `candidates` that are both complete (C7 invariant 4) and
    /// not yet emitted for `playlist_uri`, marking them emitted as a side effect.
    pub fn admit(&mut self, playlist_uri: &str, candidates: &[Arc<Segment>]) -> Vec<Arc<Segment>> {
        let seen = self.emitted.entry(playlist_uri.to_string()).or_default();
        let mut admitted = Vec::new();
        for seg in candidates {
            if !seg.is_complete() {
                continue;
            }
            if seen.insert(seg.identity()) {
                admitted.push(Arc::clone(seg));
            }
        }
        admitted
    }

    pub fn forget(&mut self, playlist_uri: &str) {
        self.emitted.remove(playlist_uri);
    }
}

/// Whether a master playlist's single generation may be emitted: complete, and not already
/// emitted (D2 double-emission guard).
pub fn can_emit_master(master: &MasterPlaylist) -> bool {
    !master.emitted && master.is_complete()
}
