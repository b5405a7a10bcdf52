//! Data model (SPEC_FULL.md §3): playlists, variants, renditions, segments, and the
//! auxiliary resources (key / map / session data) that gate emission.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

/// A resolved, fetched resource: raw bytes plus whatever mime type the loader reported.
#[derive(Debug, Clone)]
pub struct LoadedResource {
    pub data: Bytes,
    pub mime_type: Option<String>,
}

/// An encryption key reference (`#EXT-X-KEY` / `#EXT-X-SESSION-KEY`).
#[derive(Debug, Clone)]
pub struct KeyRef {
    pub uri: String,
    pub method: String,
    pub iv: Option<String>,
    pub data: Option<Bytes>,
}

/// An initialization map reference (`#EXT-X-MAP`).
#[derive(Debug, Clone)]
pub struct MapRef {
    pub uri: String,
    pub byte_range: Option<ByteRange>,
    pub data: Option<Bytes>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Slices `data` to `[offset, offset+length)`, clamped to the buffer's actual bounds.
    pub fn apply(&self, data: &Bytes) -> Bytes {
        let len = data.len();
        let start = (self.offset as usize).min(len);
        let end = start.saturating_add(self.length as usize).min(len);
        data.slice(start..end)
    }
}

/// Applies SPEC_FULL.md §4.6's byte-range fidelity rule: fetched data is sliced to the
/// segment/map's byte range unless the consumer asked for the raw, unsliced response.
pub fn apply_response_mode(data: Bytes, byte_range: Option<ByteRange>, raw_response: bool) -> Bytes {
    match (raw_response, byte_range) {
        (false, Some(br)) => br.apply(&data),
        _ => data,
    }
}

/// A media segment. `data` is populated once the subresource loader completes the fetch;
/// until then the segment exists in the playlist but is not eligible for emission.
#[derive(Debug, Clone)]
pub struct Segment {
    pub uri: String,
    pub byte_range: Option<ByteRange>,
    pub key: Option<Arc<KeyRef>>,
    pub map: Option<Arc<MapRef>>,
    pub duration: f32,
    pub discontinuity: bool,
    pub data: Option<Bytes>,
    pub mime_type: Option<String>,
}

impl Segment {
    /// C7: a segment may be emitted once its data, and any referenced key/map, have loaded.
    pub fn is_complete(&self) -> bool {
        if self.data.is_none() {
            return false;
        }
        if let Some(key) = &self.key
            && key.data.is_none()
        {
            return false;
        }
        if let Some(map) = &self.map
            && map.data.is_none()
        {
            return false;
        }
        true
    }

    /// Stable key for dedup/inheritance across refetches: the URI, qualified by byte range
    /// when present (two segments at the same URI but different ranges are distinct).
    pub fn identity(&self) -> String {
        match &self.byte_range {
            Some(br) => format!("{}|br={}@{}", self.uri, br.length, br.offset),
            None => self.uri.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaPlaylistKind {
    Vod,
    Event,
    LiveSliding,
}

impl MediaPlaylistKind {
    /// VOD and EVENT-with-endlist playlists are intrinsically (or have become) terminal.
    pub fn is_intrinsically_terminal(&self) -> bool {
        matches!(self, Self::Vod)
    }
}

/// Playlist variant B (SPEC_FULL.md §3).
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    pub uri: String,
    pub hash: String,
    pub kind: MediaPlaylistKind,
    pub end_list: bool,
    pub target_duration: f64,
    pub segments: Vec<Arc<Segment>>,
}

impl MediaPlaylist {
    pub fn is_terminal(&self) -> bool {
        self.end_list || self.kind.is_intrinsically_terminal()
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    /// C5 media-playlist diff: segments surviving by identity inherit their fetched
    /// data/key/map from `previous`; new segments start unfetched and must be queued.
    pub fn inherit_from(&mut self, previous: &MediaPlaylist) {
        let mut by_identity: HashMap<String, Arc<Segment>> = HashMap::with_capacity(previous.segments.len());
        for seg in &previous.segments {
            by_identity.insert(seg.identity(), Arc::clone(seg));
        }
        for seg in &mut self.segments {
            if let Some(prior) = by_identity.get(&seg.identity()) {
                let mut inherited = (**seg).clone();
                inherited.data = prior.data.clone();
                inherited.mime_type = prior.mime_type.clone();
                if let (Some(new_key), Some(prior_key)) = (&inherited.key, &prior.key)
                    && new_key.uri == prior_key.uri
                    && prior_key.data.is_some()
                {
                    inherited.key = Some(Arc::clone(prior_key));
                }
                if let (Some(new_map), Some(prior_map)) = (&inherited.map, &prior.map)
                    && new_map.uri == prior_map.uri
                    && prior_map.data.is_some()
                {
                    inherited.map = Some(Arc::clone(prior_map));
                }
                *seg = Arc::new(inherited);
            }
        }
    }

    /// Segments that still need their data (and/or key/map) fetched.
    pub fn pending_segments(&self) -> Vec<Arc<Segment>> {
        self.segments
            .iter()
            .filter(|s| !s.is_complete())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Variant {
    pub uri: String,
    pub bandwidth: u64,
    pub codecs: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenditionType {
    Audio,
    Video,
    Subtitles,
    ClosedCaptions,
}

#[derive(Debug, Clone)]
pub struct Rendition {
    pub media_type: RenditionType,
    pub uri: Option<String>,
    pub group_id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SessionDataEntry {
    pub key: String,
    pub value: Option<String>,
    pub uri: Option<String>,
    pub data: Option<serde_json::Value>,
}

impl SessionDataEntry {
    pub fn is_complete(&self) -> bool {
        self.value.is_some() || self.data.is_some()
    }
}

/// Playlist variant A (SPEC_FULL.md §3).
#[derive(Debug, Clone)]
pub struct MasterPlaylist {
    pub uri: String,
    pub hash: String,
    pub variants: Vec<Variant>,
    pub renditions: Vec<Rendition>,
    pub session_data: Vec<SessionDataEntry>,
    pub session_keys: Vec<Arc<KeyRef>>,
    /// Set once this generation has been emitted, so the gate never double-fires (D2).
    pub emitted: bool,
}

impl MasterPlaylist {
    /// C7: every session-data entry resolved and every session-key fetched.
    pub fn is_complete(&self) -> bool {
        self.session_data.iter().all(|sd| sd.is_complete())
            && self.session_keys.iter().all(|k| k.data.is_some())
    }
}

/// The tagged union the parser hands back (SPEC_FULL.md §6, re-architecture note in §9).
#[derive(Debug)]
pub enum ParsedPlaylist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_slices_to_offset_and_length() {
        let data = Bytes::from_static(b"0123456789");
        let br = ByteRange { offset: 2, length: 4 };
        assert_eq!(&br.apply(&data)[..], b"2345");
    }

    #[test]
    fn byte_range_clamps_past_end_of_buffer() {
        let data = Bytes::from_static(b"0123456789");
        let br = ByteRange { offset: 8, length: 100 };
        assert_eq!(&br.apply(&data)[..], b"89");
    }

    #[test]
    fn apply_response_mode_passes_through_without_byte_range() {
        let data = Bytes::from_static(b"whole-thing");
        assert_eq!(&apply_response_mode(data.clone(), None, false)[..], &data[..]);
    }

    #[test]
    fn apply_response_mode_slices_unless_raw() {
        let data = Bytes::from_static(b"0123456789");
        let br = ByteRange { offset: 1, length: 3 };
        assert_eq!(&apply_response_mode(data.clone(), Some(br), false)[..], b"123");
        assert_eq!(&apply_response_mode(data.clone(), Some(br), true)[..], &data[..]);
    }
}
