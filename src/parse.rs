//! Translates `m3u8-rs`'s parsed playlist types into this crate's model (SPEC_FULL.md §3,
//! §6). `m3u8-rs` is used directly as a pure function — it is not wrapped behind a trait of
//! our own, since nothing here needs to swap parsers.

use std::sync::Arc;

use m3u8_rs::{AlternativeMediaType, MediaPlaylistType, Playlist};

use crate::error::WalkError;
use crate::hash::digest;
use crate::model::{
    ByteRange, KeyRef, MapRef, MasterPlaylist, MediaPlaylist, MediaPlaylistKind, ParsedPlaylist,
    Rendition, RenditionType, Segment, SessionDataEntry, Variant,
};

/// Parses raw playlist bytes fetched from `uri` into the crate's model, tagging the result
/// with its content hash so the differ (C5) can cheaply detect byte-identical refetches.
pub fn parse(uri: &str, raw: &[u8]) -> Result<ParsedPlaylist, WalkError> {
    let hash = digest(raw);
    let (_, playlist) = m3u8_rs::parse_playlist_res(raw)
        .map(|p| (raw, p))
        .map_err(|e| WalkError::parse(uri, e.to_string()))?;

    match playlist {
        Playlist::MasterPlaylist(master) => Ok(ParsedPlaylist::Master(convert_master(uri, hash, master))),
        Playlist::MediaPlaylist(media) => Ok(ParsedPlaylist::Media(convert_media(uri, hash, media))),
    }
}

fn convert_master(uri: &str, hash: String, master: m3u8_rs::MasterPlaylist) -> MasterPlaylist {
    let variants = master
        .variants
        .iter()
        .map(|v| Variant {
            uri: v.uri.clone(),
            bandwidth: v.bandwidth,
            codecs: v.codecs.clone(),
        })
        .collect();

    let renditions = master
        .alternatives
        .iter()
        .map(|alt| Rendition {
            media_type: convert_rendition_type(&alt.media_type),
            uri: alt.uri.clone(),
            group_id: alt.group_id.clone(),
            name: alt.name.clone(),
        })
        .collect();

    let session_data = master
        .session_data
        .iter()
        .map(|sd| SessionDataEntry {
            key: sd.data_id.clone(),
            value: sd.value.clone(),
            uri: sd.uri.clone(),
            data: None,
        })
        .collect();

    let session_keys = master
        .session_key
        .iter()
        .filter_map(|sk| {
            let uri = sk.0.uri.clone()?;
            Some(Arc::new(KeyRef {
                uri,
                method: sk.0.method.clone(),
                iv: sk.0.iv.clone(),
                data: None,
            }))
        })
        .collect();

    MasterPlaylist {
        uri: uri.to_string(),
        hash,
        variants,
        renditions,
        session_data,
        session_keys,
        emitted: false,
    }
}

fn convert_rendition_type(media_type: &AlternativeMediaType) -> RenditionType {
    match media_type {
        AlternativeMediaType::Audio => RenditionType::Audio,
        AlternativeMediaType::Video => RenditionType::Video,
        AlternativeMediaType::Subtitles => RenditionType::Subtitles,
        AlternativeMediaType::ClosedCaptions => RenditionType::ClosedCaptions,
        AlternativeMediaType::Other(_) => RenditionType::Audio,
    }
}

fn convert_media(uri: &str, hash: String, media: m3u8_rs::MediaPlaylist) -> MediaPlaylist {
    let kind = match media.playlist_type {
        Some(MediaPlaylistType::Vod) => MediaPlaylistKind::Vod,
        Some(MediaPlaylistType::Event) => MediaPlaylistKind::Event,
        None => MediaPlaylistKind::LiveSliding,
    };

    let mut current_key: Option<Arc<KeyRef>> = None;
    let mut current_map: Option<Arc<MapRef>> = None;
    let mut segments = Vec::with_capacity(media.segments.len());

    for seg in &media.segments {
        if let Some(key) = &seg.key {
            current_key = key.uri.clone().map(|key_uri| {
                Arc::new(KeyRef {
                    uri: key_uri,
                    method: key.method.clone(),
                    iv: key.iv.clone(),
                    data: None,
                })
            });
        }
        if let Some(map) = &seg.map {
            current_map = Some(Arc::new(MapRef {
                uri: map.uri.clone(),
                byte_range: map.byte_range.as_ref().map(convert_byte_range),
                data: None,
                mime_type: None,
            }));
        }

        segments.push(Arc::new(Segment {
            uri: seg.uri.clone(),
            byte_range: seg.byte_range.as_ref().map(convert_byte_range),
            key: current_key.clone(),
            map: current_map.clone(),
            duration: seg.duration,
            discontinuity: seg.discontinuity,
            data: None,
            mime_type: None,
        }));
    }

    MediaPlaylist {
        uri: uri.to_string(),
        hash,
        kind,
        end_list: media.end_list,
        target_duration: media.target_duration,
        segments,
    }
}

fn convert_byte_range(br: &m3u8_rs::ByteRange) -> ByteRange {
    ByteRange {
        offset: br.offset.unwrap_or(0),
        length: br.length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = concat!(
        "#EXTM3U\n",
        "#EXT-X-STREAM-INF:BANDWIDTH=1280000,CODECS=\"avc1.4d401f,mp4a.40.2\"\n",
        "low/index.m3u8\n",
        "#EXT-X-STREAM-INF:BANDWIDTH=2560000,CODECS=\"avc1.4d401f,mp4a.40.2\"\n",
        "high/index.m3u8\n",
    );

    const MEDIA_VOD: &str = concat!(
        "#EXTM3U\n",
        "#EXT-X-VERSION:3\n",
        "#EXT-X-TARGETDURATION:6\n",
        "#EXT-X-PLAYLIST-TYPE:VOD\n",
        "#EXTINF:6.0,\n",
        "seg0.ts\n",
        "#EXTINF:6.0,\n",
        "seg1.ts\n",
        "#EXT-X-ENDLIST\n",
    );

    #[test]
    fn parses_master_variants() {
        let parsed = parse("https://example.com/master.m3u8", MASTER.as_bytes()).unwrap();
        match parsed {
            ParsedPlaylist::Master(m) => {
                assert_eq!(m.variants.len(), 2);
                assert_eq!(m.variants[0].bandwidth, 1_280_000);
                assert_eq!(m.variants[1].uri, "high/index.m3u8");
            }
            ParsedPlaylist::Media(_) => panic!("expected a master playlist"),
        }
    }

    #[test]
    fn parses_vod_media_as_terminal() {
        let parsed = parse("https://example.com/media.m3u8", MEDIA_VOD.as_bytes()).unwrap();
        match parsed {
            ParsedPlaylist::Media(m) => {
                assert_eq!(m.segments.len(), 2);
                assert!(m.is_terminal());
                assert_eq!(m.kind, MediaPlaylistKind::Vod);
            }
            ParsedPlaylist::Master(_) => panic!("expected a media playlist"),
        }
    }

    #[test]
    fn invalid_bytes_produce_parse_error() {
        let err = parse("https://example.com/bad.m3u8", b"not a playlist").unwrap_err();
        assert!(matches!(err, WalkError::Parse { .. }));
    }
}
