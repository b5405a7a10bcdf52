//! End-to-end scenarios driven through a scripted in-memory loader, exercising the
//! controller (C8) the way a real consumer would: start a walk, pull events off the stream,
//! assert on what shows up and in what shape.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use hls_walker::{
    LoadOptions, Loader, LoadedResource, WalkConfig, WalkData, WalkError, WalkEvent, WalkOptions,
    Walker,
};

/// Returns queued responses per URL in order; the last queued response repeats once
/// exhausted, so a test can script "changes N times then stabilizes".
#[derive(Default)]
struct ScriptedLoader {
    scripts: Mutex<HashMap<String, VecDeque<&'static str>>>,
}

impl ScriptedLoader {
    fn new() -> Self {
        Self::default()
    }

    fn push(&self, url: &str, body: &'static str) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(body);
    }
}

#[async_trait]
impl Loader for ScriptedLoader {
    async fn load(&self, url: &str, _opts: LoadOptions) -> Result<LoadedResource, WalkError> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(url)
            .ok_or_else(|| WalkError::loader(url, "no script registered for this URL"))?;
        let body = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            *queue.front().unwrap()
        };
        Ok(LoadedResource {
            data: Bytes::from_static(body.as_bytes()),
            mime_type: Some("application/vnd.apple.mpegurl".to_string()),
        })
    }
}

fn test_config() -> WalkConfig {
    WalkConfig::new(WalkOptions {
        master_playlist_timeout: Duration::from_millis(20),
        ..WalkOptions::default()
    })
}

/// Drains the event stream to completion, asserting the walk actually ends (the controller reaches
/// `Closed` and drops its sender) within `timeout`, rather than just stopping at a deadline.
/// A walk that never becomes quiescent (e.g. the master-refresh-never-stops regression) shows
/// up here as a panic instead of a silently-truncated event list.
async fn drain_until_closed(mut events: impl futures::Stream<Item = WalkEvent> + Unpin, timeout: Duration) -> Vec<WalkEvent> {
    let mut out = Vec::new();
    let drained = tokio::time::timeout(timeout, async {
        while let Some(event) = events.next().await {
            out.push(event);
        }
    })
    .await;
    assert!(
        drained.is_ok(),
        "walk did not close within {timeout:?}; event stream is still open after {} events",
        out.len()
    );
    out
}

const MASTER_TWO_VARIANTS: &str = concat!(
    "#EXTM3U\n",
    "#EXT-X-STREAM-INF:BANDWIDTH=1000000\n",
    "low.m3u8\n",
    "#EXT-X-STREAM-INF:BANDWIDTH=2000000\n",
    "high.m3u8\n",
);

fn vod_media(segment_count: usize) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-PLAYLIST-TYPE:VOD\n");
    for i in 0..segment_count {
        out.push_str(&format!("#EXTINF:4.0,\nseg{i}.ts\n"));
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

#[tokio::test]
async fn vod_master_with_two_variants_emits_all_segments() {
    let loader = Arc::new(ScriptedLoader::new());
    loader.push("master.m3u8", MASTER_TWO_VARIANTS);
    let low = vod_media(2);
    let high = vod_media(2);
    loader.push("low.m3u8", Box::leak(low.into_boxed_str()));
    loader.push("high.m3u8", Box::leak(high.into_boxed_str()));

    let (_handle, events) = Walker::new("master.m3u8", test_config(), loader).start();
    let events = drain_until_closed(events, Duration::from_secs(2)).await;

    let masters = events
        .iter()
        .filter(|e| matches!(e, WalkEvent::Data(WalkData::Master(_))))
        .count();
    let segments = events
        .iter()
        .filter(|e| matches!(e, WalkEvent::Data(WalkData::Segment(_))))
        .count();

    assert_eq!(masters, 1, "master should be emitted exactly once");
    assert_eq!(segments, 4, "both variants' segments should be emitted");
}

#[tokio::test]
async fn live_media_playlist_refreshes_then_ends_on_endlist() {
    let loader = Arc::new(ScriptedLoader::new());
    loader.push(
        "live.m3u8",
        concat!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1.0,\nseg0.ts\n",
        ),
    );
    loader.push(
        "live.m3u8",
        concat!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1.0,\nseg0.ts\n#EXTINF:1.0,\nseg1.ts\n#EXT-X-ENDLIST\n",
        ),
    );

    let config = WalkConfig::new(WalkOptions::default());
    let (_handle, events) = Walker::new("live.m3u8", config, loader).start();
    let events = drain_until_closed(events, Duration::from_secs(3)).await;

    let media_events: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WalkEvent::Data(WalkData::Media(m)) => Some(m),
            _ => None,
        })
        .collect();
    assert!(media_events.len() >= 2, "expected at least initial + refreshed media event");
    assert!(media_events.last().unwrap().is_terminal());

    let segment_count = events
        .iter()
        .filter(|e| matches!(e, WalkEvent::Data(WalkData::Segment(_))))
        .count();
    assert_eq!(segment_count, 2, "seg0 should not be re-emitted after the refresh");
}

#[tokio::test]
async fn variant_removed_from_master_stops_being_fetched() {
    let loader = Arc::new(ScriptedLoader::new());
    loader.push(
        "master.m3u8",
        concat!(
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000000\nlow.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2000000\nhigh.m3u8\n",
        ),
    );
    loader.push(
        "master.m3u8",
        concat!("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000000\nlow.m3u8\n"),
    );
    loader.push("low.m3u8", Box::leak(vod_media(1).into_boxed_str()));
    loader.push("high.m3u8", Box::leak(vod_media(1).into_boxed_str()));

    let mut config = test_config();
    config.options.master_playlist_timeout = Duration::from_millis(15);
    let (_handle, events) = Walker::new("master.m3u8", config, loader).start();
    let events = drain_until_closed(events, Duration::from_secs(2)).await;

    let segments: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WalkEvent::Data(WalkData::Segment(s)) => Some(s.uri.clone()),
            _ => None,
        })
        .collect();
    assert!(segments.contains(&"seg0.ts".to_string()));
}

#[tokio::test]
async fn session_key_gates_master_emission_until_resolved() {
    let loader = Arc::new(ScriptedLoader::new());
    loader.push(
        "master.m3u8",
        concat!(
            "#EXTM3U\n",
            "#EXT-X-SESSION-KEY:METHOD=AES-128,URI=\"key.bin\"\n",
            "#EXT-X-STREAM-INF:BANDWIDTH=1000000\n",
            "low.m3u8\n",
        ),
    );
    loader.push("low.m3u8", Box::leak(vod_media(1).into_boxed_str()));
    loader.push("key.bin", "\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}");

    let (_handle, events) = Walker::new("master.m3u8", test_config(), loader).start();
    let events = drain_until_closed(events, Duration::from_secs(2)).await;

    let masters: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WalkEvent::Data(WalkData::Master(m)) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(masters.len(), 1);
    assert!(masters[0].session_keys[0].data.is_some());
}

#[tokio::test]
async fn segment_key_is_inherited_across_refresh_without_refetch() {
    let loader = Arc::new(ScriptedLoader::new());
    loader.push(
        "live.m3u8",
        concat!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:1\n",
            "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n",
            "#EXTINF:1.0,\nseg0.ts\n",
        ),
    );
    loader.push(
        "live.m3u8",
        concat!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:1\n",
            "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n",
            "#EXTINF:1.0,\nseg0.ts\n#EXTINF:1.0,\nseg1.ts\n#EXT-X-ENDLIST\n",
        ),
    );
    loader.push("seg0.ts", "segment-zero-bytes");
    loader.push("seg1.ts", "segment-one-bytes");
    loader.push("key.bin", "0123456789abcdef");

    let (_handle, events) = Walker::new("live.m3u8", WalkConfig::default(), loader).start();
    let events = drain_until_closed(events, Duration::from_secs(2)).await;

    let segments: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WalkEvent::Data(WalkData::Segment(s)) => Some(s.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(segments.len(), 2);
    for seg in &segments {
        assert!(seg.key.as_ref().unwrap().data.is_some());
    }
}
