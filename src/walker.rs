//! C8: the controller. A single task owns all mutable walk state; every fetch and timer is
//! an independent spawned task that reports back over an internal channel. This is the same
//! split the grounding engine's coordinator/scheduler uses — state mutation never happens
//! outside the controller task, so there is nothing to lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WalkConfig;
use crate::differ::{self, MasterDiff};
use crate::error::WalkError;
use crate::events::{RenditionSelector, SelectAll, VariantSelector, WalkData, WalkEvent};
use crate::gate::{self, SegmentEmitGate};
use crate::loader::{LoadOptions, Loader};
use crate::model::{
    apply_response_mode, KeyRef, LoadedResource, MapRef, MasterPlaylist, MediaPlaylist,
    ParsedPlaylist,
};
use crate::parse;
use crate::pending::{AcceptState, PendingRegistry};

/// Controller lifecycle (SPEC_FULL.md §4): `Initialized` until [`Walker::start`] runs,
/// `Reading` while fetches/timers are active, `Ended` once every playlist has settled,
/// `Closed` once the consumer channel has been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Initialized,
    Reading,
    Ended,
    Closed,
}

#[derive(Debug, Clone)]
struct FetchTarget {
    url: String,
    role: FetchRole,
}

#[derive(Debug, Clone)]
enum FetchRole {
    EntryPoint,
    Media { variant_uri: String },
    Segment { playlist_uri: String, identity: String },
    Key { playlist_uri: Option<String> },
    Map { playlist_uri: String },
    SessionData { index: usize },
}

enum ControllerMessage {
    StartFetch(FetchTarget),
    FetchDone {
        target: FetchTarget,
        result: Result<LoadedResource, WalkError>,
    },
    Tick(FetchTarget),
    ConsumerClose,
}

struct MediaState {
    current: Option<MediaPlaylist>,
}

/// Builds a controller for one walk and hands back a pull handle plus the event stream.
pub struct Walker {
    entry_url: String,
    config: WalkConfig,
    loader: Arc<dyn Loader>,
    variant_selector: Arc<dyn VariantSelector>,
    rendition_selector: Arc<dyn RenditionSelector>,
}

/// Lets the consumer request an early, graceful stop without dropping the stream.
#[derive(Clone)]
pub struct WalkHandle {
    msg_tx: mpsc::UnboundedSender<ControllerMessage>,
}

impl WalkHandle {
    pub fn close(&self) {
        let _ = self.msg_tx.send(ControllerMessage::ConsumerClose);
    }
}

impl Walker {
    pub fn new(entry_url: impl Into<String>, config: WalkConfig, loader: Arc<dyn Loader>) -> Self {
        Self {
            entry_url: entry_url.into(),
            config,
            loader,
            variant_selector: Arc::new(SelectAll),
            rendition_selector: Arc::new(SelectAll),
        }
    }

    pub fn with_variant_selector(mut self, selector: Arc<dyn VariantSelector>) -> Self {
        self.variant_selector = selector;
        self
    }

    pub fn with_rendition_selector(mut self, selector: Arc<dyn RenditionSelector>) -> Self {
        self.rendition_selector = selector;
        self
    }

    /// Spawns the controller task and returns a handle plus the pull-based event stream.
    pub fn start(self) -> (WalkHandle, ReceiverStream<WalkEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        let controller = Controller {
            entry_url: self.entry_url,
            config: self.config.clone(),
            loader: self.loader,
            variant_selector: self.variant_selector,
            rendition_selector: self.rendition_selector,
            state: ControllerState::Initialized,
            pending: PendingRegistry::new(),
            gate: SegmentEmitGate::new(),
            master: None,
            media: HashMap::new(),
            inflight_urls: HashSet::new(),
            fetch_semaphore: Arc::new(Semaphore::new(
                self.config.options.max_concurrent_fetches.max(1),
            )),
            cancel: CancellationToken::new(),
            event_tx,
            msg_tx: msg_tx.clone(),
            msg_rx,
        };

        tokio::spawn(controller.run());

        (WalkHandle { msg_tx }, ReceiverStream::new(event_rx))
    }
}

struct Controller {
    entry_url: String,
    config: WalkConfig,
    loader: Arc<dyn Loader>,
    variant_selector: Arc<dyn VariantSelector>,
    rendition_selector: Arc<dyn RenditionSelector>,
    state: ControllerState,
    pending: PendingRegistry,
    gate: SegmentEmitGate,
    master: Option<MasterPlaylist>,
    media: HashMap<String, MediaState>,
    inflight_urls: HashSet<String>,
    fetch_semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<WalkEvent>,
    msg_tx: mpsc::UnboundedSender<ControllerMessage>,
    msg_rx: mpsc::UnboundedReceiver<ControllerMessage>,
}

impl Controller {
    async fn run(mut self) {
        self.state = ControllerState::Reading;
        let entry = FetchTarget {
            url: self.entry_url.clone(),
            role: FetchRole::EntryPoint,
        };
        self.spawn_fetch(entry);

        loop {
            if self.state == ControllerState::Closed {
                break;
            }
            tokio::select! {
                Some(msg) = self.msg_rx.recv() => {
                    match msg {
                        ControllerMessage::StartFetch(target) => self.spawn_fetch(target),
                        ControllerMessage::Tick(target) => self.spawn_fetch(target),
                        ControllerMessage::FetchDone { target, result } => {
                            self.handle_fetch_done(target, result).await;
                        }
                        ControllerMessage::ConsumerClose => {
                            info!("consumer requested early close");
                            self.close();
                            break;
                        }
                    }
                }
                _ = self.event_tx.closed() => {
                    debug!("consumer dropped the event stream");
                    self.close();
                    break;
                }
            }

            if self.should_end() {
                self.state = ControllerState::Ended;
                self.close();
                break;
            }
        }
    }

    fn should_end(&self) -> bool {
        self.state == ControllerState::Reading
            && !self.media.is_empty()
            && self.pending.is_quiescent()
            && self
                .media
                .values()
                .all(|m| matches!(&m.current, Some(p) if p.is_terminal() && p.pending_segments().is_empty()))
    }

    fn close(&mut self) {
        self.pending.cancel_all();
        self.cancel.cancel();
        self.state = ControllerState::Closed;
    }

    fn dedupe_key(target: &FetchTarget) -> String {
        match &target.role {
            FetchRole::Segment {
                playlist_uri,
                identity,
            } => format!("seg:{playlist_uri}:{identity}"),
            FetchRole::Key { playlist_uri } => {
                format!("key:{}:{}", playlist_uri.as_deref().unwrap_or(""), target.url)
            }
            FetchRole::Map { playlist_uri } => format!("map:{playlist_uri}:{}", target.url),
            _ => target.url.clone(),
        }
    }

    fn spawn_fetch(&mut self, target: FetchTarget) {
        let key = Self::dedupe_key(&target);
        if self.state == ControllerState::Closed {
            return;
        }
        if !self.inflight_urls.insert(key) {
            return;
        }
        self.pending.incr();
        let loader = Arc::clone(&self.loader);
        let tx = self.msg_tx.clone();
        let semaphore = Arc::clone(&self.fetch_semaphore);
        let cancel = self.cancel.clone();
        let url = target.url.clone();
        let opts = LoadOptions {
            raw_response: self.config.options.raw_response,
            ..LoadOptions::default()
        };
        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(WalkError::Cancelled),
                r = loader.load(&url, opts) => r,
            };
            drop(permit);
            let _ = tx.send(ControllerMessage::FetchDone { target, result });
        });
    }

    fn schedule_refresh(&mut self, target: FetchTarget, delay: std::time::Duration) {
        let accept = if self.state == ControllerState::Reading {
            AcceptState::Accepting
        } else {
            AcceptState::Closed
        };
        let (fire_tx, mut fire_rx) = mpsc::unbounded_channel();
        let msg_tx = self.msg_tx.clone();
        self.pending.schedule(accept, delay, || async {}, fire_tx);
        tokio::spawn(async move {
            if fire_rx.recv().await.is_some() {
                let _ = msg_tx.send(ControllerMessage::Tick(target));
            }
        });
    }

    async fn emit(&mut self, data: WalkData) {
        if self.event_tx.send(WalkEvent::Data(data)).await.is_err() {
            self.close();
        }
    }

    async fn emit_error(&mut self, err: WalkError) {
        warn!(error = %err, "walk error");
        if self.event_tx.send(WalkEvent::Error(err)).await.is_err() {
            self.close();
        }
    }

    async fn handle_fetch_done(&mut self, target: FetchTarget, result: Result<LoadedResource, WalkError>) {
        self.pending.decr();
        self.inflight_urls.remove(&Self::dedupe_key(&target));

        let resource = match result {
            Ok(resource) => resource,
            Err(err) => {
                let fatal = matches!(target.role, FetchRole::EntryPoint);
                self.emit_error(err).await;
                if fatal {
                    self.state = ControllerState::Ended;
                }
                return;
            }
        };

        match target.role {
            FetchRole::EntryPoint => self.handle_entry_fetched(target.url, resource).await,
            FetchRole::Media { variant_uri } => self.handle_media_fetched(variant_uri, resource).await,
            FetchRole::Segment {
                playlist_uri,
                identity,
            } => self.handle_segment_fetched(playlist_uri, identity, resource).await,
            FetchRole::Key { playlist_uri } => {
                self.handle_key_fetched(playlist_uri, target.url, resource).await
            }
            FetchRole::Map { playlist_uri } => {
                self.handle_map_fetched(playlist_uri, target.url, resource).await
            }
            FetchRole::SessionData { index } => self.handle_session_data_fetched(index, resource).await,
        }
    }

    async fn handle_entry_fetched(&mut self, url: String, resource: LoadedResource) {
        let parsed = match parse::parse(&url, &resource.data) {
            Ok(p) => p,
            Err(err) => {
                self.emit_error(err).await;
                self.state = ControllerState::Ended;
                return;
            }
        };
        match parsed {
            ParsedPlaylist::Master(master) => self.process_new_master(master).await,
            ParsedPlaylist::Media(media) => self.process_media_update(url, media).await,
        }
    }

    async fn process_new_master(&mut self, master: MasterPlaylist) {
        let diff: MasterDiff = differ::diff_master(self.master.as_ref(), &master);

        for removed_uri in &diff.removed_variant_uris {
            self.media.remove(removed_uri);
            self.gate.forget(removed_uri);
        }
        for removed_uri in &diff.removed_rendition_uris {
            self.media.remove(removed_uri);
            self.gate.forget(removed_uri);
        }

        let selected_variants: HashSet<usize> =
            self.variant_selector.select(&master.variants).into_iter().collect();
        let selected_renditions: HashSet<usize> = self
            .rendition_selector
            .select(&master.renditions)
            .into_iter()
            .collect();

        // Only newly-added variants/renditions are queued (SPEC_FULL.md §4.5 point 1);
        // ones already tracked from a prior generation keep refreshing on their own cadence.
        for idx in &diff.added_variant_indices {
            if !selected_variants.contains(idx) {
                continue;
            }
            if let Some(variant) = master.variants.get(*idx) {
                self.media.entry(variant.uri.clone()).or_insert(MediaState { current: None });
                self.spawn_fetch(FetchTarget {
                    url: variant.uri.clone(),
                    role: FetchRole::Media {
                        variant_uri: variant.uri.clone(),
                    },
                });
            }
        }
        for idx in &diff.added_rendition_indices {
            if !selected_renditions.contains(idx) {
                continue;
            }
            if let Some(rendition) = master.renditions.get(*idx)
                && let Some(uri) = rendition.uri.clone()
            {
                self.media.entry(uri.clone()).or_insert(MediaState { current: None });
                self.spawn_fetch(FetchTarget {
                    url: uri.clone(),
                    role: FetchRole::Media { variant_uri: uri },
                });
            }
        }

        for idx in differ::pending_session_data_indices(&master) {
            if let Some(uri) = master.session_data[idx].uri.clone() {
                self.spawn_fetch(FetchTarget {
                    url: uri,
                    role: FetchRole::SessionData { index: idx },
                });
            }
        }
        for key in differ::pending_session_keys(&master) {
            self.spawn_fetch(FetchTarget {
                url: key.uri.clone(),
                role: FetchRole::Key { playlist_uri: None },
            });
        }

        // Newly-added entries above were inserted with `current: None`, so a first fetch
        // (nothing cached yet) always needs a reload; a master whose selected
        // variants/renditions have all already settled (VOD, or live + endlist) does not.
        let needs_reload = self.master_needs_reload(&master, &selected_variants, &selected_renditions);

        self.master = Some(master);
        self.try_emit_master().await;

        if needs_reload {
            let policy = self.config.refresh_policy();
            self.schedule_refresh(
                FetchTarget {
                    url: self.entry_url.clone(),
                    role: FetchRole::EntryPoint,
                },
                policy.master_refresh_delay(),
            );
        }
    }

    /// SPEC_FULL.md §4.4/§4.5 point 4: the master only needs to be refetched while some
    /// selected variant or rendition hasn't settled — either nothing has been fetched for it
    /// yet, or what's cached for it is still live.
    fn master_needs_reload(
        &self,
        master: &MasterPlaylist,
        selected_variants: &HashSet<usize>,
        selected_renditions: &HashSet<usize>,
    ) -> bool {
        let variant_pending = master
            .variants
            .iter()
            .enumerate()
            .filter(|(idx, _)| selected_variants.contains(idx))
            .any(|(_, v)| self.media_is_pending(&v.uri));
        if variant_pending {
            return true;
        }
        master
            .renditions
            .iter()
            .enumerate()
            .filter(|(idx, _)| selected_renditions.contains(idx))
            .filter_map(|(_, r)| r.uri.as_deref())
            .any(|uri| self.media_is_pending(uri))
    }

    fn media_is_pending(&self, uri: &str) -> bool {
        match self.media.get(uri).and_then(|state| state.current.as_ref()) {
            Some(playlist) => !playlist.is_terminal(),
            None => true,
        }
    }

    async fn try_emit_master(&mut self) {
        let Some(master) = &mut self.master else { return };
        if gate::can_emit_master(master) {
            master.emitted = true;
            let snapshot = master.clone();
            self.emit(WalkData::Master(snapshot)).await;
        }
    }

    async fn handle_media_fetched(&mut self, variant_uri: String, resource: LoadedResource) {
        let parsed = parse::parse(&variant_uri, &resource.data);
        let media = match parsed {
            Ok(ParsedPlaylist::Media(m)) => m,
            Ok(ParsedPlaylist::Master(_)) => {
                self.emit_error(WalkError::WrongPlaylistKind {
                    url: variant_uri,
                    expected: "media",
                })
                .await;
                return;
            }
            Err(err) => {
                self.emit_error(err).await;
                return;
            }
        };
        self.process_media_update(variant_uri, media).await;
    }

    async fn process_media_update(&mut self, uri: String, mut current: MediaPlaylist) {
        current.uri = uri.clone();
        let previous = self.media.get(&uri).and_then(|s| s.current.clone());
        let unchanged = previous
            .as_ref()
            .map(|p| differ::media_unchanged(p, &current))
            .unwrap_or(false);

        if let Some(prev) = &previous {
            current.inherit_from(prev);
        }

        for seg in current.pending_segments() {
            self.spawn_fetch(FetchTarget {
                url: seg.uri.clone(),
                role: FetchRole::Segment {
                    playlist_uri: uri.clone(),
                    identity: seg.identity(),
                },
            });
            if let Some(key) = &seg.key
                && key.data.is_none()
            {
                self.spawn_fetch(FetchTarget {
                    url: key.uri.clone(),
                    role: FetchRole::Key {
                        playlist_uri: Some(uri.clone()),
                    },
                });
            }
            if let Some(map) = &seg.map
                && map.data.is_none()
            {
                self.spawn_fetch(FetchTarget {
                    url: map.uri.clone(),
                    role: FetchRole::Map {
                        playlist_uri: uri.clone(),
                    },
                });
            }
        }

        let terminal = current.is_terminal();
        self.media.insert(uri.clone(), MediaState { current: Some(current) });
        self.try_emit_media(&uri).await;

        if !terminal {
            let policy = self.config.refresh_policy();
            let target_duration = self
                .media
                .get(&uri)
                .and_then(|s| s.current.as_ref())
                .map(|p| p.target_duration)
                .unwrap_or(1.0);
            let delay = if unchanged {
                policy.media_unchanged_refresh_delay(target_duration)
            } else {
                policy.media_live_refresh_delay(target_duration)
            };
            self.schedule_refresh(
                FetchTarget {
                    url: uri.clone(),
                    role: FetchRole::Media { variant_uri: uri },
                },
                delay,
            );
        }
    }

    async fn try_emit_media(&mut self, uri: &str) {
        let Some(state) = self.media.get(uri) else { return };
        let Some(playlist) = &state.current else { return };
        self.emit(WalkData::Media(playlist.clone())).await;

        let candidates = playlist.segments.clone();
        let admitted = self.gate.admit(uri, &candidates);
        for seg in admitted {
            self.emit(WalkData::Segment(seg)).await;
        }
    }

    async fn handle_segment_fetched(&mut self, playlist_uri: String, identity: String, resource: LoadedResource) {
        let raw_response = self.config.options.raw_response;
        if let Some(state) = self.media.get_mut(&playlist_uri)
            && let Some(playlist) = state.current.as_mut()
        {
            for seg in playlist.segments.iter_mut() {
                if seg.identity() == identity {
                    let mut updated = (**seg).clone();
                    updated.data = Some(apply_response_mode(
                        resource.data.clone(),
                        seg.byte_range,
                        raw_response,
                    ));
                    updated.mime_type = resource.mime_type.clone();
                    *seg = Arc::new(updated);
                }
            }
        }
        self.try_emit_media(&playlist_uri).await;
    }

    async fn handle_key_fetched(&mut self, playlist_uri: Option<String>, url: String, resource: LoadedResource) {
        match playlist_uri {
            None => {
                if let Some(master) = &mut self.master {
                    for key in master.session_keys.iter_mut() {
                        if key.uri == url {
                            *key = Arc::new(KeyRef {
                                uri: key.uri.clone(),
                                method: key.method.clone(),
                                iv: key.iv.clone(),
                                data: Some(resource.data.clone()),
                            });
                        }
                    }
                }
                self.try_emit_master().await;
            }
            Some(playlist_uri) => {
                if let Some(state) = self.media.get_mut(&playlist_uri)
                    && let Some(playlist) = state.current.as_mut()
                {
                    let mut resolved: Option<Arc<KeyRef>> = None;
                    for seg in playlist.segments.iter_mut() {
                        if let Some(k) = &seg.key
                            && k.uri == url
                        {
                            let shared = resolved.get_or_insert_with(|| {
                                Arc::new(KeyRef {
                                    uri: k.uri.clone(),
                                    method: k.method.clone(),
                                    iv: k.iv.clone(),
                                    data: Some(resource.data.clone()),
                                })
                            });
                            let mut updated = (**seg).clone();
                            updated.key = Some(Arc::clone(shared));
                            *seg = Arc::new(updated);
                        }
                    }
                }
                self.try_emit_media(&playlist_uri).await;
            }
        }
    }

    async fn handle_map_fetched(&mut self, playlist_uri: String, url: String, resource: LoadedResource) {
        let raw_response = self.config.options.raw_response;
        if let Some(state) = self.media.get_mut(&playlist_uri)
            && let Some(playlist) = state.current.as_mut()
        {
            let mut resolved: Option<Arc<MapRef>> = None;
            for seg in playlist.segments.iter_mut() {
                if let Some(m) = &seg.map
                    && m.uri == url
                {
                    let shared = resolved.get_or_insert_with(|| {
                        Arc::new(MapRef {
                            uri: m.uri.clone(),
                            byte_range: m.byte_range,
                            data: Some(apply_response_mode(resource.data.clone(), m.byte_range, raw_response)),
                            mime_type: resource.mime_type.clone(),
                        })
                    });
                    let mut updated = (**seg).clone();
                    updated.map = Some(Arc::clone(shared));
                    *seg = Arc::new(updated);
                }
            }
        }
        self.try_emit_media(&playlist_uri).await;
    }

    async fn handle_session_data_fetched(&mut self, index: usize, resource: LoadedResource) {
        if let Some(master) = &mut self.master
            && let Some(entry) = master.session_data.get_mut(index)
        {
            match serde_json::from_slice(&resource.data) {
                Ok(value) => entry.data = Some(value),
                Err(err) => {
                    error!(index, error = %err, "session data URI did not contain valid JSON");
                }
            }
        }
        self.try_emit_master().await;
    }
}
