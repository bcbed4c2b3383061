//! Media detector
//!
//! Finds `<video>`, `<audio>`, embedded players in iframes and custom
//! player widgets, tracks their playback state from media events and
//! exposes transport controls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};
use url::Url;

use crate::core::config::MediaConfig;
use crate::core::epoch_millis;
use crate::detectors::DetectorState;
use crate::dom::{Document, DomEvent, EventFilter, EventKind, NodeId, Page, Subscription};
use crate::index::{DetectorKind, ElementIdentity, MediaData, MediaKind, PlaybackState, SharedIndex};
use crate::serializer::{PageRecord, PageValue};

/// Hosts whose iframes embed a media player
const MEDIA_IFRAME_HOSTS: &[&str] = &[
    "youtube.com",
    "youtube-nocookie.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
    "soundcloud.com",
    "spotify.com",
    "wistia.com",
    "wistia.net",
    "jwplayer.com",
    "brightcove.net",
    "loom.com",
];

/// Class/id substrings used by common player widgets
const CUSTOM_PLAYER_HINTS: &[&str] = &[
    "player",
    "video-js",
    "jwplayer",
    "plyr",
    "mejs",
    "vjs",
    "flowplayer",
    "media-player",
    "html5-video",
];

const CONTROL_HINTS: &[&str] = &["play", "pause", "mute", "volume", "fullscreen", "seek", "progress"];

/// Transport command for a tracked media element
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaCommand {
    Play,
    Pause,
    Seek(f64),
    SetVolume(f64),
}

impl MediaCommand {
    /// Parse a wire command name plus its optional numeric value
    pub fn parse(command: &str, value: Option<f64>) -> Option<Self> {
        match command.to_ascii_lowercase().as_str() {
            "play" => Some(MediaCommand::Play),
            "pause" => Some(MediaCommand::Pause),
            "seek" => value.map(MediaCommand::Seek),
            "volume" | "set_volume" | "setvolume" => value.map(MediaCommand::SetVolume),
            _ => None,
        }
    }
}

/// Playback state of one media element or player
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    pub identity: ElementIdentity,
    pub node: NodeId,
    pub kind: MediaKind,
    /// The `<video>`/`<audio>` element driving playback, if any
    pub media_node: Option<NodeId>,
    pub state: PlaybackState,
    pub duration: Option<f64>,
    pub current_time: f64,
    pub volume: f64,
    pub muted: bool,
    pub playback_rate: f64,
    pub is_custom_player: bool,
    pub native_controls: bool,
    pub controls: Vec<NodeId>,
    pub sources: Vec<String>,
    pub buffered: Vec<(f64, f64)>,
    pub text_tracks: Vec<String>,
    pub width: f64,
    pub height: f64,
    pub last_event: Option<EventKind>,
    pub updated_at: i64,
}

fn hint_text(doc: &Document, node: NodeId, attrs: &[&str]) -> String {
    attrs
        .iter()
        .filter_map(|a| doc.attr(node, a))
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn is_media_tag(doc: &Document, node: NodeId) -> bool {
    matches!(doc.tag_name(node), Some("video" | "audio"))
}

/// Whether an iframe `src` points at a known media provider
pub fn is_media_iframe(doc: &Document, node: NodeId) -> bool {
    if doc.tag_name(node) != Some("iframe") {
        return false;
    }
    let Some(src) = doc.attr(node, "src") else {
        return false;
    };
    let url = Url::parse(src).or_else(|_| Url::parse(doc.location()).and_then(|base| base.join(src)));
    let Ok(url) = url else {
        return false;
    };
    url.host_str().is_some_and(|host| {
        MEDIA_IFRAME_HOSTS
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
    })
}

/// Player controls below `node`
pub fn control_elements(doc: &Document, node: NodeId) -> Vec<NodeId> {
    doc.descendant_elements(node)
        .into_iter()
        .filter(|d| {
            let is_control = matches!(doc.tag_name(*d), Some("button"))
                || matches!(doc.attr(*d, "role"), Some("button" | "slider"))
                || doc.element(*d).and_then(|e| e.input_type()).as_deref() == Some("range");
            is_control && {
                let hints = hint_text(doc, *d, &["class", "id", "aria-label", "title"]);
                CONTROL_HINTS.iter().any(|h| hints.contains(h))
            }
        })
        .collect()
}

/// A widget named like a player that wraps media or play/pause controls
pub fn is_custom_player(doc: &Document, node: NodeId) -> bool {
    let Some(tag) = doc.tag_name(node) else {
        return false;
    };
    if matches!(tag, "video" | "audio" | "iframe" | "html" | "body") {
        return false;
    }
    let names = hint_text(doc, node, &["class", "id"]);
    if !CUSTOM_PLAYER_HINTS.iter().any(|h| names.contains(h)) {
        return false;
    }
    let has_media = doc
        .descendant_elements(node)
        .into_iter()
        .any(|d| is_media_tag(doc, d));
    has_media
        || control_elements(doc, node).into_iter().any(|c| {
            let hints = hint_text(doc, c, &["class", "id", "aria-label", "title"]);
            hints.contains("play") || hints.contains("pause")
        })
}

pub fn classify(doc: &Document, node: NodeId) -> Option<MediaKind> {
    match doc.tag_name(node)? {
        "video" => Some(MediaKind::Video),
        "audio" => Some(MediaKind::Audio),
        "iframe" => is_media_iframe(doc, node).then_some(MediaKind::Iframe),
        _ => is_custom_player(doc, node).then_some(MediaKind::Custom),
    }
}

impl MediaRecord {
    pub fn compute(doc: &Document, node: NodeId) -> Option<Self> {
        let kind = classify(doc, node)?;
        let media_node = match kind {
            MediaKind::Video | MediaKind::Audio => Some(node),
            MediaKind::Custom => doc
                .descendant_elements(node)
                .into_iter()
                .find(|d| is_media_tag(doc, *d)),
            MediaKind::Iframe => None,
        };
        let media = media_node.and_then(|m| doc.media(m)).cloned();
        let state = match &media {
            None => PlaybackState::Unknown,
            Some(m) if m.ended => PlaybackState::Ended,
            Some(m) if !m.paused && m.ready_state < 3 => PlaybackState::Loading,
            Some(m) if !m.paused => PlaybackState::Playing,
            Some(_) => PlaybackState::Paused,
        };

        let mut sources = Vec::new();
        let mut text_tracks = Vec::new();
        if let Some(src) = doc.attr(node, "src") {
            sources.push(src.to_string());
        }
        if let Some(m) = media_node {
            if m != node {
                sources.extend(doc.attr(m, "src").map(str::to_string));
            }
            for child in doc.element_children(m) {
                match doc.tag_name(child) {
                    Some("source") => sources.extend(doc.attr(child, "src").map(str::to_string)),
                    Some("track") => text_tracks.push(format!(
                        "{}:{}:{}",
                        doc.attr(child, "kind").unwrap_or("subtitles"),
                        doc.attr(child, "srclang").unwrap_or_default(),
                        doc.attr(child, "label").unwrap_or_default()
                    )),
                    _ => {}
                }
            }
        }

        let rect = doc.rect(node);
        Some(Self {
            identity: ElementIdentity::compute(doc, node),
            node,
            kind,
            media_node,
            state,
            duration: media.as_ref().map(|m| m.duration).filter(|d| d.is_finite()),
            current_time: media.as_ref().map_or(0.0, |m| m.current_time),
            volume: media.as_ref().map_or(1.0, |m| m.volume),
            muted: media.as_ref().is_some_and(|m| m.muted),
            playback_rate: media.as_ref().map_or(1.0, |m| m.playback_rate),
            is_custom_player: kind == MediaKind::Custom,
            native_controls: media_node.is_some_and(|m| doc.attr(m, "controls").is_some()),
            controls: if kind == MediaKind::Custom {
                control_elements(doc, node)
            } else {
                Vec::new()
            },
            sources,
            buffered: media.map(|m| m.buffered).unwrap_or_default(),
            text_tracks,
            width: rect.width,
            height: rect.height,
            last_event: None,
            updated_at: epoch_millis(),
        })
    }

    pub fn to_data(&self, doc: &Document) -> MediaData {
        let mut controls: Vec<String> = self
            .controls
            .iter()
            .map(|c| ElementIdentity::compute(doc, *c).to_string())
            .collect();
        if self.native_controls {
            controls.insert(0, "native".to_string());
        }
        MediaData {
            kind: self.kind,
            state: self.state,
            duration: self.duration,
            current_time: self.current_time,
            volume: self.volume,
            muted: self.muted,
            playback_rate: self.playback_rate,
            is_custom_player: self.is_custom_player,
            controls,
            sources: self.sources.clone(),
            buffered: self.buffered.clone(),
            text_tracks: self.text_tracks.clone(),
            width: self.width,
            height: self.height,
        }
    }

    /// Node that receives media events for this record
    fn event_target(&self) -> NodeId {
        self.media_node.unwrap_or(self.node)
    }
}

impl PageRecord for MediaRecord {
    fn identity(&self) -> &ElementIdentity {
        &self.identity
    }

    fn to_page_value(&self) -> PageValue {
        let wire = |v: serde_json::Value| PageValue::from(v);
        PageValue::map([
            ("identity", PageValue::string(self.identity.as_str())),
            ("element", PageValue::Node(self.node)),
            ("mediaElement", self.media_node.map_or(PageValue::Null, PageValue::Node)),
            ("kind", wire(serde_json::to_value(self.kind).unwrap_or_default())),
            ("state", wire(serde_json::to_value(self.state).unwrap_or_default())),
            ("duration", self.duration.map_or(PageValue::Null, PageValue::Number)),
            ("currentTime", self.current_time.into()),
            ("volume", self.volume.into()),
            ("muted", self.muted.into()),
            ("playbackRate", self.playback_rate.into()),
            ("isCustomPlayer", self.is_custom_player.into()),
            ("nativeControls", self.native_controls.into()),
            (
                "controls",
                PageValue::List(self.controls.iter().map(|c| PageValue::Node(*c)).collect()),
            ),
            (
                "sources",
                PageValue::List(self.sources.iter().map(|s| PageValue::string(s.as_str())).collect()),
            ),
            (
                "buffered",
                PageValue::List(
                    self.buffered
                        .iter()
                        .map(|(s, e)| PageValue::List(vec![(*s).into(), (*e).into()]))
                        .collect(),
                ),
            ),
            (
                "textTracks",
                PageValue::List(self.text_tracks.iter().map(|t| PageValue::string(t.as_str())).collect()),
            ),
            ("width", self.width.into()),
            ("height", self.height.into()),
            (
                "lastEvent",
                PageValue::opt_string(self.last_event.map(EventKind::name)),
            ),
        ])
    }
}

#[derive(Default)]
struct MediaShared {
    records: HashMap<NodeId, MediaRecord>,
    /// Per-element listeners, keyed by event target
    subscriptions: HashMap<NodeId, Subscription>,
    /// Event target -> record nodes it drives, in document order
    targets: HashMap<NodeId, Vec<NodeId>>,
    sender: Option<UnboundedSender<DomEvent>>,
}

pub struct MediaDetector {
    page: Page,
    index: SharedIndex,
    config: MediaConfig,
    shared: Arc<Mutex<MediaShared>>,
    state: DetectorState,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for MediaDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaDetector")
            .field("state", &self.state)
            .field("records", &self.shared.lock().records.len())
            .finish()
    }
}

impl MediaDetector {
    pub fn new(page: Page, index: SharedIndex, config: MediaConfig) -> Self {
        Self {
            page,
            index,
            config,
            shared: Arc::new(Mutex::new(MediaShared::default())),
            state: DetectorState::Idle,
            task: None,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Scan once, subscribe to each element's media events and start the
    /// rescan task. Must be called inside a tokio runtime.
    pub fn start_detecting(&mut self) {
        if self.state == DetectorState::Detecting {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().sender = Some(tx);
        rescan(&self.page, &self.index, &self.shared);

        let rescan_every = Duration::from_millis(self.config.rescan_interval_ms.max(1));
        let page = self.page.clone();
        let index = self.index.clone();
        let shared = self.shared.clone();
        self.task = Some(tokio::spawn(run(page, index, shared, rx, rescan_every)));
        self.state = DetectorState::Detecting;
        info!(records = self.shared.lock().records.len(), "media detector started");
    }

    /// Abort the task, drop every subscription, clear records and release
    /// index entries
    pub fn stop_detecting(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let records = {
            let mut shared = self.shared.lock();
            shared.subscriptions.clear();
            shared.targets.clear();
            shared.sender = None;
            std::mem::take(&mut shared.records)
        };
        if !records.is_empty() {
            let mut index = self.index.lock();
            for record in records.values() {
                index.release(&record.identity, DetectorKind::Media);
            }
        }
        if self.state == DetectorState::Detecting {
            info!("media detector stopped");
        }
        self.state = DetectorState::Idle;
    }

    pub fn records(&self) -> Vec<MediaRecord> {
        let mut records: Vec<MediaRecord> = self.shared.lock().records.values().cloned().collect();
        records.sort_by_key(|r| r.node);
        records
    }

    pub fn record(&self, identity: &ElementIdentity) -> Option<MediaRecord> {
        self.shared
            .lock()
            .records
            .values()
            .find(|r| &r.identity == identity)
            .cloned()
    }

    /// Record whose element is, or contains, `node`
    pub fn record_for_node(&self, node: NodeId) -> Option<MediaRecord> {
        let shared = self.shared.lock();
        shared.records.get(&node).cloned().or_else(|| {
            shared
                .targets
                .get(&node)
                .and_then(|owners| owners.first())
                .and_then(|owner| shared.records.get(owner))
                .cloned()
        })
    }

    pub fn play(&self, identity: &ElementIdentity) -> bool {
        self.control(identity, MediaCommand::Play)
    }

    pub fn pause(&self, identity: &ElementIdentity) -> bool {
        self.control(identity, MediaCommand::Pause)
    }

    pub fn seek(&self, identity: &ElementIdentity, time: f64) -> bool {
        self.control(identity, MediaCommand::Seek(time))
    }

    pub fn set_volume(&self, identity: &ElementIdentity, volume: f64) -> bool {
        self.control(identity, MediaCommand::SetVolume(volume))
    }

    /// Apply a transport command; false when the element cannot do it
    pub fn control(&self, identity: &ElementIdentity, command: MediaCommand) -> bool {
        let Some(record) = self.record(identity) else {
            debug!(%identity, "media control on untracked element");
            return false;
        };
        let effects = {
            let mut doc = self.page.write();
            apply_command(&mut doc, &record, command)
        };
        let Some(effects) = effects else {
            debug!(%identity, ?command, "media element lacks capability");
            return false;
        };
        for (kind, target) in &effects {
            self.page.dispatch(*kind, *target);
        }
        let doc = self.page.read();
        if let Some(mut updated) = MediaRecord::compute(&doc, record.node) {
            updated.last_event = effects.last().map(|(k, _)| *k);
            commit(&doc, &self.index, &self.shared, vec![updated]);
        }
        true
    }
}

impl Drop for MediaDetector {
    fn drop(&mut self) {
        self.stop_detecting();
    }
}

/// Mutate playback state, returning the events to announce
fn apply_command(
    doc: &mut Document,
    record: &MediaRecord,
    command: MediaCommand,
) -> Option<Vec<(EventKind, NodeId)>> {
    if let Some(target) = record.media_node.filter(|m| doc.media(*m).is_some()) {
        let media = doc.media_mut(target)?;
        let events = match command {
            MediaCommand::Play => {
                if media.ended || (media.duration.is_finite() && media.current_time >= media.duration) {
                    media.current_time = 0.0;
                }
                media.paused = false;
                media.ended = false;
                vec![EventKind::Play]
            }
            MediaCommand::Pause => {
                media.paused = true;
                vec![EventKind::Pause]
            }
            MediaCommand::Seek(time) => {
                if !time.is_finite() || !media.duration.is_finite() {
                    return None;
                }
                media.current_time = time.clamp(0.0, media.duration);
                media.ended = false;
                vec![EventKind::Seeked, EventKind::TimeUpdate]
            }
            MediaCommand::SetVolume(volume) => {
                if !volume.is_finite() {
                    return None;
                }
                media.volume = volume.clamp(0.0, 1.0);
                vec![EventKind::VolumeChange]
            }
        };
        return Some(events.into_iter().map(|k| (k, target)).collect());
    }

    // Widgets without a media element can only be driven through their
    // own play/pause buttons
    let wanted = match command {
        MediaCommand::Play => "play",
        MediaCommand::Pause => "pause",
        _ => return None,
    };
    let control = record.controls.iter().copied().find(|c| {
        hint_text(doc, *c, &["class", "id", "aria-label", "title"]).contains(wanted)
    })?;
    Some(vec![(EventKind::Click, control)])
}

/// Re-classify the page, reconcile records and per-element subscriptions
fn rescan(page: &Page, index: &SharedIndex, shared: &Arc<Mutex<MediaShared>>) {
    let doc = page.read();
    let mut records = Vec::new();
    let mut custom_roots: Vec<NodeId> = Vec::new();
    for node in doc.elements() {
        let Some(record) = MediaRecord::compute(&doc, node) else {
            continue;
        };
        if record.kind == MediaKind::Custom {
            // Widgets nested in a player belong to that player
            if custom_roots.iter().any(|r| doc.is_descendant_of(node, *r)) {
                continue;
            }
            custom_roots.push(node);
        }
        records.push(record);
    }
    let live: HashSet<NodeId> = records.iter().map(|r| r.node).collect();

    let gone: Vec<MediaRecord> = {
        let mut shared = shared.lock();
        let gone_nodes: Vec<NodeId> = shared
            .records
            .keys()
            .filter(|n| !live.contains(n))
            .copied()
            .collect();
        gone_nodes
            .into_iter()
            .filter_map(|n| shared.records.remove(&n))
            .collect()
    };
    if !gone.is_empty() {
        let mut index = index.lock();
        for record in &gone {
            index.release(&record.identity, DetectorKind::Media);
        }
        debug!(released = gone.len(), "media elements vanished");
    }

    // A player wrapping a <video> shares its event target with the video
    let mut targets: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for record in &records {
        targets.entry(record.event_target()).or_default().push(record.node);
    }

    {
        let mut shared = shared.lock();
        // Targets no record listens on any more, including ones a record
        // moved away from
        shared.subscriptions.retain(|target, _| targets.contains_key(target));
        if let Some(sender) = shared.sender.clone() {
            for target in targets.keys() {
                if !shared.subscriptions.contains_key(target) {
                    let subscription = page.events().subscribe_into(
                        EventFilter::kinds(EventKind::MEDIA).on(*target),
                        sender.clone(),
                    );
                    shared.subscriptions.insert(*target, subscription);
                }
            }
        }
        shared.targets = targets;
        // Keep the last event seen for records refreshed by the rescan
        for record in &mut records {
            if let Some(previous) = shared.records.get(&record.node) {
                record.last_event = previous.last_event;
            }
        }
    }
    commit(&doc, index, shared, records);
}

fn commit(
    doc: &Document,
    index: &SharedIndex,
    shared: &Arc<Mutex<MediaShared>>,
    records: Vec<MediaRecord>,
) {
    if records.is_empty() {
        return;
    }
    let data: Vec<(ElementIdentity, MediaData, Option<ElementIdentity>)> = {
        let mut shared = shared.lock();
        records
            .into_iter()
            .map(|record| {
                let previous = shared
                    .records
                    .get(&record.node)
                    .map(|p| p.identity.clone())
                    .filter(|p| *p != record.identity);
                let data = record.to_data(doc);
                let identity = record.identity.clone();
                shared.records.insert(record.node, record);
                (identity, data, previous)
            })
            .collect()
    };
    let mut index = index.lock();
    for (identity, data, previous) in data {
        if let Some(previous) = previous {
            index.release(&previous, DetectorKind::Media);
        }
        index.track(&identity, DetectorKind::Media);
        index.attach_media_data(&identity, data);
    }
}

async fn run(
    page: Page,
    index: SharedIndex,
    shared: Arc<Mutex<MediaShared>>,
    mut events: UnboundedReceiver<DomEvent>,
    rescan_every: Duration,
) {
    let mut ticker = time::interval_at(Instant::now() + rescan_every, rescan_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => on_media_event(&page, &index, &shared, event),
                None => break,
            },
            _ = ticker.tick() => rescan(&page, &index, &shared),
        }
    }
}

fn on_media_event(page: &Page, index: &SharedIndex, shared: &Arc<Mutex<MediaShared>>, event: DomEvent) {
    let owners = shared.lock().targets.get(&event.target).cloned().unwrap_or_default();
    if owners.is_empty() {
        return;
    }
    let doc = page.read();
    let records: Vec<MediaRecord> = owners
        .into_iter()
        .filter_map(|owner| MediaRecord::compute(&doc, owner))
        .map(|mut record| {
            record.last_event = Some(event.kind);
            debug!(identity = %record.identity, event = event.kind.name(), "media event");
            record
        })
        .collect();
    commit(&doc, index, shared, records);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Rect;
    use crate::index::ElementIndex;

    struct Fixture {
        page: Page,
        video: NodeId,
        iframe: NodeId,
        player: NodeId,
        plain_iframe: NodeId,
    }

    fn fixture() -> Fixture {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let video = doc.append_element(body, "video", &[("id", "clip"), ("controls", "")]);
        doc.append_element(video, "source", &[("src", "clip.mp4")]);
        doc.append_element(
            video,
            "track",
            &[("kind", "captions"), ("srclang", "en"), ("label", "English")],
        );
        doc.set_rect(video, Rect::new(0.0, 0.0, 640.0, 360.0));
        let iframe = doc.append_element(
            body,
            "iframe",
            &[("src", "https://www.youtube.com/embed/abc")],
        );
        doc.set_rect(iframe, Rect::new(0.0, 400.0, 640.0, 360.0));
        let plain_iframe = doc.append_element(body, "iframe", &[("src", "https://example.com/")]);
        let player = doc.append_element(body, "div", &[("class", "audio-player")]);
        doc.set_rect(player, Rect::new(0.0, 800.0, 300.0, 50.0));
        let bar = doc.append_element(player, "div", &[("class", "player-controls")]);
        doc.append_element(bar, "button", &[("class", "play-btn")]);
        doc.append_element(bar, "button", &[("class", "pause-btn")]);
        Fixture {
            page: Page::new(doc),
            video,
            iframe,
            player,
            plain_iframe,
        }
    }

    fn detector(page: &Page) -> (MediaDetector, SharedIndex) {
        let index = ElementIndex::new(Default::default()).shared();
        let config = MediaConfig {
            rescan_interval_ms: 1000,
        };
        (MediaDetector::new(page.clone(), index.clone(), config), index)
    }

    #[test]
    fn test_classification() {
        let f = fixture();
        let doc = f.page.read();
        assert_eq!(classify(&doc, f.video), Some(MediaKind::Video));
        assert_eq!(classify(&doc, f.iframe), Some(MediaKind::Iframe));
        assert_eq!(classify(&doc, f.plain_iframe), None);
        assert_eq!(classify(&doc, f.player), Some(MediaKind::Custom));

        let record = MediaRecord::compute(&doc, f.video).unwrap();
        assert_eq!(record.state, PlaybackState::Paused);
        assert_eq!(record.duration, None);
        assert_eq!(record.sources, vec!["clip.mp4".to_string()]);
        assert_eq!(record.text_tracks, vec!["captions:en:English".to_string()]);
        assert!(record.native_controls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_update_records() {
        let f = fixture();
        let (mut detector, index) = detector(&f.page);
        detector.start_detecting();
        // video, iframe, outer player (the nested control bar is folded in)
        assert_eq!(detector.records().len(), 3);
        assert_eq!(f.page.events().listener_count(), 3);

        f.page.write().media_mut(f.video).unwrap().ready_state = 4;
        f.page.write().media_mut(f.video).unwrap().paused = false;
        f.page.dispatch(EventKind::Play, f.video);
        time::sleep(Duration::from_millis(1)).await;

        let identity = ElementIdentity::compute(&f.page.read(), f.video);
        let record = detector.record(&identity).unwrap();
        assert_eq!(record.state, PlaybackState::Playing);
        assert_eq!(record.last_event, Some(EventKind::Play));
        let data = index.lock().get(&identity).unwrap().media_data.clone().unwrap();
        assert_eq!(data.state, PlaybackState::Playing);

        detector.stop_detecting();
        assert_eq!(f.page.events().listener_count(), 0);
        assert!(index.lock().get(&identity).unwrap().media_data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_controls() {
        let f = fixture();
        let (mut detector, _index) = detector(&f.page);
        detector.start_detecting();
        let (video, iframe, player) = {
            let doc = f.page.read();
            (
                ElementIdentity::compute(&doc, f.video),
                ElementIdentity::compute(&doc, f.iframe),
                ElementIdentity::compute(&doc, f.player),
            )
        };

        assert!(!detector.seek(&video, 10.0), "duration unknown");
        f.page.write().media_mut(f.video).unwrap().duration = 60.0;
        assert!(detector.seek(&video, 90.0));
        assert_eq!(detector.record(&video).unwrap().current_time, 60.0);
        assert!(detector.set_volume(&video, 0.25));
        assert!(detector.play(&video));
        assert!(!f.page.read().media(f.video).unwrap().paused);
        assert!(detector.pause(&video));

        assert!(!detector.play(&iframe));
        assert!(!detector.set_volume(&iframe, 0.5));

        let (_sub, mut clicks) = f
            .page
            .events()
            .subscribe(EventFilter::kinds([EventKind::Click]));
        assert!(detector.play(&player));
        assert!(clicks.try_recv().is_ok());
        assert!(!detector.seek(&player, 1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrapping_player_follows_its_video() {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let player = doc.append_element(body, "div", &[("class", "video-js")]);
        doc.set_rect(player, Rect::new(0.0, 0.0, 640.0, 360.0));
        let video = doc.append_element(player, "video", &[("src", "movie.mp4")]);
        doc.set_rect(video, Rect::new(8.0, 0.0, 624.0, 352.0));
        let page = Page::new(doc);

        let (mut detector, _index) = detector(&page);
        detector.start_detecting();
        assert_eq!(detector.records().len(), 2);
        // Both records listen through the one video subscription
        assert_eq!(page.events().listener_count(), 1);

        {
            let mut doc = page.write();
            let media = doc.media_mut(video).unwrap();
            media.ready_state = 4;
            media.paused = false;
        }
        page.dispatch(EventKind::Play, video);
        time::sleep(Duration::from_millis(5)).await;

        for record in detector.records() {
            assert_eq!(record.state, PlaybackState::Playing, "{:?}", record.kind);
            assert_eq!(record.last_event, Some(EventKind::Play));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_moves_with_event_target() {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let player = doc.append_element(body, "div", &[("class", "audio-player")]);
        doc.append_element(player, "button", &[("class", "play-btn")]);
        let page = Page::new(doc);

        let (mut detector, _index) = detector(&page);
        detector.start_detecting();
        assert_eq!(detector.records().len(), 1);
        assert_eq!(page.events().listener_count(), 1);

        // The player now drives a real element; its own listener goes away
        let audio = page.write().append_element(player, "audio", &[("src", "a.mp3")]);
        time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(detector.records().len(), 2);
        assert_eq!(page.events().listener_count(), 1);
        let identity = ElementIdentity::compute(&page.read(), player);
        assert_eq!(detector.record(&identity).unwrap().media_node, Some(audio));

        page.write().remove(player);
        time::sleep(Duration::from_millis(1000)).await;
        assert!(detector.records().is_empty());
        assert_eq!(page.events().listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescan_finds_new_elements() {
        let f = fixture();
        let (mut detector, _index) = detector(&f.page);
        detector.start_detecting();
        let body = f.page.read().body().unwrap();
        f.page.write().append_element(body, "audio", &[("src", "a.mp3")]);
        time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(detector.records().len(), 4);
    }
}
