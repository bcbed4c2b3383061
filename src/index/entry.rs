//! Index entry types
//!
//! An [`IndexEntry`] is the cached semantic description of one element.
//! Detectors enrich entries with plain-data sub-records; they never keep a
//! competing copy.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::{PilotError, Rect};
use crate::dom::NodeId;
use crate::index::identity::ElementIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    Css,
    #[serde(rename = "xpath")]
    XPath,
    Text,
}

impl SelectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectorKind::Css => "css",
            SelectorKind::XPath => "xpath",
            SelectorKind::Text => "text",
        }
    }
}

/// One way of locating the element again; lower priority ranks first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorCandidate {
    pub kind: SelectorKind,
    pub value: String,
    pub priority: u8,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accessibility {
    pub label: Option<String>,
    pub description: Option<String>,
    pub expanded: Option<bool>,
    pub checked: Option<bool>,
    pub disabled: bool,
    pub required: bool,
    pub hidden: bool,
    pub level: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub priority: u8,
    pub access_count: u64,
    /// Epoch milliseconds; 0 when never accessed
    pub last_access: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Vertical,
    Horizontal,
    Both,
}

/// Scroll state attached by the scroll detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollData {
    pub scroll_top: f64,
    pub scroll_left: f64,
    pub max_scroll_top: f64,
    pub max_scroll_left: f64,
    pub direction: ScrollDirection,
    pub scrollable_parent: Option<ElementIdentity>,
    pub sticky_descendants: Vec<ElementIdentity>,
    pub progress_x: f64,
    pub progress_y: f64,
    pub at_top: bool,
    pub at_bottom: bool,
    pub at_left: bool,
    pub at_right: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Iframe,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Ended,
    Loading,
    Unknown,
}

/// Playback state attached by the media detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaData {
    pub kind: MediaKind,
    pub state: PlaybackState,
    pub duration: Option<f64>,
    pub current_time: f64,
    pub volume: f64,
    pub muted: bool,
    pub playback_rate: f64,
    pub is_custom_player: bool,
    pub controls: Vec<String>,
    pub sources: Vec<String>,
    pub buffered: Vec<(f64, f64)>,
    pub text_tracks: Vec<String>,
    pub width: f64,
    pub height: f64,
}

/// Why an entry is a placeholder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryError {
    pub error_type: String,
    pub message: String,
}

/// Cached description of one element
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub identity: ElementIdentity,
    pub tag_name: String,
    pub text: String,
    pub role: String,
    pub confidence: f64,
    pub position: Rect,
    pub visible: bool,
    pub interactive: bool,
    pub selectors: Vec<SelectorCandidate>,
    pub attributes: BTreeMap<String, String>,
    pub accessibility: Accessibility,
    pub usage: Usage,
    pub scroll_data: Option<ScrollData>,
    pub media_data: Option<MediaData>,
    /// Detectors currently holding this entry
    pub tracked_by: BTreeSet<String>,
    pub error: Option<EntryError>,
    /// Node the entry was extracted from; never serialized
    pub(crate) node: Option<NodeId>,
}

impl IndexEntry {
    /// Bare entry carrying only an identity
    pub fn minimal(identity: ElementIdentity) -> Self {
        Self {
            tag_name: identity.tag().to_string(),
            identity,
            text: String::new(),
            role: "generic".to_string(),
            confidence: 0.5,
            position: Rect::default(),
            visible: false,
            interactive: false,
            selectors: Vec::new(),
            attributes: BTreeMap::new(),
            accessibility: Accessibility::default(),
            usage: Usage::default(),
            scroll_data: None,
            media_data: None,
            tracked_by: BTreeSet::new(),
            error: None,
            node: None,
        }
    }

    /// Entry standing in for an element whose extraction failed
    pub fn placeholder(identity: ElementIdentity, node: NodeId, err: &PilotError) -> Self {
        Self {
            error: Some(EntryError {
                error_type: err.kind().to_string(),
                message: err.to_string(),
            }),
            node: Some(node),
            ..Self::minimal(identity)
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_tracked(&self) -> bool {
        !self.tracked_by.is_empty()
    }

    /// Best available human-facing name
    pub fn label(&self) -> &str {
        self.accessibility
            .label
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.text)
    }

    /// Record an access at `now_ms`
    pub fn touch(&mut self, now_ms: i64) {
        self.usage.access_count += 1;
        self.usage.last_access = now_ms;
    }
}

/// Filter for [`crate::index::ElementIndex::get_all`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryFilter {
    #[serde(alias = "visibleOnly")]
    pub visible_only: bool,
    #[serde(alias = "interactiveOnly")]
    pub interactive_only: bool,
    pub role: Option<String>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
}

impl EntryFilter {
    pub fn accepts(&self, entry: &IndexEntry) -> bool {
        (!self.visible_only || entry.visible)
            && (!self.interactive_only || entry.interactive)
            && self.role.as_deref().map_or(true, |r| entry.role == r)
            && self
                .tag
                .as_deref()
                .map_or(true, |t| entry.tag_name.eq_ignore_ascii_case(t))
    }
}
