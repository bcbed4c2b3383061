//! Outbound serializer
//!
//! The only legal path for index and detector data to leave the page. It
//! copies allow-listed fields, clamps strings, rounds numbers, caps lists
//! and then validates the result so no live reference can slip through.
//! A failing element becomes a typed error placeholder instead of failing
//! its batch.

pub mod value;

use serde_json::{json, Value};
use tracing::warn;

use crate::core::config::SerializerConfig;
use crate::core::{clamp_chars, round2, Rect, Result};
use crate::dom::{Document, NodeId};
use crate::index::{ElementIdentity, IndexEntry, MediaData, ScrollData};

pub use value::{validate_serialization, PageValue};

/// Detector state that may reference live nodes
pub trait PageRecord {
    fn identity(&self) -> &ElementIdentity;

    /// Record contents; node handles may appear as [`PageValue::Node`]
    fn to_page_value(&self) -> PageValue;
}

#[derive(Debug, Clone, Default)]
pub struct Serializer {
    config: SerializerConfig,
}

impl Serializer {
    pub fn new(config: SerializerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    /// Validate a candidate value against the configured depth ceiling
    pub fn validate(&self, value: &PageValue) -> Result<Value> {
        validate_serialization(value, 0, self.config.max_depth)
    }

    /// Validate an already-plain JSON value (outbound envelopes)
    pub fn validate_json(&self, value: Value) -> Result<Value> {
        self.validate(&PageValue::from(value))
    }

    fn text(&self, value: &str) -> PageValue {
        PageValue::String(clamp_chars(value, self.config.max_string_length))
    }

    fn opt_text(&self, value: Option<&str>) -> PageValue {
        value.map_or(PageValue::Null, |v| self.text(v))
    }

    fn number(&self, value: f64) -> PageValue {
        round2(value).map_or(PageValue::Null, PageValue::Number)
    }

    fn rect(&self, rect: &Rect) -> PageValue {
        PageValue::map([
            ("x", self.number(rect.x)),
            ("y", self.number(rect.y)),
            ("width", self.number(rect.width)),
            ("height", self.number(rect.height)),
        ])
    }

    /// Typed error placeholder for one element
    pub fn error_placeholder(identity: &ElementIdentity, error_type: &str, message: &str) -> Value {
        json!({
            "error": true,
            "error_type": error_type,
            "identity": identity.as_str(),
            "message": message,
        })
    }

    /// Allow-listed, bounded copy of an entry
    pub fn serialize_element(&self, entry: &IndexEntry) -> Value {
        if let Some(error) = &entry.error {
            return Self::error_placeholder(&entry.identity, &error.error_type, &error.message);
        }
        match self.validate(&self.element_value(entry)) {
            Ok(value) => value,
            Err(err) => {
                warn!(identity = %entry.identity, error = %err, "element failed serialization");
                Self::error_placeholder(&entry.identity, err.kind(), &err.to_string())
            }
        }
    }

    fn element_value(&self, entry: &IndexEntry) -> PageValue {
        let selectors = entry
            .selectors
            .iter()
            .take(self.config.max_selectors)
            .map(|s| {
                PageValue::map([
                    ("type", PageValue::string(s.kind.as_str())),
                    ("value", self.text(&s.value)),
                    ("priority", PageValue::Number(s.priority as f64)),
                    ("confidence", self.number(s.confidence)),
                ])
            })
            .collect();
        let attributes = PageValue::map(
            entry
                .attributes
                .iter()
                .take(self.config.max_attributes)
                .map(|(k, v)| (k.clone(), self.text(v))),
        );
        let a11y = &entry.accessibility;
        let accessibility = PageValue::map([
            ("label", self.opt_text(a11y.label.as_deref())),
            ("description", self.opt_text(a11y.description.as_deref())),
            ("expanded", PageValue::opt_bool(a11y.expanded)),
            ("checked", PageValue::opt_bool(a11y.checked)),
            ("disabled", PageValue::Bool(a11y.disabled)),
            ("required", PageValue::Bool(a11y.required)),
            ("hidden", PageValue::Bool(a11y.hidden)),
            (
                "level",
                a11y.level.map_or(PageValue::Null, |l| PageValue::Number(l as f64)),
            ),
        ]);
        let usage = PageValue::map([
            ("priority", PageValue::Number(entry.usage.priority as f64)),
            ("accessCount", PageValue::Number(entry.usage.access_count as f64)),
            ("lastAccess", PageValue::Number(entry.usage.last_access as f64)),
        ]);

        let mut fields = vec![
            ("identity", self.text(entry.identity.as_str())),
            ("tagName", self.text(&entry.tag_name)),
            ("text", self.text(&entry.text)),
            ("role", self.text(&entry.role)),
            ("confidence", self.number(entry.confidence)),
            ("position", self.rect(&entry.position)),
            ("visible", PageValue::Bool(entry.visible)),
            ("interactive", PageValue::Bool(entry.interactive)),
            ("selectors", PageValue::List(selectors)),
            ("attributes", attributes),
            ("accessibility", accessibility),
            ("usage", usage),
        ];
        if let Some(scroll) = &entry.scroll_data {
            fields.push(("scrollData", self.scroll_data(scroll)));
        }
        if let Some(media) = &entry.media_data {
            fields.push(("mediaData", self.media_data(media)));
        }
        PageValue::map(fields)
    }

    fn scroll_data(&self, data: &ScrollData) -> PageValue {
        PageValue::map([
            ("scrollTop", self.number(data.scroll_top)),
            ("scrollLeft", self.number(data.scroll_left)),
            ("maxScrollTop", self.number(data.max_scroll_top)),
            ("maxScrollLeft", self.number(data.max_scroll_left)),
            (
                "direction",
                PageValue::from(serde_json::to_value(data.direction).unwrap_or(Value::Null)),
            ),
            (
                "scrollableParent",
                self.opt_text(data.scrollable_parent.as_ref().map(|p| p.as_str())),
            ),
            (
                "stickyDescendants",
                PageValue::List(
                    data.sticky_descendants
                        .iter()
                        .take(self.config.max_attributes)
                        .map(|s| self.text(s.as_str()))
                        .collect(),
                ),
            ),
            ("progressX", self.number(data.progress_x)),
            ("progressY", self.number(data.progress_y)),
            ("atTop", PageValue::Bool(data.at_top)),
            ("atBottom", PageValue::Bool(data.at_bottom)),
            ("atLeft", PageValue::Bool(data.at_left)),
            ("atRight", PageValue::Bool(data.at_right)),
        ])
    }

    fn media_data(&self, data: &MediaData) -> PageValue {
        let strings = |items: &[String]| {
            PageValue::List(
                items
                    .iter()
                    .take(self.config.max_attributes)
                    .map(|s| self.text(s))
                    .collect(),
            )
        };
        PageValue::map([
            (
                "kind",
                PageValue::from(serde_json::to_value(data.kind).unwrap_or(Value::Null)),
            ),
            (
                "state",
                PageValue::from(serde_json::to_value(data.state).unwrap_or(Value::Null)),
            ),
            ("duration", data.duration.map_or(PageValue::Null, |d| self.number(d))),
            ("currentTime", self.number(data.current_time)),
            ("volume", self.number(data.volume)),
            ("muted", PageValue::Bool(data.muted)),
            ("playbackRate", self.number(data.playback_rate)),
            ("isCustomPlayer", PageValue::Bool(data.is_custom_player)),
            ("controls", strings(&data.controls)),
            ("sources", strings(&data.sources)),
            (
                "buffered",
                PageValue::List(
                    data.buffered
                        .iter()
                        .map(|(start, end)| PageValue::List(vec![self.number(*start), self.number(*end)]))
                        .collect(),
                ),
            ),
            ("textTracks", strings(&data.text_tracks)),
            ("width", self.number(data.width)),
            ("height", self.number(data.height)),
        ])
    }

    /// Serialize a detector record, swapping node handles for identities
    pub fn serialize_record(&self, record: &impl PageRecord, doc: &Document) -> Value {
        let resolve = |node: NodeId| {
            if node == doc.root() {
                PageValue::string(ElementIdentity::document().as_str())
            } else if doc.is_connected(node) {
                PageValue::string(ElementIdentity::compute(doc, node).as_str())
            } else {
                PageValue::Null
            }
        };
        let value = self.bound(record.to_page_value()).replace_nodes(&resolve);
        match self.validate(&value) {
            Ok(value) => value,
            Err(err) => {
                warn!(identity = %record.identity(), error = %err, "record failed serialization");
                Self::error_placeholder(record.identity(), err.kind(), &err.to_string())
            }
        }
    }

    /// Clamp strings, round numbers and cap lists throughout a value
    fn bound(&self, value: PageValue) -> PageValue {
        match value {
            PageValue::String(s) => self.text(&s),
            PageValue::Number(n) => self.number(n),
            PageValue::List(items) => PageValue::List(
                items
                    .into_iter()
                    .take(self.config.max_attributes)
                    .map(|v| self.bound(v))
                    .collect(),
            ),
            PageValue::Map(fields) => {
                PageValue::Map(fields.into_iter().map(|(k, v)| (k, self.bound(v))).collect())
            }
            other => other,
        }
    }

    pub fn serialize_scroll_record(
        &self,
        record: &crate::detectors::ScrollRecord,
        doc: &Document,
    ) -> Value {
        self.serialize_record(record, doc)
    }

    pub fn serialize_media_record(
        &self,
        record: &crate::detectors::MediaRecord,
        doc: &Document,
    ) -> Value {
        self.serialize_record(record, doc)
    }

    /// Serialize entries in chunks of `chunk_size`
    pub fn serialize_batch<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a IndexEntry>,
    ) -> Vec<Vec<Value>> {
        let values: Vec<Value> = entries
            .into_iter()
            .map(|e| self.serialize_element(e))
            .collect();
        values
            .chunks(self.config.chunk_size.max(1))
            .map(<[Value]>::to_vec)
            .collect()
    }
}
