//! Page event bus
//!
//! Listeners are registered with [`EventBus::subscribe`] and receive events
//! as messages on a tokio channel. The returned [`Subscription`] is the only
//! way to detach: dropping it removes the listener.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::dom::document::NodeId;

/// Kinds of events a page announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    MouseDown,
    MouseUp,
    MouseEnter,
    MouseOver,
    Focus,
    Blur,
    Input,
    Change,
    KeyDown,
    KeyUp,
    Submit,
    Scroll,
    Play,
    Pause,
    Ended,
    TimeUpdate,
    VolumeChange,
    RateChange,
    LoadedMetadata,
    DurationChange,
    Seeked,
    Waiting,
    /// Structural or attribute change somewhere in the tree
    Mutation,
    Navigate,
}

impl EventKind {
    /// Media events the media detector listens for
    pub const MEDIA: [EventKind; 10] = [
        EventKind::Play,
        EventKind::Pause,
        EventKind::Ended,
        EventKind::TimeUpdate,
        EventKind::VolumeChange,
        EventKind::RateChange,
        EventKind::LoadedMetadata,
        EventKind::DurationChange,
        EventKind::Seeked,
        EventKind::Waiting,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::MouseDown => "mousedown",
            EventKind::MouseUp => "mouseup",
            EventKind::MouseEnter => "mouseenter",
            EventKind::MouseOver => "mouseover",
            EventKind::Focus => "focus",
            EventKind::Blur => "blur",
            EventKind::Input => "input",
            EventKind::Change => "change",
            EventKind::KeyDown => "keydown",
            EventKind::KeyUp => "keyup",
            EventKind::Submit => "submit",
            EventKind::Scroll => "scroll",
            EventKind::Play => "play",
            EventKind::Pause => "pause",
            EventKind::Ended => "ended",
            EventKind::TimeUpdate => "timeupdate",
            EventKind::VolumeChange => "volumechange",
            EventKind::RateChange => "ratechange",
            EventKind::LoadedMetadata => "loadedmetadata",
            EventKind::DurationChange => "durationchange",
            EventKind::Seeked => "seeked",
            EventKind::Waiting => "waiting",
            EventKind::Mutation => "mutation",
            EventKind::Navigate => "navigate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "click" => EventKind::Click,
            "mousedown" => EventKind::MouseDown,
            "mouseup" => EventKind::MouseUp,
            "mouseenter" => EventKind::MouseEnter,
            "mouseover" => EventKind::MouseOver,
            "focus" => EventKind::Focus,
            "blur" => EventKind::Blur,
            "input" => EventKind::Input,
            "change" => EventKind::Change,
            "keydown" => EventKind::KeyDown,
            "keyup" => EventKind::KeyUp,
            "submit" => EventKind::Submit,
            "scroll" => EventKind::Scroll,
            "play" => EventKind::Play,
            "pause" => EventKind::Pause,
            "ended" => EventKind::Ended,
            "timeupdate" => EventKind::TimeUpdate,
            "volumechange" => EventKind::VolumeChange,
            "ratechange" => EventKind::RateChange,
            "loadedmetadata" => EventKind::LoadedMetadata,
            "durationchange" => EventKind::DurationChange,
            "seeked" => EventKind::Seeked,
            "waiting" => EventKind::Waiting,
            "mutation" => EventKind::Mutation,
            "navigate" => EventKind::Navigate,
            _ => return None,
        };
        Some(kind)
    }
}

/// A dispatched event
#[derive(Debug, Clone, PartialEq)]
pub struct DomEvent {
    pub kind: EventKind,
    pub target: NodeId,
    /// Monotonic dispatch sequence number
    pub seq: u64,
}

/// Which events a listener receives
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Empty means every kind
    pub kinds: Vec<EventKind>,
    /// Only events targeting this node
    pub target: Option<NodeId>,
    /// Listener never blocks the dispatching action
    pub passive: bool,
}

impl EventFilter {
    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn on(mut self, target: NodeId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    fn accepts(&self, kind: EventKind, target: NodeId) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&kind))
            && self.target.map_or(true, |t| t == target)
    }
}

struct Listener {
    id: u64,
    filter: EventFilter,
    tx: UnboundedSender<DomEvent>,
}

#[derive(Default)]
struct BusInner {
    listeners: Vec<Listener>,
    next_id: u64,
    seq: u64,
}

/// Fan-out of page events to subscribed channels
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe with a fresh channel
    pub fn subscribe(&self, filter: EventFilter) -> (Subscription, UnboundedReceiver<DomEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.subscribe_into(filter, tx), rx)
    }

    /// Subscribe, delivering into an existing channel
    pub fn subscribe_into(&self, filter: EventFilter, tx: UnboundedSender<DomEvent>) -> Subscription {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.listeners.push(Listener { id, filter, tx });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every matching listener and return its sequence
    /// number. Listeners whose receiver is gone are pruned.
    pub fn emit(&self, kind: EventKind, target: NodeId) -> u64 {
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let event = DomEvent {
            kind,
            target,
            seq: inner.seq,
        };
        inner.listeners.retain(|listener| {
            if !listener.filter.accepts(kind, target) {
                return !listener.tx.is_closed();
            }
            listener.tx.send(event.clone()).is_ok()
        });
        trace!(event = kind.name(), %target, seq = event.seq, "dispatched");
        event.seq
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Registration handle; the listener is removed when this is dropped
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    /// Whether the listener is still registered
    pub fn is_active(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.lock().listeners.iter().any(|l| l.id == self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().listeners.retain(|l| l.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filtering_and_drop() {
        let bus = EventBus::new();
        let (sub, mut rx) = bus.subscribe(EventFilter::kinds([EventKind::Click]).on(NodeId(3)));
        bus.emit(EventKind::Click, NodeId(3));
        bus.emit(EventKind::Click, NodeId(4));
        bus.emit(EventKind::Input, NodeId(3));
        assert_eq!(rx.try_recv().unwrap().target, NodeId(3));
        assert!(rx.try_recv().is_err());

        assert_eq!(bus.listener_count(), 1);
        drop(sub);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_shared_channel() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _a = bus.subscribe_into(EventFilter::kinds([EventKind::Play]), tx.clone());
        let _b = bus.subscribe_into(EventFilter::kinds([EventKind::Pause]), tx);
        bus.emit(EventKind::Play, NodeId(1));
        bus.emit(EventKind::Pause, NodeId(1));
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Play);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Pause);
    }

    #[test]
    fn test_names_round_trip() {
        for kind in EventKind::MEDIA {
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EventKind::from_name("bogus"), None);
    }
}
