//! Scroll detector
//!
//! Tracks the window and every element that scrolls its overflow. Scroll
//! events arrive on one passive subscription and are throttled per element;
//! a periodic rescan picks up containers that appeared silently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::core::config::ScrollConfig;
use crate::core::{epoch_millis, Rect};
use crate::detectors::DetectorState;
use crate::dom::{Document, DomEvent, EventFilter, EventKind, NodeId, Page, Subscription};
use crate::index::{DetectorKind, ElementIdentity, ScrollData, ScrollDirection, SharedIndex};
use crate::serializer::{PageRecord, PageValue};

const EDGE_TOLERANCE: f64 = 1.0;
const MAX_STICKY: usize = 20;

/// Scroll state of one container
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollRecord {
    pub identity: ElementIdentity,
    pub node: NodeId,
    /// The window rather than an element
    pub is_document: bool,
    pub scroll_top: f64,
    pub scroll_left: f64,
    pub max_scroll_top: f64,
    pub max_scroll_left: f64,
    pub client_width: f64,
    pub client_height: f64,
    pub direction: ScrollDirection,
    pub scrollable_parent: Option<NodeId>,
    pub sticky_descendants: Vec<NodeId>,
    pub progress_x: f64,
    pub progress_y: f64,
    pub at_top: bool,
    pub at_bottom: bool,
    pub at_left: bool,
    pub at_right: bool,
    pub updated_at: i64,
}

impl ScrollRecord {
    /// Record for a scroll container, or `None` if `node` does not scroll
    pub fn compute(doc: &Document, node: NodeId) -> Option<Self> {
        if node == doc.root() {
            return Some(Self::for_window(doc));
        }
        let style = doc.computed_style(node);
        let metrics = doc.scroll_metrics(node);
        let rect = doc.rect(node);
        let vertical = style.scrolls_y() && metrics.scroll_height > rect.height;
        let horizontal = style.scrolls_x() && metrics.scroll_width > rect.width;
        let direction = match (vertical, horizontal) {
            (true, true) => ScrollDirection::Both,
            (true, false) => ScrollDirection::Vertical,
            (false, true) => ScrollDirection::Horizontal,
            (false, false) => return None,
        };
        let sticky = doc
            .descendant_elements(node)
            .into_iter()
            .filter(|d| doc.computed_style(*d).is_pinned())
            .take(MAX_STICKY)
            .collect();
        Some(Self::build(
            ElementIdentity::compute(doc, node),
            node,
            false,
            (metrics.scroll_top, metrics.scroll_left),
            (metrics.scroll_width, metrics.scroll_height),
            rect,
            direction,
            doc.scroll_container(node),
            sticky,
        ))
    }

    fn for_window(doc: &Document) -> Self {
        let viewport = doc.viewport();
        let (width, height) = doc.document_size();
        let direction = match (height > viewport.height, width > viewport.width) {
            (_, false) => ScrollDirection::Vertical,
            (false, true) => ScrollDirection::Horizontal,
            (true, true) => ScrollDirection::Both,
        };
        let sticky = doc
            .elements()
            .into_iter()
            .filter(|d| doc.computed_style(*d).is_pinned())
            .take(MAX_STICKY)
            .collect();
        Self::build(
            ElementIdentity::document(),
            doc.root(),
            true,
            (viewport.scroll_y, viewport.scroll_x),
            (width, height),
            Rect::new(0.0, 0.0, viewport.width, viewport.height),
            direction,
            None,
            sticky,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        identity: ElementIdentity,
        node: NodeId,
        is_document: bool,
        (scroll_top, scroll_left): (f64, f64),
        (scroll_width, scroll_height): (f64, f64),
        client: Rect,
        direction: ScrollDirection,
        scrollable_parent: Option<NodeId>,
        sticky_descendants: Vec<NodeId>,
    ) -> Self {
        let max_scroll_top = (scroll_height - client.height).max(0.0);
        let max_scroll_left = (scroll_width - client.width).max(0.0);
        let ratio = |pos: f64, max: f64| if max > 0.0 { (pos / max).clamp(0.0, 1.0) } else { 0.0 };
        Self {
            identity,
            node,
            is_document,
            scroll_top,
            scroll_left,
            max_scroll_top,
            max_scroll_left,
            client_width: client.width,
            client_height: client.height,
            direction,
            scrollable_parent,
            sticky_descendants,
            progress_x: ratio(scroll_left, max_scroll_left),
            progress_y: ratio(scroll_top, max_scroll_top),
            at_top: scroll_top <= EDGE_TOLERANCE,
            at_bottom: scroll_top >= max_scroll_top - EDGE_TOLERANCE,
            at_left: scroll_left <= EDGE_TOLERANCE,
            at_right: scroll_left >= max_scroll_left - EDGE_TOLERANCE,
            updated_at: epoch_millis(),
        }
    }

    /// Plain-data copy for the index, node handles swapped for identities
    pub fn to_data(&self, doc: &Document) -> ScrollData {
        ScrollData {
            scroll_top: self.scroll_top,
            scroll_left: self.scroll_left,
            max_scroll_top: self.max_scroll_top,
            max_scroll_left: self.max_scroll_left,
            direction: self.direction,
            scrollable_parent: self
                .scrollable_parent
                .map(|p| ElementIdentity::compute(doc, p)),
            sticky_descendants: self
                .sticky_descendants
                .iter()
                .map(|s| ElementIdentity::compute(doc, *s))
                .collect(),
            progress_x: self.progress_x,
            progress_y: self.progress_y,
            at_top: self.at_top,
            at_bottom: self.at_bottom,
            at_left: self.at_left,
            at_right: self.at_right,
        }
    }
}

impl PageRecord for ScrollRecord {
    fn identity(&self) -> &ElementIdentity {
        &self.identity
    }

    fn to_page_value(&self) -> PageValue {
        let direction = match self.direction {
            ScrollDirection::Vertical => "vertical",
            ScrollDirection::Horizontal => "horizontal",
            ScrollDirection::Both => "both",
        };
        PageValue::map([
            ("identity", PageValue::string(self.identity.as_str())),
            ("element", PageValue::Node(self.node)),
            ("isDocument", self.is_document.into()),
            ("scrollTop", self.scroll_top.into()),
            ("scrollLeft", self.scroll_left.into()),
            ("maxScrollTop", self.max_scroll_top.into()),
            ("maxScrollLeft", self.max_scroll_left.into()),
            ("direction", direction.into()),
            (
                "scrollableParent",
                self.scrollable_parent.map_or(PageValue::Null, PageValue::Node),
            ),
            (
                "stickyDescendants",
                PageValue::List(self.sticky_descendants.iter().map(|s| PageValue::Node(*s)).collect()),
            ),
            ("progressX", self.progress_x.into()),
            ("progressY", self.progress_y.into()),
            ("atTop", self.at_top.into()),
            ("atBottom", self.at_bottom.into()),
            ("atLeft", self.at_left.into()),
            ("atRight", self.at_right.into()),
        ])
    }
}

#[derive(Default)]
struct ScrollShared {
    records: HashMap<NodeId, ScrollRecord>,
    subscription: Option<Subscription>,
}

pub struct ScrollDetector {
    page: Page,
    index: SharedIndex,
    config: ScrollConfig,
    shared: Arc<Mutex<ScrollShared>>,
    state: DetectorState,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ScrollDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrollDetector")
            .field("state", &self.state)
            .field("records", &self.shared.lock().records.len())
            .finish()
    }
}

impl ScrollDetector {
    pub fn new(page: Page, index: SharedIndex, config: ScrollConfig) -> Self {
        Self {
            page,
            index,
            config,
            shared: Arc::new(Mutex::new(ScrollShared::default())),
            state: DetectorState::Idle,
            task: None,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Scan once, subscribe to scroll events and start the rescan task.
    /// Must be called inside a tokio runtime.
    pub fn start_detecting(&mut self) {
        if self.state == DetectorState::Detecting {
            return;
        }
        rescan(&self.page, &self.index, &self.shared);
        let (subscription, events) = self
            .page
            .events()
            .subscribe(EventFilter::kinds([EventKind::Scroll]).passive());
        self.shared.lock().subscription = Some(subscription);

        let task = ScrollTask {
            page: self.page.clone(),
            index: self.index.clone(),
            shared: self.shared.clone(),
            throttle: Duration::from_millis(self.config.update_interval_ms),
            last_update: HashMap::new(),
            dirty: HashMap::new(),
        };
        let rescan_every = Duration::from_millis(self.config.rescan_interval_ms.max(1));
        self.task = Some(tokio::spawn(task.run(events, rescan_every)));
        self.state = DetectorState::Detecting;
        info!(records = self.shared.lock().records.len(), "scroll detector started");
    }

    /// Abort the task, drop the subscription, clear records and release
    /// index entries
    pub fn stop_detecting(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let records = {
            let mut shared = self.shared.lock();
            shared.subscription = None;
            std::mem::take(&mut shared.records)
        };
        if !records.is_empty() {
            let mut index = self.index.lock();
            for record in records.values() {
                index.release(&record.identity, DetectorKind::Scroll);
            }
        }
        if self.state == DetectorState::Detecting {
            info!("scroll detector stopped");
        }
        self.state = DetectorState::Idle;
    }

    pub fn records(&self) -> Vec<ScrollRecord> {
        let mut records: Vec<ScrollRecord> = self.shared.lock().records.values().cloned().collect();
        records.sort_by_key(|r| r.node);
        records
    }

    pub fn record(&self, identity: &ElementIdentity) -> Option<ScrollRecord> {
        self.shared
            .lock()
            .records
            .values()
            .find(|r| &r.identity == identity)
            .cloned()
    }

    /// Records of the containers enclosing `node`, innermost first, ending
    /// with the window
    fn enclosing(&self, doc: &Document, node: NodeId) -> Vec<ScrollRecord> {
        let shared = self.shared.lock();
        doc.ancestors(node)
            .into_iter()
            .chain(std::iter::once(doc.root()))
            .filter_map(|a| shared.records.get(&a).cloned())
            .collect()
    }

    /// Scroll tracked containers so `node` is centred; false when the
    /// element is gone or no tracked container encloses it
    pub fn scroll_to_element(&self, node: NodeId) -> bool {
        let scrolled = {
            let mut doc = self.page.write();
            if !doc.is_connected(node) || !doc.is_element(node) {
                return false;
            }
            if self.enclosing(&doc, node).is_empty() {
                return false;
            }
            doc.scroll_into_view(node)
        };
        for container in &scrolled {
            self.page.dispatch(EventKind::Scroll, *container);
        }
        let doc = self.page.read();
        let updated: Vec<ScrollRecord> = scrolled
            .iter()
            .filter_map(|c| ScrollRecord::compute(&doc, *c))
            .collect();
        commit(&doc, &self.index, &self.shared, updated);
        true
    }

    /// Whether `node` lies inside the visible part of every tracked
    /// container that encloses it
    pub fn is_element_in_scroll_viewport(&self, node: NodeId) -> bool {
        let doc = self.page.read();
        if !doc.is_connected(node) || !doc.is_element(node) {
            return false;
        }
        let target = doc.rect(node);
        let mut inner = target;
        let enclosing = self.enclosing(&doc, node);
        if enclosing.is_empty() {
            return false;
        }
        for record in enclosing {
            let visible = if record.is_document {
                doc.viewport().visible_rect()
            } else {
                let c = doc.rect(record.node);
                Rect::new(
                    c.x + record.scroll_left,
                    c.y + record.scroll_top,
                    record.client_width,
                    record.client_height,
                )
            };
            if !inner.intersects(&visible) {
                return false;
            }
            if !record.is_document {
                // Outer viewports only need to show the container itself
                inner = doc.rect(record.node);
            }
        }
        true
    }
}

impl Drop for ScrollDetector {
    fn drop(&mut self) {
        self.stop_detecting();
    }
}

/// Re-classify every element; drop records whose element stopped scrolling
fn rescan(page: &Page, index: &SharedIndex, shared: &Arc<Mutex<ScrollShared>>) {
    let doc = page.read();
    let mut records: Vec<ScrollRecord> = vec![ScrollRecord::for_window(&doc)];
    records.extend(
        doc.elements()
            .into_iter()
            .filter_map(|n| ScrollRecord::compute(&doc, n)),
    );
    let live: HashSet<NodeId> = records.iter().map(|r| r.node).collect();

    let gone: Vec<ScrollRecord> = {
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
            index.release(&record.identity, DetectorKind::Scroll);
        }
        debug!(released = gone.len(), "scroll containers vanished");
    }
    commit(&doc, index, shared, records);
}

/// Store records and mirror them into the index
fn commit(
    doc: &Document,
    index: &SharedIndex,
    shared: &Arc<Mutex<ScrollShared>>,
    records: Vec<ScrollRecord>,
) {
    if records.is_empty() {
        return;
    }
    let data: Vec<(ElementIdentity, ScrollData, Option<ElementIdentity>)> = {
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
            index.release(&previous, DetectorKind::Scroll);
        }
        index.track(&identity, DetectorKind::Scroll);
        index.attach_scroll_data(&identity, data);
    }
}

struct ScrollTask {
    page: Page,
    index: SharedIndex,
    shared: Arc<Mutex<ScrollShared>>,
    throttle: Duration,
    last_update: HashMap<NodeId, Instant>,
    /// Throttled elements and when their trailing update is due
    dirty: HashMap<NodeId, Instant>,
}

impl ScrollTask {
    async fn run(mut self, mut events: UnboundedReceiver<DomEvent>, rescan_every: Duration) {
        let mut rescan_ticker = time::interval_at(Instant::now() + rescan_every, rescan_every);
        rescan_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let next_flush = self.dirty.values().min().copied();
            let flush_due = async move {
                match next_flush {
                    Some(deadline) => time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.on_scroll(event.target),
                    None => break,
                },
                _ = flush_due => self.flush(),
                _ = rescan_ticker.tick() => self.rescan(),
            }
        }
    }

    /// Rescan, then forget throttle state for containers no longer tracked
    fn rescan(&mut self) {
        rescan(&self.page, &self.index, &self.shared);
        let shared = self.shared.lock();
        self.last_update.retain(|node, _| shared.records.contains_key(node));
        self.dirty.retain(|node, _| shared.records.contains_key(node));
    }

    fn on_scroll(&mut self, node: NodeId) {
        let now = Instant::now();
        match self.last_update.get(&node) {
            Some(last) if now.duration_since(*last) < self.throttle => {
                let deadline = *last + self.throttle;
                self.dirty.entry(node).or_insert(deadline);
            }
            _ => self.update(&[node]),
        }
    }

    fn flush(&mut self) {
        let now = Instant::now();
        let due: Vec<NodeId> = self
            .dirty
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(node, _)| *node)
            .collect();
        for node in &due {
            self.dirty.remove(node);
        }
        self.update(&due);
    }

    fn update(&mut self, nodes: &[NodeId]) {
        let now = Instant::now();
        let doc = self.page.read();
        let (live, detached): (Vec<NodeId>, Vec<NodeId>) = nodes
            .iter()
            .copied()
            .partition(|n| *n == doc.root() || doc.is_connected(*n));
        for node in &detached {
            self.last_update.remove(node);
        }
        let records: Vec<ScrollRecord> = live
            .iter()
            .filter_map(|n| ScrollRecord::compute(&doc, *n))
            .collect();
        for record in &records {
            self.last_update.insert(record.node, now);
        }
        commit(&doc, &self.index, &self.shared, records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ElementIndex;

    fn scroll_page() -> (Page, NodeId, NodeId) {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        doc.set_rect(body, Rect::new(0.0, 0.0, 1280.0, 3000.0));
        let list = doc.append_element(body, "div", &[("id", "list"), ("style", "overflow-y: auto")]);
        doc.set_rect(list, Rect::new(0.0, 100.0, 300.0, 200.0));
        doc.set_scroll_extents(list, 300.0, 1000.0);
        let item = doc.append_element(list, "div", &[("id", "item")]);
        doc.set_rect(item, Rect::new(0.0, 700.0, 300.0, 20.0));
        (Page::new(doc), list, item)
    }

    fn detector(page: &Page) -> (ScrollDetector, SharedIndex) {
        let index = ElementIndex::new(Default::default()).shared();
        let config = ScrollConfig {
            update_interval_ms: 100,
            rescan_interval_ms: 60_000,
        };
        (ScrollDetector::new(page.clone(), index.clone(), config), index)
    }

    #[test]
    fn test_classification() {
        let (page, list, item) = scroll_page();
        let doc = page.read();
        let record = ScrollRecord::compute(&doc, list).unwrap();
        assert_eq!(record.direction, ScrollDirection::Vertical);
        assert_eq!(record.max_scroll_top, 800.0);
        assert!(record.at_top);
        assert!(!record.at_bottom);
        assert!(ScrollRecord::compute(&doc, item).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_tracks_and_releases() {
        let (page, list, _) = scroll_page();
        let (mut detector, index) = detector(&page);
        detector.start_detecting();
        assert_eq!(detector.state(), DetectorState::Detecting);
        assert_eq!(detector.records().len(), 2);
        assert_eq!(page.events().listener_count(), 1);

        let identity = ElementIdentity::compute(&page.read(), list);
        assert!(index.lock().get(&identity).unwrap().scroll_data.is_some());

        detector.stop_detecting();
        assert_eq!(detector.state(), DetectorState::Idle);
        assert!(detector.records().is_empty());
        assert_eq!(page.events().listener_count(), 0);
        assert!(!index.lock().get(&identity).unwrap().is_tracked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_events_are_throttled() {
        let (page, list, _) = scroll_page();
        let (mut detector, _index) = detector(&page);
        detector.start_detecting();
        let identity = ElementIdentity::compute(&page.read(), list);

        page.write().set_scroll_position(list, 100.0, 0.0);
        page.dispatch(EventKind::Scroll, list);
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(detector.record(&identity).unwrap().scroll_top, 100.0);

        // Inside the throttle window the record lags until the flush
        page.write().set_scroll_position(list, 800.0, 0.0);
        page.dispatch(EventKind::Scroll, list);
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(detector.record(&identity).unwrap().scroll_top, 100.0);

        time::sleep(Duration::from_millis(150)).await;
        let record = detector.record(&identity).unwrap();
        assert_eq!(record.scroll_top, 800.0);
        assert!(record.at_bottom);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_state_is_dropped_with_the_container() {
        let (page, list, _) = scroll_page();
        let index = ElementIndex::new(Default::default()).shared();
        let shared = Arc::new(Mutex::new(ScrollShared::default()));
        rescan(&page, &index, &shared);
        let mut task = ScrollTask {
            page: page.clone(),
            index,
            shared,
            throttle: Duration::from_millis(100),
            last_update: HashMap::new(),
            dirty: HashMap::new(),
        };

        task.on_scroll(list);
        task.on_scroll(list);
        assert!(task.last_update.contains_key(&list));
        assert!(task.dirty.contains_key(&list));

        page.write().remove(list);
        task.rescan();
        assert!(!task.last_update.contains_key(&list));
        assert!(task.dirty.is_empty());

        // A late event for a detached node leaves nothing behind
        task.on_scroll(list);
        assert!(task.last_update.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_to_element_and_viewport_query() {
        let (page, _, item) = scroll_page();
        let (mut detector, _index) = detector(&page);
        detector.start_detecting();

        assert!(!detector.is_element_in_scroll_viewport(item));
        assert!(detector.scroll_to_element(item));
        assert!(detector.is_element_in_scroll_viewport(item));
    }
}
