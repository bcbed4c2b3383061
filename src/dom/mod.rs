//! Live page model
//!
//! The document tree the index, detectors and executor observe and act on,
//! plus the event bus that announces changes to it.

pub mod document;
pub mod events;
pub mod parse;
pub mod selector;
pub mod style;
pub mod xpath;

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use document::{Document, Element, MediaState, NodeId, ScrollMetrics};
pub use events::{DomEvent, EventBus, EventFilter, EventKind, Subscription};

/// Shared handle to a live document and its event bus
///
/// Guards returned by [`Page::read`] and [`Page::write`] must not be held
/// across an `.await`.
#[derive(Clone, Debug)]
pub struct Page {
    doc: Arc<RwLock<Document>>,
    events: EventBus,
}

impl Page {
    pub fn new(doc: Document) -> Self {
        Self {
            doc: Arc::new(RwLock::new(doc)),
            events: EventBus::new(),
        }
    }

    pub fn from_html(html: &str) -> Self {
        Self::new(Document::from_html(html))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Document> {
        self.doc.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Document> {
        self.doc.write()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Announce an event on the bus
    pub fn dispatch(&self, kind: EventKind, target: NodeId) -> u64 {
        self.events.emit(kind, target)
    }

    /// Run `f` against the document and announce a mutation if the tree
    /// changed. The lock is released before listeners are notified.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let (result, changed, root) = {
            let mut doc = self.doc.write();
            let before = doc.mutation_count();
            let result = f(&mut doc);
            (result, doc.mutation_count() != before, doc.root())
        };
        if changed {
            self.events.emit(EventKind::Mutation, root);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutate_announces_changes() {
        let page = Page::new(Document::with_body());
        let (_sub, mut rx) = page.events().subscribe(EventFilter::kinds([EventKind::Mutation]));
        let body = page.read().body().unwrap();
        page.mutate(|doc| doc.append_element(body, "div", &[]));
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Mutation);

        page.mutate(|doc| doc.node_count());
        assert!(rx.try_recv().is_err());
    }
}
