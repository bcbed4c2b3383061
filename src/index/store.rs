//! The element index
//!
//! Identity-keyed cache of [`IndexEntry`] values kept fresh by budgeted,
//! resumable scans. Reads are synchronous and may be one scan interval
//! stale.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::config::IndexConfig;
use crate::core::epoch_millis;
use crate::dom::{Document, NodeId};
use crate::index::budget::{BudgetDiagnostics, Budgeter};
use crate::index::entry::{EntryFilter, IndexEntry, MediaData, ScrollData};
use crate::index::extract::{DomExtractor, ElementExtractor};
use crate::index::identity::ElementIdentity;

/// Index shared between the monitor, detectors and the controller
pub type SharedIndex = Arc<Mutex<ElementIndex>>;

/// Detector plug-ins that can hold entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Scroll,
    Media,
}

impl DetectorKind {
    pub fn name(self) -> &'static str {
        match self {
            DetectorKind::Scroll => "scroll",
            DetectorKind::Media => "media",
        }
    }
}

/// Outcome of one scan call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub visited: usize,
    pub indexed: usize,
    pub failed: usize,
    /// Whether this call reached the end of the document
    pub complete: bool,
    pub elapsed_ms: f64,
}

/// Options for [`ElementIndex::find_by_intent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentOptions {
    pub limit: usize,
    #[serde(alias = "visibleOnly")]
    pub visible_only: bool,
    #[serde(alias = "interactiveOnly")]
    pub interactive_only: bool,
    #[serde(alias = "minScore")]
    pub min_score: f64,
}

impl Default for IntentOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            visible_only: false,
            interactive_only: false,
            min_score: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentMatch {
    pub entry: IndexEntry,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_entries: usize,
    pub visible: usize,
    pub interactive: usize,
    pub tracked: usize,
    pub errors: usize,
    pub scans: u64,
    pub passes_completed: u64,
    pub by_role: BTreeMap<String, usize>,
    pub last_scan: Option<ScanReport>,
    pub budget: BudgetDiagnostics,
}

/// Progress of the pass currently being scanned
#[derive(Debug, Default)]
struct PassState {
    cursor: Option<NodeId>,
    in_progress: bool,
    seen: HashSet<ElementIdentity>,
}

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "on", "to", "of", "in", "for", "and", "or", "with", "please", "me", "my",
    "this", "that", "click", "press", "tap", "find", "open",
];

pub struct ElementIndex {
    config: IndexConfig,
    extractor: Box<dyn ElementExtractor>,
    entries: HashMap<ElementIdentity, IndexEntry>,
    node_identities: HashMap<NodeId, ElementIdentity>,
    pass: PassState,
    budgeter: Budgeter,
    scans: u64,
    passes_completed: u64,
    last_report: Option<ScanReport>,
}

impl std::fmt::Debug for ElementIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementIndex")
            .field("entries", &self.entries.len())
            .field("scans", &self.scans)
            .finish()
    }
}

impl ElementIndex {
    pub fn new(config: IndexConfig) -> Self {
        Self::with_extractor(config, Box::new(DomExtractor))
    }

    pub fn with_extractor(config: IndexConfig, extractor: Box<dyn ElementExtractor>) -> Self {
        Self {
            config,
            extractor,
            entries: HashMap::new(),
            node_identities: HashMap::new(),
            pass: PassState::default(),
            budgeter: Budgeter::new(),
            scans: 0,
            passes_completed: 0,
            last_report: None,
        }
    }

    pub fn shared(self) -> SharedIndex {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scan the next slice of the document, resuming where the previous
    /// call stopped
    pub fn scan(&mut self, doc: &Document) -> ScanReport {
        let resume = self
            .pass
            .cursor
            .filter(|c| self.pass.in_progress && doc.is_connected(*c));
        if self.pass.in_progress && resume.is_none() && self.pass.cursor.is_some() {
            debug!("scan cursor detached, restarting pass");
            self.pass = PassState::default();
        }
        if !self.pass.in_progress {
            self.pass.in_progress = true;
            self.pass.cursor = doc.next_element_in_order(doc.root());
        }

        let max = Duration::from_millis(self.config.max_scan_millis);
        let max_elements = self.config.max_elements_per_scan.max(1);
        let mut budgeter = std::mem::take(&mut self.budgeter);
        let outcome = budgeter.run_budgeted("index-scan", max, |budget| {
            let mut report = ScanReport::default();
            while let Some(node) = self.pass.cursor {
                if report.visited >= max_elements {
                    break;
                }
                self.pass.cursor = doc.next_element_in_order(node);
                report.visited += 1;
                if self.extractor.is_candidate(doc, node) {
                    if self.index_node(doc, node) {
                        report.indexed += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                if budget.exhausted() {
                    break;
                }
            }
            report.complete = self.pass.cursor.is_none();
            report
        });
        self.budgeter = budgeter;

        let mut report = outcome.value;
        report.elapsed_ms = outcome.elapsed.as_secs_f64() * 1000.0;
        if report.complete {
            self.finish_pass(doc);
        }
        self.enforce_capacity();
        self.scans += 1;
        debug!(
            visited = report.visited,
            indexed = report.indexed,
            failed = report.failed,
            complete = report.complete,
            "index scan"
        );
        self.last_report = Some(report.clone());
        report
    }

    /// Drop the resume cursor and scan from the top immediately
    pub fn refresh(&mut self, doc: &Document) -> ScanReport {
        self.pass = PassState::default();
        self.scan(doc)
    }

    /// Scan until a pass completes
    pub fn scan_to_completion(&mut self, doc: &Document) -> Vec<ScanReport> {
        let mut reports = vec![self.refresh(doc)];
        while !reports.last().is_some_and(|r| r.complete) {
            reports.push(self.scan(doc));
        }
        reports
    }

    /// Extract and store one node; false when a placeholder was stored
    fn index_node(&mut self, doc: &Document, node: NodeId) -> bool {
        let (entry, ok) = match self.extractor.extract(doc, node, &self.config) {
            Ok(entry) => (entry, true),
            Err(err) => {
                let identity = ElementIdentity::compute(doc, node);
                debug!(%identity, error = %err, "extraction failed, storing placeholder");
                (IndexEntry::placeholder(identity, node, &err), false)
            }
        };
        self.pass.seen.insert(entry.identity.clone());
        self.upsert(node, entry);
        ok
    }

    fn upsert(&mut self, node: NodeId, mut entry: IndexEntry) {
        let identity = entry.identity.clone();
        if let Some(old) = self.node_identities.insert(node, identity.clone()) {
            // Node moved or changed class; carry state over to the new key
            if old != identity && !self.entries.get(&old).is_some_and(|e| e.is_tracked()) {
                if let Some(previous) = self.entries.remove(&old) {
                    entry.usage.access_count = previous.usage.access_count;
                    entry.usage.last_access = previous.usage.last_access;
                }
            }
        }
        if let Some(previous) = self.entries.get(&identity) {
            entry.usage.access_count = entry.usage.access_count.max(previous.usage.access_count);
            entry.usage.last_access = entry.usage.last_access.max(previous.usage.last_access);
            entry.scroll_data = previous.scroll_data.clone();
            entry.media_data = previous.media_data.clone();
            entry.tracked_by = previous.tracked_by.clone();
        }
        self.entries.insert(identity, entry);
    }

    fn finish_pass(&mut self, doc: &Document) {
        let seen = std::mem::take(&mut self.pass.seen);
        let before = self.entries.len();
        self.entries.retain(|identity, entry| {
            entry.is_tracked()
                || (seen.contains(identity) && entry.node.is_some_and(|n| doc.is_connected(n)))
        });
        self.node_identities
            .retain(|node, identity| doc.is_connected(*node) && seen.contains(identity));
        self.pass = PassState::default();
        self.passes_completed += 1;
        let pruned = before - self.entries.len();
        if pruned > 0 {
            debug!(pruned, "pruned entries for vanished elements");
        }
    }

    /// Evict least-frequently then least-recently used entries that no
    /// detector holds
    fn enforce_capacity(&mut self) {
        let max = self.config.max_entries;
        if self.entries.len() <= max {
            return;
        }
        let mut evictable: Vec<(u64, i64, ElementIdentity)> = self
            .entries
            .values()
            .filter(|e| !e.is_tracked())
            .map(|e| (e.usage.access_count, e.usage.last_access, e.identity.clone()))
            .collect();
        evictable.sort();
        let excess = self.entries.len() - max;
        for (_, _, identity) in evictable.into_iter().take(excess) {
            self.entries.remove(&identity);
        }
        if self.entries.len() > max {
            debug!(
                entries = self.entries.len(),
                max, "index over capacity; remaining entries are tracked"
            );
        }
    }

    pub fn get(&self, identity: &ElementIdentity) -> Option<&IndexEntry> {
        self.entries.get(identity)
    }

    /// Entries matching `filter`, top-to-bottom, left-to-right
    pub fn get_all(&self, filter: &EntryFilter) -> Vec<&IndexEntry> {
        let mut out: Vec<&IndexEntry> = self.entries.values().filter(|e| filter.accepts(e)).collect();
        out.sort_by(|a, b| {
            a.position
                .y
                .total_cmp(&b.position.y)
                .then(a.position.x.total_cmp(&b.position.x))
                .then_with(|| a.identity.cmp(&b.identity))
        });
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }

    /// Record an access; false when the identity is unknown
    pub fn touch(&mut self, identity: &ElementIdentity) -> bool {
        match self.entries.get_mut(identity) {
            Some(entry) => {
                entry.touch(epoch_millis());
                true
            }
            None => false,
        }
    }

    /// Rank entries by word overlap with a free-form intent
    pub fn find_by_intent(&mut self, intent: &str, options: &IntentOptions) -> Vec<IntentMatch> {
        let words = intent_words(intent);
        if words.is_empty() {
            return Vec::new();
        }
        let mut matches: Vec<IntentMatch> = self
            .entries
            .values()
            .filter(|e| !e.is_error())
            .filter(|e| !options.visible_only || e.visible)
            .filter(|e| !options.interactive_only || e.interactive)
            .filter_map(|entry| {
                let score = intent_score(entry, &words);
                (score >= options.min_score).then(|| IntentMatch {
                    entry: entry.clone(),
                    score,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.entry.usage.priority.cmp(&a.entry.usage.priority))
                .then_with(|| a.entry.identity.cmp(&b.entry.identity))
        });
        matches.truncate(options.limit.max(1));

        let now = epoch_millis();
        for m in &mut matches {
            if let Some(entry) = self.entries.get_mut(&m.entry.identity) {
                entry.touch(now);
                m.entry.usage = entry.usage.clone();
            }
        }
        info!(intent, results = matches.len(), "intent search");
        matches
    }

    pub fn stats(&self) -> IndexStats {
        let mut by_role = BTreeMap::new();
        for entry in self.entries.values() {
            *by_role.entry(entry.role.clone()).or_insert(0) += 1;
        }
        IndexStats {
            total_entries: self.entries.len(),
            visible: self.entries.values().filter(|e| e.visible).count(),
            interactive: self.entries.values().filter(|e| e.interactive).count(),
            tracked: self.entries.values().filter(|e| e.is_tracked()).count(),
            errors: self.entries.values().filter(|e| e.is_error()).count(),
            scans: self.scans,
            passes_completed: self.passes_completed,
            by_role,
            last_scan: self.last_report.clone(),
            budget: self.budgeter.diagnostics().clone(),
        }
    }

    fn entry_or_minimal(&mut self, identity: &ElementIdentity) -> &mut IndexEntry {
        if !self.entries.contains_key(identity) {
            debug!(%identity, "recreating evicted entry for detector");
        }
        self.entries
            .entry(identity.clone())
            .or_insert_with(|| IndexEntry::minimal(identity.clone()))
    }

    pub fn attach_scroll_data(&mut self, identity: &ElementIdentity, data: ScrollData) {
        self.entry_or_minimal(identity).scroll_data = Some(data);
        self.enforce_capacity();
    }

    pub fn attach_media_data(&mut self, identity: &ElementIdentity, data: MediaData) {
        self.entry_or_minimal(identity).media_data = Some(data);
        self.enforce_capacity();
    }

    /// Mark an entry as held by a detector so it is never evicted
    pub fn track(&mut self, identity: &ElementIdentity, detector: DetectorKind) {
        self.entry_or_minimal(identity)
            .tracked_by
            .insert(detector.name().to_string());
    }

    /// Let go of an entry and drop the sub-record the detector wrote
    pub fn release(&mut self, identity: &ElementIdentity, detector: DetectorKind) -> bool {
        let Some(entry) = self.entries.get_mut(identity) else {
            return false;
        };
        let released = entry.tracked_by.remove(detector.name());
        match detector {
            DetectorKind::Scroll => entry.scroll_data = None,
            DetectorKind::Media => entry.media_data = None,
        }
        if released {
            self.enforce_capacity();
        }
        released
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn intent_words(intent: &str) -> Vec<String> {
    tokenize(intent)
        .into_iter()
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

fn intent_score(entry: &IndexEntry, words: &[String]) -> f64 {
    let label_words: HashSet<String> = tokenize(entry.label()).into_iter().collect();
    let text_words: HashSet<String> = tokenize(&entry.text).into_iter().collect();
    let attr_text = entry
        .attributes
        .values()
        .map(|v| v.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let mut score = 0.0;
    for word in words {
        if label_words.contains(word) || text_words.contains(word) {
            score += 3.0;
        } else if entry.text.to_lowercase().contains(word.as_str()) {
            score += 1.5;
        }
        if entry.role == *word || entry.tag_name == *word {
            score += 2.0;
        }
        if attr_text.contains(word.as_str()) {
            score += 1.0;
        }
    }
    if score > 0.0 && entry.interactive {
        score += 0.5;
    }
    score / words.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PilotError, Rect, Result};

    fn page(n: usize) -> Document {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        for i in 0..n {
            let b = doc.append_element(body, "button", &[("class", "item")]);
            doc.append_text(b, &format!("Item {}", i));
            doc.set_rect(b, Rect::new(0.0, i as f64 * 10.0, 100.0, 10.0));
        }
        doc
    }

    fn config() -> IndexConfig {
        IndexConfig {
            max_scan_millis: 10_000,
            max_elements_per_scan: 10_000,
            max_entries: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn test_scan_indexes_and_resumes() {
        let doc = page(10);
        let mut index = ElementIndex::new(IndexConfig {
            max_elements_per_scan: 4,
            ..config()
        });
        let first = index.scan(&doc);
        assert!(!first.complete);
        assert_eq!(first.visited, 4);
        let mut reports = vec![first];
        while !reports.last().unwrap().complete {
            reports.push(index.scan(&doc));
        }
        assert_eq!(index.len(), 10);
        let total: usize = reports.iter().map(|r| r.visited).sum();
        assert_eq!(total, doc.elements().len());
    }

    #[test]
    fn test_zero_budget_still_makes_progress() {
        let doc = page(3);
        let mut index = ElementIndex::new(IndexConfig {
            max_scan_millis: 0,
            ..config()
        });
        let reports = index.scan_to_completion(&doc);
        assert!(reports.iter().all(|r| r.visited == 1));
        assert_eq!(reports.len(), doc.elements().len());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_prunes_removed_nodes() {
        let mut doc = page(3);
        let mut index = ElementIndex::new(config());
        index.scan_to_completion(&doc);
        let victim = doc.query_selector("button").unwrap().unwrap();
        doc.remove(victim);
        index.scan_to_completion(&doc);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_eviction_is_lfu_then_lru_and_skips_tracked() {
        let doc = page(5);
        let mut index = ElementIndex::new(config());
        index.scan_to_completion(&doc);
        let ids: Vec<ElementIdentity> = index
            .get_all(&EntryFilter::default())
            .iter()
            .map(|e| e.identity.clone())
            .collect();
        // ids[0] is tracked, ids[1..3] are used, ids[3] and ids[4] are not
        index.track(&ids[0], DetectorKind::Scroll);
        for id in &ids[1..3] {
            index.touch(id);
        }
        index.config.max_entries = 3;
        index.enforce_capacity();
        assert!(index.get(&ids[0]).is_some());
        assert!(index.get(&ids[1]).is_some());
        assert!(index.get(&ids[2]).is_some());
        assert!(index.get(&ids[3]).is_none());
        assert!(index.get(&ids[4]).is_none());
    }

    #[test]
    fn test_detector_recreates_missing_entry() {
        let mut index = ElementIndex::new(config());
        let identity = ElementIdentity::from("video#player@0,0");
        index.track(&identity, DetectorKind::Media);
        let entry = index.get(&identity).unwrap();
        assert!(entry.is_tracked());
        assert_eq!(entry.tag_name, "video");
        assert!(index.release(&identity, DetectorKind::Media));
        assert!(!index.get(&identity).unwrap().is_tracked());
    }

    struct FailingOn(&'static str);

    impl ElementExtractor for FailingOn {
        fn extract(&self, doc: &Document, node: NodeId, config: &IndexConfig) -> Result<IndexEntry> {
            if doc.text_content(node) == self.0 {
                return Err(PilotError::extraction("text getter threw"));
            }
            DomExtractor.extract(doc, node, config)
        }
    }

    #[test]
    fn test_failure_is_isolated() {
        let doc = page(5);
        let mut index = ElementIndex::with_extractor(config(), Box::new(FailingOn("Item 2")));
        let report = index.scan(&doc);
        assert_eq!(report.indexed, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(index.stats().errors, 1);
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_find_by_intent() {
        let mut doc = page(2);
        let body = doc.body().unwrap();
        let contact = doc.append_element(body, "a", &[("href", "/contact")]);
        doc.append_text(contact, "Contact sales");
        doc.set_rect(contact, Rect::new(0.0, 100.0, 80.0, 20.0));
        let mut index = ElementIndex::new(config());
        index.scan_to_completion(&doc);

        let results = index.find_by_intent("click the contact link", &IntentOptions::default());
        assert_eq!(results[0].entry.tag_name, "a");
        assert_eq!(results[0].entry.usage.access_count, 1);
        assert!(index.find_by_intent("the", &IntentOptions::default()).is_empty());
    }
}
