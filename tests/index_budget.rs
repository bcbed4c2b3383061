//! Element index integration tests
//!
//! Budgeted scanning over large trees, failure isolation and identity
//! stability across scans.

use pagepilot::core::config::IndexConfig;
use pagepilot::core::{PilotError, Rect, Result};
use pagepilot::dom::{Document, NodeId};
use pagepilot::index::{DomExtractor, ElementExtractor, ElementIdentity, ElementIndex, IndexEntry};

/// Allowed overrun past the slice; one element is extracted after the
/// last budget check
const OVERSHOOT_MS: f64 = 50.0;

/// `sections` blocks of `rows` buttons each; ids only when `with_ids`
fn page(sections: usize, rows: usize, with_ids: bool) -> Document {
    let mut doc = Document::with_body();
    let body = doc.body().unwrap();
    for s in 0..sections {
        let section = doc.append_element(body, "section", &[]);
        for r in 0..rows {
            let i = s * rows + r;
            let id = format!("b{}", i);
            let mut attrs = vec![("class", "row")];
            if with_ids {
                attrs.push(("id", id.as_str()));
            }
            let button = doc.append_element(section, "button", &attrs);
            doc.append_text(button, &format!("Row {}", i));
            doc.set_rect(button, Rect::new(0.0, i as f64 * 20.0, 120.0, 18.0));
        }
    }
    doc
}

#[test]
fn test_scan_respects_five_ms_budget() {
    let doc = page(100, 100, false);
    let mut index = ElementIndex::new(IndexConfig {
        max_scan_millis: 5,
        max_elements_per_scan: usize::MAX,
        max_entries: 20_000,
        ..Default::default()
    });

    let mut reports = vec![index.scan(&doc)];
    while !reports.last().unwrap().complete {
        reports.push(index.scan(&doc));
        assert!(reports.len() < 100_000, "scan made no progress");
    }

    for report in &reports {
        assert!(
            report.elapsed_ms <= 5.0 + OVERSHOOT_MS,
            "scan blocked for {}ms",
            report.elapsed_ms
        );
        assert!(report.visited > 0);
    }
    // Every call that stopped early did so because its slice ran out
    for report in &reports[..reports.len() - 1] {
        assert!(report.elapsed_ms >= 5.0, "stopped early after {}ms", report.elapsed_ms);
    }

    let visited: usize = reports.iter().map(|r| r.visited).sum();
    assert_eq!(visited, doc.elements().len());
    assert_eq!(index.len(), 10_000);
    assert_eq!(index.stats().scans, reports.len() as u64);
}

/// Calls a five millisecond budget needs to finish one pass over `doc`
fn calls_to_complete(doc: &Document) -> usize {
    let mut index = ElementIndex::new(IndexConfig {
        max_scan_millis: 5,
        max_elements_per_scan: usize::MAX,
        max_entries: 20_000,
        ..Default::default()
    });
    let mut calls = 1;
    while !index.scan(doc).complete {
        calls += 1;
        assert!(calls < 100_000, "scan made no progress");
    }
    calls
}

#[test]
fn test_ids_and_labels_do_not_slow_a_pass() {
    let plain = page(100, 100, false);
    let mut labelled = page(100, 100, true);
    let body = labelled.body().unwrap();
    let footer = labelled.append_element(body, "footer", &[]);
    for i in (0..10_000).step_by(100) {
        let target = format!("b{}", i);
        let label = labelled.append_element(footer, "label", &[("for", target.as_str())]);
        labelled.append_text(label, &format!("Label {}", i));
    }

    let baseline = calls_to_complete(&plain);
    let with_ids = calls_to_complete(&labelled);
    assert!(
        with_ids <= baseline * 3 + 10,
        "ids made a pass take {} calls against {}",
        with_ids,
        baseline
    );
}

#[test]
fn test_element_cap_leaves_work_for_next_call() {
    let doc = page(10, 100, false);
    let mut index = ElementIndex::new(IndexConfig {
        max_scan_millis: 60_000,
        max_elements_per_scan: 300,
        max_entries: 2_000,
        ..Default::default()
    });
    let reports = index.scan_to_completion(&doc);
    let total = doc.elements().len();
    assert_eq!(reports.len(), total.div_ceil(300));
    assert!(reports[..reports.len() - 1]
        .iter()
        .all(|r| !r.complete && r.visited == 300));
    assert_eq!(index.len(), 1_000);
}

/// Extractor whose text getter throws for one element
struct ThrowingText {
    victim: &'static str,
}

impl ElementExtractor for ThrowingText {
    fn extract(&self, doc: &Document, node: NodeId, config: &IndexConfig) -> Result<IndexEntry> {
        if doc.attr(node, "id") == Some(self.victim) {
            return Err(PilotError::extraction("textContent getter threw"));
        }
        DomExtractor.extract(doc, node, config)
    }
}

#[test]
fn test_one_throwing_element_does_not_hide_the_rest() {
    let doc = page(5, 10, true);
    let config = IndexConfig {
        max_scan_millis: 60_000,
        max_elements_per_scan: usize::MAX,
        ..Default::default()
    };

    let mut clean = ElementIndex::new(config.clone());
    clean.scan_to_completion(&doc);
    let clean_ok = clean.len() - clean.stats().errors;

    let mut index = ElementIndex::with_extractor(config, Box::new(ThrowingText { victim: "b17" }));
    let reports = index.scan_to_completion(&doc);
    let failed: usize = reports.iter().map(|r| r.failed).sum();
    assert_eq!(failed, 1);
    assert_eq!(index.len() - index.stats().errors, clean_ok - 1);

    let victim = doc.by_id("b17").unwrap();
    let placeholder = index.get(&ElementIdentity::compute(&doc, victim)).unwrap();
    assert!(placeholder.error.is_some());
}

#[test]
fn test_identity_is_stable_between_scans() {
    let doc = page(2, 10, true);
    let mut index = ElementIndex::new(IndexConfig {
        max_scan_millis: 60_000,
        max_elements_per_scan: usize::MAX,
        ..Default::default()
    });
    let node = doc.by_id("b5").unwrap();

    index.scan_to_completion(&doc);
    let first = ElementIdentity::compute(&doc, node);
    index.scan_to_completion(&doc);
    let second = ElementIdentity::compute(&doc, node);

    assert_eq!(first, second);
    assert!(index.get(&second).is_some());
    assert_eq!(index.len(), 20);
}
