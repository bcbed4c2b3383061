//! HTML loading
//!
//! Parses markup with `scraper` and copies the tree into a [`Document`].
//! There is no layout engine, so parsed pages get a simple block-flow
//! layout. Markup can pin geometry with `data-rect="x,y,w,h"` and give a
//! container scrollable content with `data-scroll-size="w,h"`.

use scraper::{ElementRef, Html};
use tracing::debug;

use crate::core::Rect;
use crate::dom::document::{Document, NodeId};

const LINE_HEIGHT: f64 = 24.0;
const INDENT: f64 = 8.0;

impl Document {
    /// Parse an HTML document
    pub fn from_html(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let mut doc = Document::new();
        let root = doc.root();
        let html_el = parsed.root_element();
        let html_id = doc.create_element(root, html_el.value().name(), attrs_of(html_el));

        let mut stack: Vec<(ElementRef, NodeId)> = vec![(html_el, html_id)];
        while let Some((element, parent)) = stack.pop() {
            for child in element.children() {
                if let Some(child_el) = ElementRef::wrap(child) {
                    let id = doc.create_element(parent, child_el.value().name(), attrs_of(child_el));
                    stack.push((child_el, id));
                } else if let Some(text) = child.value().as_text() {
                    if !text.trim().is_empty() {
                        doc.append_text(parent, text);
                    }
                }
            }
        }

        apply_layout(&mut doc);
        debug!(nodes = doc.node_count(), "parsed html document");
        doc
    }
}

fn attrs_of(element: ElementRef) -> Vec<(String, String)> {
    element
        .value()
        .attrs()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect()
}

fn parse_numbers(raw: &str) -> Vec<f64> {
    raw.split(',').filter_map(|n| n.trim().parse().ok()).collect()
}

/// Block-flow layout for elements without pinned geometry
fn apply_layout(doc: &mut Document) {
    let Some(html) = doc.document_element() else {
        return;
    };
    let width = doc.viewport().width;
    flow(doc, html, 0.0, 0.0, width);

    for node in doc.elements() {
        let extents = doc
            .attr(node, "data-scroll-size")
            .map(parse_numbers)
            .filter(|v| v.len() == 2);
        if let Some(extents) = extents {
            doc.set_scroll_extents(node, extents[0], extents[1]);
        }
    }
}

/// Lay out `node` at (x, y) and return the height it occupies
fn flow(doc: &mut Document, node: NodeId, x: f64, y: f64, width: f64) -> f64 {
    if !doc.is_displayed(node) {
        return 0.0;
    }
    let pinned = doc
        .attr(node, "data-rect")
        .map(parse_numbers)
        .filter(|v| v.len() == 4);

    let children = doc.element_children(node);
    let mut cursor = y;
    for child in children {
        cursor += flow(doc, child, x + INDENT, cursor, (width - 2.0 * INDENT).max(0.0));
    }
    let has_text = doc.own_text_nodes(node).iter().any(|t| !t.trim().is_empty());
    let mut height = cursor - y;
    if has_text || height == 0.0 {
        height += LINE_HEIGHT;
    }

    match pinned {
        Some(v) => {
            doc.set_rect(node, Rect::new(v[0], v[1], v[2], v[3]));
            // Pinned boxes sit outside the flow
            if doc.computed_style(node).is_pinned() {
                0.0
            } else {
                height
            }
        }
        None => {
            doc.set_rect(node, Rect::new(x, y, width, height));
            height
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structure() {
        let doc = Document::from_html(
            r#"<html><body><form id="f"><input id="q" value="x"><button>Go</button></form>
            <select id="c"><option>Uganda</option><option value="ca">Canada</option></select>
            </body></html>"#,
        );
        let q = doc.by_id("q").unwrap();
        assert_eq!(doc.value(q).as_deref(), Some("x"));
        let select = doc.by_id("c").unwrap();
        assert_eq!(doc.options(select).len(), 2);
        assert_eq!(doc.value(select).as_deref(), Some("Uganda"));
        let button = doc.query_selector("form button").unwrap().unwrap();
        assert_eq!(doc.text_content(button), "Go");
    }

    #[test]
    fn test_flow_layout_makes_elements_visible() {
        let doc = Document::from_html(
            r#"<body><p id="a">one</p><p id="b">two</p><p id="h" style="display:none">x</p></body>"#,
        );
        let a = doc.by_id("a").unwrap();
        let b = doc.by_id("b").unwrap();
        assert!(doc.is_visible(a));
        assert!(doc.rect(b).y > doc.rect(a).y);
        assert!(!doc.is_visible(doc.by_id("h").unwrap()));
    }

    #[test]
    fn test_layout_hints() {
        let doc = Document::from_html(
            r#"<body><div id="s" style="overflow:auto" data-rect="0,0,200,100" data-scroll-size="200,900"></div></body>"#,
        );
        let s = doc.by_id("s").unwrap();
        assert_eq!(doc.rect(s), Rect::new(0.0, 0.0, 200.0, 100.0));
        assert_eq!(doc.scroll_metrics(s).scroll_height, 900.0);
    }
}
