//! Element extraction
//!
//! Decides which elements are worth indexing and derives their entry:
//! text, role, interactability, selectors, attributes and accessibility.

use std::collections::BTreeMap;

use crate::core::config::IndexConfig;
use crate::core::{clamp_chars, Result};
use crate::dom::document::collapse_whitespace;
use crate::dom::xpath;
use crate::dom::{Document, NodeId};
use crate::index::entry::{
    Accessibility, IndexEntry, SelectorCandidate, SelectorKind, Usage,
};
use crate::index::identity::ElementIdentity;

/// Attributes copied into entries
pub const ALLOWED_ATTRIBUTES: &[&str] = &[
    "id",
    "class",
    "name",
    "type",
    "href",
    "src",
    "alt",
    "title",
    "placeholder",
    "value",
    "role",
    "for",
    "action",
    "method",
    "tabindex",
    "aria-label",
    "aria-expanded",
    "aria-haspopup",
    "aria-controls",
    "data-testid",
    "data-value",
];

const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "label", "summary", "option",
];

const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "textbox",
    "checkbox",
    "radio",
    "combobox",
    "listbox",
    "menuitem",
    "option",
    "tab",
    "switch",
    "searchbox",
    "slider",
    "spinbutton",
];

const MAX_TEXT_SELECTOR_LEN: usize = 50;

/// Turns a live element into an [`IndexEntry`]
pub trait ElementExtractor: Send + Sync {
    /// Whether `node` should be indexed at all
    fn is_candidate(&self, doc: &Document, node: NodeId) -> bool {
        is_candidate(doc, node)
    }

    fn extract(&self, doc: &Document, node: NodeId, config: &IndexConfig) -> Result<IndexEntry>;
}

/// Extractor reading straight from the document
#[derive(Debug, Clone, Copy, Default)]
pub struct DomExtractor;

impl ElementExtractor for DomExtractor {
    fn extract(&self, doc: &Document, node: NodeId, config: &IndexConfig) -> Result<IndexEntry> {
        let element = doc.require_element(node)?;
        let identity = ElementIdentity::compute(doc, node);
        let text = extract_text(doc, node, config.max_text_length);
        let (role, confidence) = infer_role(doc, node);
        let interactive = is_interactive(doc, node);
        let accessibility = accessibility(doc, node);

        let attributes: BTreeMap<String, String> = element
            .attrs()
            .filter(|(k, _)| ALLOWED_ATTRIBUTES.contains(k))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let priority = if interactive {
            2
        } else if heading_level(&element.tag_name).is_some() {
            1
        } else {
            0
        };

        Ok(IndexEntry {
            selectors: selector_candidates(doc, node, &text),
            tag_name: element.tag_name.clone(),
            position: doc.rect(node),
            visible: doc.is_visible(node),
            interactive,
            text,
            role,
            confidence,
            attributes,
            accessibility,
            usage: Usage {
                priority,
                ..Default::default()
            },
            node: Some(node),
            ..IndexEntry::minimal(identity)
        })
    }
}

/// Elements that carry meaning for discovery queries
pub fn is_candidate(doc: &Document, node: NodeId) -> bool {
    let Some(element) = doc.element(node) else {
        return false;
    };
    let tag = element.tag_name.as_str();
    if matches!(tag, "html" | "head" | "body" | "script" | "style" | "template" | "meta" | "link") {
        return false;
    }
    if INTERACTIVE_TAGS.contains(&tag)
        || matches!(tag, "video" | "audio" | "iframe" | "form" | "nav")
        || heading_level(tag).is_some()
    {
        return true;
    }
    if tag == "img" {
        return element.has_attr("alt");
    }
    if ["role", "tabindex", "onclick", "contenteditable", "data-testid"]
        .iter()
        .any(|a| element.has_attr(a))
    {
        return true;
    }
    // Text-bearing leaves
    doc.element_children(node).is_empty()
        && doc.own_text_nodes(node).iter().any(|t| !t.trim().is_empty())
}

fn heading_level(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Collapsed text with consecutive duplicate segments removed
pub fn extract_text(doc: &Document, node: NodeId, max_len: usize) -> String {
    let mut segments: Vec<String> = Vec::new();
    collect_segments(doc, node, &mut segments);
    segments.dedup();
    let mut text = segments.join(" ");
    if text.is_empty() {
        if let Some(element) = doc.element(node) {
            if matches!(element.tag_name.as_str(), "input" | "textarea") {
                text = element
                    .attr("placeholder")
                    .map(str::to_string)
                    .or_else(|| doc.value(node))
                    .unwrap_or_default();
            } else if element.tag_name == "img" {
                text = element.attr("alt").unwrap_or_default().to_string();
            }
        }
    }
    clamp_chars(&collapse_whitespace(&text), max_len)
}

fn collect_segments(doc: &Document, node: NodeId, out: &mut Vec<String>) {
    if matches!(doc.tag_name(node), Some("script" | "style" | "template")) {
        return;
    }
    for text in doc.own_text_nodes(node) {
        let collapsed = collapse_whitespace(text);
        if !collapsed.is_empty() {
            out.push(collapsed);
        }
    }
    for child in doc.element_children(node) {
        collect_segments(doc, child, out);
    }
}

/// Implicit ARIA role from tag and type
pub fn implicit_role(doc: &Document, node: NodeId) -> Option<&'static str> {
    let element = doc.element(node)?;
    let role = match element.tag_name.as_str() {
        "a" if element.has_attr("href") => "link",
        "button" | "summary" => "button",
        "input" => match element.input_type().as_deref() {
            Some("checkbox") => "checkbox",
            Some("radio") => "radio",
            Some("submit") | Some("button") | Some("reset") | Some("image") => "button",
            Some("search") => "searchbox",
            Some("range") => "slider",
            Some("number") => "spinbutton",
            Some("hidden") => return None,
            _ => "textbox",
        },
        "textarea" => "textbox",
        "select" => {
            if element.has_attr("multiple") {
                "listbox"
            } else {
                "combobox"
            }
        }
        "option" => "option",
        "img" => "img",
        "nav" => "navigation",
        "form" => "form",
        "ul" | "ol" => "list",
        "li" => "listitem",
        "table" => "table",
        "dialog" => "dialog",
        tag if heading_level(tag).is_some() => "heading",
        _ => return None,
    };
    Some(role)
}

/// Role with confidence: explicit 1.0, implicit 0.8, generic 0.5
pub fn infer_role(doc: &Document, node: NodeId) -> (String, f64) {
    if let Some(explicit) = doc
        .attr(node, "role")
        .and_then(|r| r.split_whitespace().next())
    {
        return (explicit.to_ascii_lowercase(), 1.0);
    }
    match implicit_role(doc, node) {
        Some(role) => (role.to_string(), 0.8),
        None => ("generic".to_string(), 0.5),
    }
}

/// Whether a user can act on the element
pub fn is_interactive(doc: &Document, node: NodeId) -> bool {
    let Some(element) = doc.element(node) else {
        return false;
    };
    if element.is_disabled() {
        return false;
    }
    let tag = element.tag_name.as_str();
    if tag == "input" && element.input_type().as_deref() == Some("hidden") {
        return false;
    }
    if tag == "a" {
        return element.has_attr("href") || element.has_attr("onclick");
    }
    if INTERACTIVE_TAGS.contains(&tag) {
        return true;
    }
    let (role, _) = infer_role(doc, node);
    if INTERACTIVE_ROLES.contains(&role.as_str()) {
        return true;
    }
    let focusable = element
        .attr("tabindex")
        .and_then(|t| t.trim().parse::<i32>().ok())
        .is_some_and(|t| t >= 0);
    focusable
        || element.has_attr("onclick")
        || element.is_text_entry()
        || doc.computed_style(node).cursor == "pointer"
}

fn is_ident(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with(|c: char| c.is_ascii_digit())
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn css_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Ranked ways to find the element again
pub fn selector_candidates(doc: &Document, node: NodeId, text: &str) -> Vec<SelectorCandidate> {
    let Some(element) = doc.element(node) else {
        return Vec::new();
    };
    let tag = element.tag_name.as_str();
    let mut out = Vec::new();
    let mut push = |kind, value: String, priority, confidence| {
        out.push(SelectorCandidate {
            kind,
            value,
            priority,
            confidence,
        })
    };

    if let Some(id) = element.id() {
        let selector = if is_ident(id) {
            format!("#{}", id)
        } else {
            format!("[id={}]", css_string(id))
        };
        let unique = doc.ids_count(id) == 1;
        push(SelectorKind::Css, selector, 1, if unique { 0.95 } else { 0.6 });
    }
    if let Some(test_id) = element.attr("data-testid") {
        push(
            SelectorKind::Css,
            format!("[data-testid={}]", css_string(test_id)),
            2,
            0.9,
        );
    }
    if let Some(name) = element.attr("name") {
        push(
            SelectorKind::Css,
            format!("{}[name={}]", tag, css_string(name)),
            3,
            0.85,
        );
    }
    if let Some(label) = element.attr("aria-label") {
        push(
            SelectorKind::Css,
            format!("{}[aria-label={}]", tag, css_string(label)),
            4,
            0.8,
        );
    }
    let classes: Vec<&str> = element.classes().filter(|c| is_ident(c)).take(3).collect();
    if !classes.is_empty() {
        push(
            SelectorKind::Css,
            format!("{}.{}", tag, classes.join(".")),
            5,
            0.6,
        );
    }
    push(SelectorKind::XPath, doc.xpath_of(node), 6, 0.7);
    if !text.is_empty() && text.chars().count() <= MAX_TEXT_SELECTOR_LEN {
        if let Some(literal) = xpath::literal(text) {
            push(
                SelectorKind::XPath,
                format!("//{}[normalize-space(.)={}]", tag, literal),
                7,
                0.65,
            );
        }
        push(SelectorKind::Text, text.to_string(), 8, 0.5);
    }

    out.sort_by_key(|c| c.priority);
    out
}

fn text_of_ids(doc: &Document, ids: &str) -> Option<String> {
    let text = ids
        .split_whitespace()
        .filter_map(|id| doc.by_id(id))
        .map(|n| collapse_whitespace(&doc.text_content(n)))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn parse_bool(value: Option<&str>) -> Option<bool> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Accessible name and states
pub fn accessibility(doc: &Document, node: NodeId) -> Accessibility {
    let Some(element) = doc.element(node) else {
        return Accessibility::default();
    };

    let label = element
        .attr("aria-label")
        .map(collapse_whitespace)
        .filter(|l| !l.is_empty())
        .or_else(|| element.attr("aria-labelledby").and_then(|ids| text_of_ids(doc, ids)))
        .or_else(|| {
            let label = *doc.labels_for(element.id()?).first()?;
            Some(collapse_whitespace(&doc.text_content(label)))
        })
        .or_else(|| {
            doc.ancestors(node)
                .into_iter()
                .find(|a| doc.tag_name(*a) == Some("label"))
                .map(|l| collapse_whitespace(&doc.text_content(l)))
        })
        .or_else(|| {
            ["alt", "title", "placeholder"]
                .iter()
                .find_map(|a| element.attr(a))
                .map(collapse_whitespace)
        })
        .filter(|l| !l.is_empty());

    let description = element
        .attr("aria-description")
        .map(collapse_whitespace)
        .or_else(|| element.attr("aria-describedby").and_then(|ids| text_of_ids(doc, ids)))
        .or_else(|| {
            // title already serves as the label when nothing else does
            let title = element.attr("title")?;
            (label.as_deref() != Some(title)).then(|| collapse_whitespace(title))
        });

    let checked = if element.is_checkable() {
        Some(doc.checked(node))
    } else {
        parse_bool(element.attr("aria-checked"))
    };

    let level = heading_level(&element.tag_name).or_else(|| {
        element
            .attr("aria-level")
            .and_then(|l| l.trim().parse().ok())
    });

    Accessibility {
        label,
        description,
        expanded: parse_bool(element.attr("aria-expanded")),
        checked,
        disabled: element.is_disabled() || parse_bool(element.attr("aria-disabled")) == Some(true),
        required: element.has_attr("required")
            || parse_bool(element.attr("aria-required")) == Some(true),
        hidden: parse_bool(element.attr("aria-hidden")) == Some(true) || !doc.is_displayed(node),
        level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Rect;

    fn config() -> IndexConfig {
        IndexConfig::default()
    }

    #[test]
    fn test_extract_button() {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let button = doc.append_element(
            body,
            "button",
            &[("id", "contact"), ("class", "btn primary"), ("onclick", "x()")],
        );
        doc.append_text(button, "Contact   us");
        doc.set_rect(button, Rect::new(5.0, 5.0, 100.0, 30.0));

        let entry = DomExtractor.extract(&doc, button, &config()).unwrap();
        assert_eq!(entry.identity.as_str(), "button#contact.btn.primary@5,5");
        assert_eq!(entry.text, "Contact us");
        assert_eq!(entry.role, "button");
        assert_eq!(entry.confidence, 0.8);
        assert!(entry.visible);
        assert!(entry.interactive);
        assert_eq!(entry.selectors[0].value, "#contact");
        assert_eq!(entry.selectors[0].confidence, 0.95);
        assert!(entry.selectors.windows(2).all(|w| w[0].priority <= w[1].priority));
        assert!(entry.attributes.contains_key("class"));
        assert!(!entry.attributes.contains_key("onclick"));
    }

    #[test]
    fn test_text_dedupe_and_clamp() {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let div = doc.append_element(body, "div", &[]);
        let a = doc.append_element(div, "span", &[]);
        doc.append_text(a, "Save");
        let b = doc.append_element(div, "span", &[]);
        doc.append_text(b, " Save ");
        let c = doc.append_element(div, "span", &[]);
        doc.append_text(c, "changes");
        assert_eq!(extract_text(&doc, div, 200), "Save changes");
        assert_eq!(extract_text(&doc, div, 4), "Save");
    }

    #[test]
    fn test_role_inference() {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let explicit = doc.append_element(body, "div", &[("role", "tab")]);
        let implicit = doc.append_element(body, "input", &[("type", "checkbox")]);
        let generic = doc.append_element(body, "span", &[]);
        assert_eq!(infer_role(&doc, explicit), ("tab".to_string(), 1.0));
        assert_eq!(infer_role(&doc, implicit), ("checkbox".to_string(), 0.8));
        assert_eq!(infer_role(&doc, generic), ("generic".to_string(), 0.5));
        assert!(is_interactive(&doc, explicit));
    }

    #[test]
    fn test_accessibility_label_from_label_for() {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let label = doc.append_element(body, "label", &[("for", "email")]);
        doc.append_text(label, "Email address");
        let input = doc.append_element(
            body,
            "input",
            &[("id", "email"), ("required", ""), ("aria-expanded", "false")],
        );
        let a11y = accessibility(&doc, input);
        assert_eq!(a11y.label.as_deref(), Some("Email address"));
        assert!(a11y.required);
        assert_eq!(a11y.expanded, Some(false));
        assert!(!a11y.hidden);
    }

    #[test]
    fn test_candidates() {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let p = doc.append_element(body, "p", &[]);
        doc.append_text(p, "hello");
        let wrapper = doc.append_element(body, "div", &[]);
        assert!(is_candidate(&doc, p));
        assert!(!is_candidate(&doc, wrapper));
        assert!(!is_candidate(&doc, body));
    }
}
