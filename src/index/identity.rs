//! Element identity
//!
//! `tag#id.c1.c2.c3@left,top`: tag name, declared id, up to three classes
//! and the layout offset rounded to whole pixels. Identities are recomputed
//! on every scan and never persisted.

use serde::{Deserialize, Serialize};

use crate::core::clamp_chars;
use crate::dom::{Document, NodeId};

const MAX_CLASSES: usize = 3;
const MAX_CLASS_LEN: usize = 32;

/// Derived key correlating a live element with its cached entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementIdentity(String);

impl ElementIdentity {
    /// Identity of the window/document scroll container
    pub fn document() -> Self {
        Self("#document".to_string())
    }

    /// Compute the identity of `node`. Never fails; non-elements get an
    /// arena-based key.
    pub fn compute(doc: &Document, node: NodeId) -> Self {
        let Some(element) = doc.element(node) else {
            return Self(format!("#node{}", node.index()));
        };
        let mut key = element.tag_name.clone();
        key.push('#');
        key.push_str(element.id().unwrap_or_default());
        for class in element.classes().take(MAX_CLASSES) {
            key.push('.');
            key.push_str(&clamp_chars(class, MAX_CLASS_LEN));
        }
        let rect = doc.rect(node);
        key.push_str(&format!("@{},{}", rect.x.round() as i64, rect.y.round() as i64));
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tag name part of the key
    pub fn tag(&self) -> &str {
        self.0.split(['#', '@']).next().unwrap_or_default()
    }
}

impl std::fmt::Display for ElementIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ElementIdentity {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for ElementIdentity {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Rect;

    #[test]
    fn test_identity_format() {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let long = "x".repeat(40);
        let button = doc.append_element(
            body,
            "BUTTON",
            &[("id", "go"), ("class", &format!("a b {} d", long))],
        );
        doc.set_rect(button, Rect::new(10.4, 20.6, 50.0, 10.0));
        let identity = ElementIdentity::compute(&doc, button);
        assert_eq!(
            identity.as_str(),
            format!("button#go.a.b.{}@10,21", "x".repeat(32))
        );
        assert_eq!(identity.tag(), "button");
    }

    #[test]
    fn test_identity_is_stable_and_distinct() {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let a = doc.append_element(body, "li", &[]);
        let b = doc.append_element(body, "li", &[]);
        doc.set_rect(a, Rect::new(0.0, 0.0, 10.0, 10.0));
        doc.set_rect(b, Rect::new(0.0, 10.0, 10.0, 10.0));
        assert_eq!(ElementIdentity::compute(&doc, a), ElementIdentity::compute(&doc, a));
        assert_ne!(ElementIdentity::compute(&doc, a), ElementIdentity::compute(&doc, b));
    }
}
