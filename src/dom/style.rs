//! Inline style parsing and the small computed-style model used for
//! visibility and scroll classification.

use std::collections::HashMap;

use crate::dom::document::Element;

/// Parse a `style` attribute into lowercase property/value pairs
pub fn parse_declarations(style: &str) -> HashMap<String, String> {
    style
        .split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let prop = prop.trim().to_ascii_lowercase();
            let value = value.trim().trim_end_matches("!important").trim().to_string();
            (!prop.is_empty() && !value.is_empty()).then_some((prop, value))
        })
        .collect()
}

/// Resolved style properties of one element
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: f64,
    pub overflow_x: String,
    pub overflow_y: String,
    pub position: String,
    pub cursor: String,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            opacity: 1.0,
            overflow_x: "visible".to_string(),
            overflow_y: "visible".to_string(),
            position: "static".to_string(),
            cursor: "auto".to_string(),
        }
    }
}

impl ComputedStyle {
    /// Tag defaults overlaid with the element's inline/overridden style
    pub fn for_element(element: &Element) -> Self {
        let mut style = Self::default();
        if matches!(
            element.tag_name.as_str(),
            "head" | "script" | "style" | "template" | "meta" | "link" | "title" | "noscript"
        ) || element.has_attr("hidden")
            || element.input_type().as_deref() == Some("hidden")
        {
            style.display = "none".to_string();
        }
        if matches!(element.tag_name.as_str(), "a" | "button" | "summary") {
            style.cursor = "pointer".to_string();
        }

        let declared = &element.state.style;
        if let Some(display) = declared.get("display") {
            style.display = display.to_ascii_lowercase();
        }
        if let Some(visibility) = declared.get("visibility") {
            style.visibility = visibility.to_ascii_lowercase();
        }
        if let Some(opacity) = declared.get("opacity").and_then(|o| o.parse().ok()) {
            style.opacity = opacity;
        }
        if let Some(overflow) = declared.get("overflow") {
            let mut parts = overflow.split_whitespace();
            let x = parts.next().unwrap_or("visible").to_ascii_lowercase();
            let y = parts.next().map(str::to_ascii_lowercase).unwrap_or_else(|| x.clone());
            style.overflow_x = x;
            style.overflow_y = y;
        }
        if let Some(x) = declared.get("overflow-x") {
            style.overflow_x = x.to_ascii_lowercase();
        }
        if let Some(y) = declared.get("overflow-y") {
            style.overflow_y = y.to_ascii_lowercase();
        }
        if let Some(position) = declared.get("position") {
            style.position = position.to_ascii_lowercase();
        }
        if let Some(cursor) = declared.get("cursor") {
            style.cursor = cursor.to_ascii_lowercase();
        }
        style
    }

    pub fn scrolls_x(&self) -> bool {
        is_scrolling_overflow(&self.overflow_x)
    }

    pub fn scrolls_y(&self) -> bool {
        is_scrolling_overflow(&self.overflow_y)
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self.position.as_str(), "sticky" | "fixed")
    }
}

fn is_scrolling_overflow(value: &str) -> bool {
    matches!(value, "auto" | "scroll" | "overlay")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_declarations() {
        let decls = parse_declarations("display: none; Overflow-Y : auto !important;;bad");
        assert_eq!(decls.get("display").map(String::as_str), Some("none"));
        assert_eq!(decls.get("overflow-y").map(String::as_str), Some("auto"));
        assert_eq!(decls.len(), 2);
    }
}
