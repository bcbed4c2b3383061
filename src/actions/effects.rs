//! DOM effects applied by the executor
//!
//! Each effect mutates the document under the write lock and announces the
//! resulting events after the lock is released.

use tracing::debug;

use crate::core::{PilotError, Result};
use crate::dom::document::collapse_whitespace;
use crate::dom::{Document, EventKind, NodeId, Page};

fn require_enabled(doc: &Document, node: NodeId) -> Result<()> {
    if doc.require_element(node)?.is_disabled() {
        return Err(PilotError::action("Element is disabled"));
    }
    if !doc.is_connected(node) {
        return Err(PilotError::action("Element is no longer attached to the page"));
    }
    Ok(())
}

fn is_submit_control(doc: &Document, node: NodeId) -> bool {
    let Some(element) = doc.element(node) else {
        return false;
    };
    match element.tag_name.as_str() {
        "button" => matches!(element.attr("type"), None | Some("submit")),
        "input" => matches!(element.input_type().as_deref(), Some("submit") | Some("image")),
        _ => false,
    }
}

/// Primary activation: pointer events, click, and the default action
pub fn click(page: &Page, node: NodeId) -> Result<()> {
    let (toggled, form, link) = page.mutate(|doc| -> Result<_> {
        require_enabled(doc, node)?;
        let element = doc.require_element(node)?;
        let checkable = element.is_checkable();
        let is_radio = element.input_type().as_deref() == Some("radio");
        let toggled = if checkable {
            let next = is_radio || !doc.checked(node);
            let changed = next != doc.checked(node);
            doc.set_checked(node, next)?;
            changed
        } else {
            false
        };
        doc.set_focused(Some(node));
        let form = if is_submit_control(doc, node) {
            doc.closest(node, "form")?
        } else {
            None
        };
        let link = match (doc.tag_name(node), doc.attr(node, "href")) {
            (Some("a"), Some(href))
                if !href.is_empty() && !href.starts_with('#') && !href.starts_with("javascript:") =>
            {
                Some(href.to_string())
            }
            _ => None,
        };
        Ok((toggled, form, link))
    })?;

    for kind in [EventKind::MouseDown, EventKind::MouseUp, EventKind::Click] {
        page.dispatch(kind, node);
    }
    if toggled {
        page.dispatch(EventKind::Input, node);
        page.dispatch(EventKind::Change, node);
    }
    if let Some(form) = form {
        page.dispatch(EventKind::Submit, form);
    }
    if let Some(href) = link {
        navigate(page, &href)?;
    }
    Ok(())
}

pub fn focus(page: &Page, node: NodeId) -> Result<()> {
    let previous = page.mutate(|doc| -> Result<_> {
        doc.require_element(node)?;
        let previous = doc.focused().filter(|p| *p != node);
        doc.set_focused(Some(node));
        Ok(previous)
    })?;
    if let Some(previous) = previous {
        page.dispatch(EventKind::Blur, previous);
    }
    page.dispatch(EventKind::Focus, node);
    Ok(())
}

pub fn hover(page: &Page, node: NodeId) -> Result<()> {
    page.read().require_element(node)?;
    page.dispatch(EventKind::MouseEnter, node);
    page.dispatch(EventKind::MouseOver, node);
    Ok(())
}

/// Focus, optionally clear, set the value and fire input/change/keyup.
/// Returns the resulting value.
pub fn type_text(page: &Page, node: NodeId, text: &str, clear: bool) -> Result<String> {
    {
        let doc = page.read();
        require_enabled(&doc, node)?;
        if !doc.require_element(node)?.is_text_entry() {
            return Err(PilotError::action(format!(
                "Element <{}> does not accept text input",
                doc.tag_name(node).unwrap_or("?")
            )));
        }
    }
    focus(page, node)?;
    let value = page.mutate(|doc| -> Result<String> {
        let value = if clear {
            text.to_string()
        } else {
            format!("{}{}", doc.value(node).unwrap_or_default(), text)
        };
        doc.set_value(node, &value)?;
        Ok(value)
    })?;
    for kind in [EventKind::Input, EventKind::Change, EventKind::KeyUp] {
        page.dispatch(kind, node);
    }
    debug!(%node, chars = text.chars().count(), "typed text");
    Ok(value)
}

pub fn clear(page: &Page, node: NodeId) -> Result<()> {
    page.mutate(|doc| -> Result<()> {
        require_enabled(doc, node)?;
        if !doc.require_element(node)?.is_text_entry() {
            return Err(PilotError::action("Element cannot be cleared"));
        }
        doc.set_value(node, "")
    })?;
    page.dispatch(EventKind::Input, node);
    page.dispatch(EventKind::Change, node);
    Ok(())
}

/// Check or uncheck a checkbox/radio. Returns whether the state changed.
pub fn set_checked(page: &Page, node: NodeId, checked: bool) -> Result<bool> {
    let changed = page.mutate(|doc| -> Result<bool> {
        require_enabled(doc, node)?;
        let changed = doc.checked(node) != checked;
        doc.set_checked(node, checked)?;
        Ok(changed)
    })?;
    if changed {
        page.dispatch(EventKind::Click, node);
        page.dispatch(EventKind::Input, node);
        page.dispatch(EventKind::Change, node);
    }
    Ok(changed)
}

/// How a submit was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitVia {
    Form,
    AncestorForm,
    Click,
}

pub fn submit(page: &Page, node: NodeId) -> Result<SubmitVia> {
    let form = {
        let doc = page.read();
        doc.require_element(node)?;
        if doc.tag_name(node) == Some("form") {
            Some((node, SubmitVia::Form))
        } else {
            doc.closest(node, "form")?.map(|f| (f, SubmitVia::AncestorForm))
        }
    };
    match form {
        Some((form, via)) => {
            page.dispatch(EventKind::Submit, form);
            Ok(via)
        }
        None => {
            click(page, node)?;
            Ok(SubmitVia::Click)
        }
    }
}

/// Scroll `node` into view through every enclosing container
pub fn scroll_into_view(page: &Page, node: NodeId) -> Result<()> {
    let scrolled = page.mutate(|doc| -> Result<Vec<NodeId>> {
        doc.require_element(node)?;
        Ok(doc.scroll_into_view(node))
    })?;
    for target in scrolled {
        page.dispatch(EventKind::Scroll, target);
    }
    Ok(())
}

/// Scroll the window by `amount` pixels in `direction`. Returns the new
/// window offsets.
pub fn scroll_window(page: &Page, direction: &str, amount: f64) -> Result<(f64, f64)> {
    let offsets = page.mutate(|doc| -> Result<(f64, f64)> {
        let viewport = doc.viewport();
        let (x, y) = (viewport.scroll_x, viewport.scroll_y);
        let (width, height) = doc.document_size();
        let target = match direction.to_ascii_lowercase().as_str() {
            "down" => (x, y + amount),
            "up" => (x, y - amount),
            "right" => (x + amount, y),
            "left" => (x - amount, y),
            "top" => (x, 0.0),
            "bottom" => (x, height),
            "end" => (width, height),
            other => {
                return Err(PilotError::action(format!("Unknown scroll direction '{}'", other)))
            }
        };
        doc.scroll_window_to(target.0, target.1);
        let viewport = doc.viewport();
        Ok((viewport.scroll_x, viewport.scroll_y))
    })?;
    let root = page.read().root();
    page.dispatch(EventKind::Scroll, root);
    Ok(offsets)
}

/// Navigate the page, resolving `target` against the current location
pub fn navigate(page: &Page, target: &str) -> Result<String> {
    let location = page.mutate(|doc| doc.navigate(target))?;
    let root = page.read().root();
    page.dispatch(EventKind::Navigate, root);
    Ok(location)
}

/// Current form value of a control
pub fn read_value(doc: &Document, node: NodeId) -> Result<String> {
    doc.require_element(node)?;
    doc.value(node)
        .ok_or_else(|| PilotError::action("Element has no value"))
}

/// Visible text of an element; form controls report their value
pub fn read_text(doc: &Document, node: NodeId) -> Result<String> {
    let element = doc.require_element(node)?;
    if element.is_form_control() && element.tag_name != "button" && element.tag_name != "option" {
        return Ok(doc.value(node).unwrap_or_default());
    }
    Ok(collapse_whitespace(&doc.text_content(node)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::EventFilter;

    fn page() -> (Page, NodeId, NodeId, NodeId) {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let form = doc.append_element(body, "form", &[("id", "signup")]);
        let input = doc.append_element(form, "input", &[("id", "email"), ("value", "old")]);
        let checkbox = doc.append_element(form, "input", &[("type", "checkbox"), ("id", "terms")]);
        (Page::new(doc), form, input, checkbox)
    }

    #[test]
    fn test_type_fires_events_in_order() {
        let (page, _, input, _) = page();
        let (_sub, mut rx) = page.events().subscribe(EventFilter::default().on(input));
        assert_eq!(type_text(&page, input, "a@b.c", true).unwrap(), "a@b.c");
        let kinds: Vec<EventKind> = std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Focus, EventKind::Input, EventKind::Change, EventKind::KeyUp]
        );
        assert_eq!(type_text(&page, input, "!", false).unwrap(), "a@b.c!");
        assert_eq!(page.read().focused(), Some(input));
    }

    #[test]
    fn test_type_rejects_non_text_targets() {
        let (page, form, _, checkbox) = page();
        assert!(type_text(&page, checkbox, "x", true).is_err());
        assert!(type_text(&page, form, "x", true).is_err());
    }

    #[test]
    fn test_click_toggles_checkbox() {
        let (page, _, _, checkbox) = page();
        click(&page, checkbox).unwrap();
        assert!(page.read().checked(checkbox));
        click(&page, checkbox).unwrap();
        assert!(!page.read().checked(checkbox));
        assert!(set_checked(&page, checkbox, true).unwrap());
        assert!(!set_checked(&page, checkbox, true).unwrap());
    }

    #[test]
    fn test_submit_prefers_enclosing_form() {
        let (page, form, input, _) = page();
        let (_sub, mut rx) = page.events().subscribe(EventFilter::kinds([EventKind::Submit]));
        assert_eq!(submit(&page, form).unwrap(), SubmitVia::Form);
        assert_eq!(submit(&page, input).unwrap(), SubmitVia::AncestorForm);
        assert_eq!(rx.try_recv().unwrap().target, form);
        let body = page.read().body().unwrap();
        assert_eq!(submit(&page, body).unwrap(), SubmitVia::Click);
    }

    #[test]
    fn test_disabled_elements_refuse_effects() {
        let (page, _, input, _) = page();
        page.write().set_attr(input, "disabled", "");
        assert!(click(&page, input).is_err());
        assert!(clear(&page, input).is_err());
    }

    #[test]
    fn test_window_scroll_and_navigation() {
        let (page, form, _, _) = page();
        page.write().set_rect(form, crate::core::Rect::new(0.0, 0.0, 800.0, 3000.0));
        page.write().set_viewport_size(800.0, 600.0);
        assert_eq!(scroll_window(&page, "down", 300.0).unwrap(), (0.0, 300.0));
        assert_eq!(scroll_window(&page, "bottom", 0.0).unwrap(), (0.0, 2400.0));
        assert!(scroll_window(&page, "sideways", 10.0).is_err());

        page.write().set_location("https://shop.example/cart");
        assert_eq!(navigate(&page, "/checkout").unwrap(), "https://shop.example/checkout");
    }
}
