//! Smart select
//!
//! A select target is classified once into [`SelectTarget`] and then
//! handled per variant. Native `<select>` elements are matched by exact text,
//! exact value, partial text, then partial value. Custom dropdowns are
//! driven open -> search -> pick, and any failed step falls back to a plain
//! click on the control with a warning.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::actions::command::Command;
use crate::actions::effects;
use crate::core::config::ExecutorConfig;
use crate::core::{PilotError, Result};
use crate::dom::document::collapse_whitespace;
use crate::dom::{Document, EventKind, NodeId, Page};

/// Text inputs that typically appear when a custom dropdown opens
pub const SEARCH_INPUT_SELECTORS: &[&str] = &[
    "input[type=\"search\"]",
    "[role=\"searchbox\"]",
    "input[role=\"combobox\"]",
    "input[aria-autocomplete]",
    ".select2-search__field",
    ".chosen-search input",
    ".choices__input--cloned",
    "input[class*=\"search\"]",
    "input[placeholder*=\"Search\"]",
    "input[placeholder*=\"search\"]",
];

/// Rendered options of custom dropdowns
pub const OPTION_SELECTORS: &[&str] = &[
    "[role=\"option\"]",
    ".select2-results__option",
    ".chosen-results li",
    ".choices__item--choice",
    ".dropdown-item",
    "ul[role=\"listbox\"] li",
    "li[class*=\"option\"]",
    "div[class*=\"option\"]",
    "[data-value]",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectTarget {
    NativeSelect(NodeId),
    CustomDropdown(NodeId),
    Unresolvable,
}

/// Decide how a resolved select target should be driven
pub fn classify_select_target(doc: &Document, node: Option<NodeId>) -> SelectTarget {
    let Some(node) = node.filter(|n| doc.is_element(*n)) else {
        return SelectTarget::Unresolvable;
    };
    if doc.tag_name(node) == Some("select") {
        return SelectTarget::NativeSelect(node);
    }
    // Labels and wrappers around a single native select
    let nested: Vec<NodeId> = doc
        .descendant_elements(node)
        .into_iter()
        .filter(|d| doc.tag_name(*d) == Some("select"))
        .collect();
    if let [select] = nested.as_slice() {
        return SelectTarget::NativeSelect(*select);
    }
    if doc.tag_name(node) == Some("label") {
        if let Some(select) = doc
            .attr(node, "for")
            .and_then(|id| doc.by_id(id))
            .filter(|n| doc.tag_name(*n) == Some("select"))
        {
            return SelectTarget::NativeSelect(select);
        }
    }
    SelectTarget::CustomDropdown(node)
}

/// What a select ended up choosing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOutcome {
    pub message: String,
    pub selected_option: Option<String>,
    pub selected_value: Option<String>,
    pub warning: Option<String>,
}

fn normalize(text: &str) -> String {
    collapse_whitespace(text).to_lowercase()
}

/// Index of the option matching `target`: exact text, exact value, partial
/// text, partial value
pub fn match_option(doc: &Document, options: &[NodeId], target: &str) -> Option<usize> {
    let wanted = normalize(target);
    if wanted.is_empty() {
        return None;
    }
    let labels: Vec<(String, String)> = options
        .iter()
        .map(|o| (normalize(&doc.text_content(*o)), normalize(&doc.option_value(*o))))
        .collect();
    labels
        .iter()
        .position(|(text, _)| *text == wanted)
        .or_else(|| labels.iter().position(|(_, value)| *value == wanted))
        .or_else(|| labels.iter().position(|(text, _)| text.contains(&wanted)))
        .or_else(|| {
            labels
                .iter()
                .position(|(_, value)| !value.is_empty() && value.contains(&wanted))
        })
}

/// Commit an option of a native `<select>` and fire input + change
pub fn select_native(page: &Page, select: NodeId, target: &str) -> Result<SelectOutcome> {
    let (text, value) = page.mutate(|doc| -> Result<(String, String)> {
        if doc.require_element(select)?.is_disabled() {
            return Err(PilotError::action("Select element is disabled"));
        }
        let options = doc.options(select);
        let Some(index) = match_option(doc, &options, target) else {
            let available: Vec<String> = options
                .iter()
                .map(|o| collapse_whitespace(&doc.text_content(*o)))
                .collect();
            return Err(PilotError::action(format!(
                "Option \"{}\" not found. Available options: {}",
                target,
                available.join(", ")
            )));
        };
        doc.select_index(select, index)?;
        let option = options[index];
        Ok((collapse_whitespace(&doc.text_content(option)), doc.option_value(option)))
    })?;
    page.dispatch(EventKind::Input, select);
    page.dispatch(EventKind::Change, select);
    Ok(SelectOutcome {
        message: format!("Selected \"{}\"", text),
        selected_option: Some(text),
        selected_value: Some(value),
        warning: None,
    })
}

fn first_visible(doc: &Document, selectors: &[&str], exclude: NodeId) -> Option<NodeId> {
    selectors.iter().find_map(|selector| {
        doc.query_selector_all(selector)
            .ok()?
            .into_iter()
            .find(|n| *n != exclude && doc.is_visible(*n))
    })
}

/// Labels an option may be known by: text, data-value, aria-label, value
fn option_labels(doc: &Document, node: NodeId) -> Vec<String> {
    let mut labels = vec![normalize(&doc.text_content(node))];
    for attr in ["data-value", "aria-label", "value"] {
        if let Some(value) = doc.attr(node, attr) {
            labels.push(normalize(value));
        }
    }
    labels.retain(|l| !l.is_empty());
    labels
}

/// Visible rendered option that matches `target` exactly, else by substring
pub fn best_option(doc: &Document, target: &str, exclude: NodeId) -> Option<NodeId> {
    let wanted = normalize(target);
    let mut candidates: Vec<NodeId> = Vec::new();
    for selector in OPTION_SELECTORS {
        let Ok(found) = doc.query_selector_all(selector) else {
            continue;
        };
        for node in found {
            if node != exclude && doc.is_visible(node) && !candidates.contains(&node) {
                candidates.push(node);
            }
        }
    }
    let labelled: Vec<(NodeId, Vec<String>)> = candidates
        .into_iter()
        .map(|n| (n, option_labels(doc, n)))
        .collect();
    labelled
        .iter()
        .find(|(_, labels)| labels.iter().any(|l| *l == wanted))
        .or_else(|| {
            labelled
                .iter()
                .find(|(_, labels)| labels.iter().any(|l| l.contains(&wanted)))
        })
        .map(|(n, _)| *n)
}

/// Poll the document until `lookup` finds something or the wait runs out
async fn wait_for<T>(
    page: &Page,
    wait: Duration,
    poll: Duration,
    lookup: impl Fn(&Document) -> Option<T>,
) -> Option<T> {
    let deadline = Instant::now() + wait;
    loop {
        if let Some(found) = lookup(&page.read()) {
            return Some(found);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(poll.min(deadline - Instant::now())).await;
    }
}

async fn drive_custom_dropdown(
    page: &Page,
    control: NodeId,
    target: &str,
    config: &ExecutorConfig,
) -> Result<SelectOutcome> {
    let wait = Duration::from_millis(config.dropdown_wait_ms);
    let poll = Duration::from_millis(config.dropdown_poll_ms.max(1));

    effects::click(page, control)?;
    let input = wait_for(page, wait, poll, |doc| {
        first_visible(doc, SEARCH_INPUT_SELECTORS, control)
    })
    .await
    .ok_or_else(|| PilotError::action("no search input appeared after opening"))?;
    effects::type_text(page, input, target, true)?;

    let option = wait_for(page, wait, poll, |doc| best_option(doc, target, control))
        .await
        .ok_or_else(|| PilotError::action(format!("no option matching \"{}\" appeared", target)))?;
    let (text, value) = {
        let doc = page.read();
        let text = collapse_whitespace(&doc.text_content(option));
        let value = doc
            .attr(option, "data-value")
            .or_else(|| doc.attr(option, "value"))
            .map(str::to_string)
            .unwrap_or_else(|| text.clone());
        (text, value)
    };
    effects::click(page, option)?;
    Ok(SelectOutcome {
        message: format!("Selected \"{}\" from custom dropdown", text),
        selected_option: Some(text),
        selected_value: Some(value),
        warning: None,
    })
}

/// Drive a non-native dropdown. Never fails outright: a failed step
/// degrades to clicking the control and reporting a warning.
pub async fn handle_custom_dropdown(
    page: &Page,
    control: NodeId,
    target: &str,
    config: &ExecutorConfig,
) -> SelectOutcome {
    match drive_custom_dropdown(page, control, target, config).await {
        Ok(outcome) => outcome,
        Err(step) => {
            warn!(%control, target, error = %step, "custom dropdown fell back to a plain click");
            if let Err(e) = effects::click(page, control) {
                warn!(%control, error = %e, "fallback click failed");
            }
            SelectOutcome {
                message: "Clicked dropdown control".to_string(),
                selected_option: None,
                selected_value: None,
                warning: Some(format!(
                    "Could not pick \"{}\" from custom dropdown ({}); clicked the control instead",
                    target, step
                )),
            }
        }
    }
}

static SELECT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bselect\s+(?:the\s+)?["']?(.+?)["']?\s+(?:from|in|on)\b"#).unwrap()
});
static SELECT_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bselect\s+(?:the\s+)?["']?(.+?)["']?\s*$"#).unwrap());
static CHOOSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bchoose\s+(?:the\s+)?["']?(.+?)["']?(?:\s+(?:from|in|on)\b.*)?$"#).unwrap()
});
static PICK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bpick\s+(?:the\s+)?["']?(.+?)["']?(?:\s+(?:from|in|on)\b.*)?$"#).unwrap()
});
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["“']([^"”']+)["”']"#).unwrap());
static CAPITALIZED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][\w-]*(?:\s+[A-Z][\w-]*)*)").unwrap());

const CAPITALIZED_STOPWORDS: &[&str] = &[
    "select", "choose", "pick", "please", "the", "from", "option", "dropdown", "set", "i",
];

fn tidy(found: &str) -> Option<String> {
    let trimmed = found
        .trim()
        .trim_end_matches(['.', ',', '!', '?', ';'])
        .trim_matches(['"', '\'', '“', '”'])
        .trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// The option a select command is after.
///
/// Tries the explicit value, then `select X (from)`, `choose X`, `pick X`
/// over the instruction text, then a quoted substring, then the first run
/// of capitalized words.
pub fn extract_target_value(command: &Command) -> Option<String> {
    if let Some(value) = command.value_str().and_then(|v| tidy(&v)) {
        return Some(value);
    }
    let instruction = command
        .description
        .as_deref()
        .or(command.text.as_deref())?;

    for pattern in [&SELECT_FROM, &SELECT_TAIL, &CHOOSE, &PICK, &QUOTED] {
        if let Some(found) = pattern
            .captures(instruction)
            .and_then(|c| c.get(1))
            .and_then(|m| tidy(m.as_str()))
        {
            return Some(found);
        }
    }
    CAPITALIZED.captures_iter(instruction).find_map(|c| {
        let words: Vec<&str> = c[1]
            .split_whitespace()
            .skip_while(|w| CAPITALIZED_STOPWORDS.contains(&w.to_lowercase().as_str()))
            .collect();
        tidy(&words.join(" "))
    })
}

/// Resolve and run a select against an already-found element
pub async fn smart_select(
    page: &Page,
    node: Option<NodeId>,
    target: &str,
    config: &ExecutorConfig,
) -> Result<SelectOutcome> {
    let classified = classify_select_target(&page.read(), node);
    debug!(?classified, target, "smart select");
    match classified {
        SelectTarget::NativeSelect(select) => select_native(page, select, target),
        SelectTarget::CustomDropdown(control) => {
            Ok(handle_custom_dropdown(page, control, target, config).await)
        }
        SelectTarget::Unresolvable => Err(PilotError::ElementNotFound(
            "No select element or dropdown to choose from".to_string(),
        )),
    }
}
