//! Finder - resolves a command's target against the live document
//!
//! Strategies run in a fixed order and the first match wins. A strategy
//! that fails to evaluate (bad selector, bad xpath) is logged and skipped.

use serde::Serialize;
use tracing::{debug, warn};

use crate::actions::command::Command;
use crate::core::{PilotError, Result};
use crate::dom::{xpath, Document, NodeId};

/// How a target was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Css,
    #[serde(rename = "xpath")]
    XPath,
    Text,
    Point,
}

impl Strategy {
    pub const ORDER: [Strategy; 4] = [Strategy::Css, Strategy::XPath, Strategy::Text, Strategy::Point];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Css => "css",
            Strategy::XPath => "xpath",
            Strategy::Text => "text",
            Strategy::Point => "point",
        }
    }
}

/// Stateless multi-strategy element finder
#[derive(Debug, Clone, Copy, Default)]
pub struct Finder;

impl Finder {
    pub fn find(doc: &Document, command: &Command) -> Option<NodeId> {
        Self::find_with_strategy(doc, command).map(|(node, _)| node)
    }

    pub fn find_with_strategy(doc: &Document, command: &Command) -> Option<(NodeId, Strategy)> {
        for strategy in Strategy::ORDER {
            match Self::apply(strategy, doc, command) {
                Ok(Some(node)) => {
                    debug!(strategy = strategy.as_str(), %node, "target resolved");
                    return Some((node, strategy));
                }
                Ok(None) => {}
                Err(e) => warn!(strategy = strategy.as_str(), error = %e, "resolution strategy failed"),
            }
        }
        None
    }

    fn apply(strategy: Strategy, doc: &Document, command: &Command) -> Result<Option<NodeId>> {
        match strategy {
            Strategy::Css => match command.selector.as_deref() {
                Some(selector) => doc.query_selector(selector),
                None => Ok(None),
            },
            Strategy::XPath => match command.xpath.as_deref() {
                Some(expression) => Ok(doc.evaluate_xpath(expression)?.into_iter().next()),
                None => Ok(None),
            },
            Strategy::Text => match command.text.as_deref() {
                Some(text) if !command.action.is_text_entry() && !text.trim().is_empty() => {
                    Self::by_text(doc, text.trim())
                }
                _ => Ok(None),
            },
            Strategy::Point => Ok(command.coordinates.and_then(|p| doc.element_from_point(p))),
        }
    }

    /// Element whose own text contains `text`, preferring visible ones
    fn by_text(doc: &Document, text: &str) -> Result<Option<NodeId>> {
        let quoted = xpath::literal(text)
            .ok_or_else(|| PilotError::action(format!("Cannot quote text for lookup: {}", text)))?;
        let matches = doc.evaluate_xpath(&format!("//*[contains(text(), {})]", quoted))?;
        Ok(matches
            .iter()
            .copied()
            .find(|n| doc.is_visible(*n))
            .or_else(|| matches.first().copied()))
    }
}
