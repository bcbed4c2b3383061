//! Command model and batch parsing

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::{PilotError, Point, Result};

/// What a command does
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    Click,
    Type,
    Clear,
    Scroll,
    Hover,
    Focus,
    Submit,
    Check,
    Uncheck,
    Navigate,
    GetValue,
    GetText,
    Select,
    Wait,
    /// Anything else; reported as an error when executed
    Unknown(String),
}

impl ActionType {
    pub fn from_name(name: &str) -> Self {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "click" => Self::Click,
            "type" | "fill" => Self::Type,
            "clear" => Self::Clear,
            "scroll" => Self::Scroll,
            "hover" => Self::Hover,
            "focus" => Self::Focus,
            "submit" => Self::Submit,
            "check" => Self::Check,
            "uncheck" => Self::Uncheck,
            "navigate" | "goto" => Self::Navigate,
            "getvalue" => Self::GetValue,
            "gettext" => Self::GetText,
            "select" | "choose" => Self::Select,
            "wait" => Self::Wait,
            _ => Self::Unknown(name.to_string()),
        }
    }

    /// Wire name, as reported in results
    pub fn name(&self) -> &str {
        match self {
            Self::Click => "click",
            Self::Type => "type",
            Self::Clear => "clear",
            Self::Scroll => "scroll",
            Self::Hover => "hover",
            Self::Focus => "focus",
            Self::Submit => "submit",
            Self::Check => "check",
            Self::Uncheck => "uncheck",
            Self::Navigate => "navigate",
            Self::GetValue => "getValue",
            Self::GetText => "getText",
            Self::Select => "select",
            Self::Wait => "wait",
            Self::Unknown(name) => name,
        }
    }

    /// Actions that enter text; their `text` is payload, never a target
    pub fn is_text_entry(&self) -> bool {
        matches!(self, Self::Type)
    }
}

impl From<String> for ActionType {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<ActionType> for String {
    fn from(action: ActionType) -> Self {
        action.name().to_string()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-command options bag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOptions {
    /// Clear the field before typing (defaults to true)
    pub clear: Option<bool>,
    #[serde(alias = "showCursor")]
    pub show_cursor: Option<bool>,
    pub smooth: Option<bool>,
    /// Window scroll direction: up, down, left, right, top, bottom
    pub direction: Option<String>,
    /// Window scroll distance in pixels
    pub amount: Option<f64>,
}

/// One instruction in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(alias = "type")]
    pub action: ActionType,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub xpath: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Point>,
    /// Payload: text to type, URL, wait duration, option to select
    #[serde(default)]
    pub value: Option<Value>,
    /// Free-form instruction the command was derived from
    #[serde(default, alias = "instruction")]
    pub description: Option<String>,
    #[serde(default)]
    pub options: CommandOptions,
    #[serde(
        default,
        alias = "commandId",
        alias = "id",
        deserialize_with = "lenient_id"
    )]
    pub command_id: Option<String>,
    #[serde(default, alias = "delayBefore", alias = "delay")]
    pub delay_before: Option<u64>,
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

impl Command {
    pub fn new(action: ActionType) -> Self {
        Self {
            action,
            selector: None,
            xpath: None,
            text: None,
            coordinates: None,
            value: None,
            description: None,
            options: CommandOptions::default(),
            command_id: None,
            delay_before: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// `value` as text; numbers and booleans are stringified
    pub fn value_str(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// `value` as a number, accepting numeric strings
    pub fn value_f64(&self) -> Option<f64> {
        match self.value.as_ref()? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Commands that never look up an element
    pub fn is_elementless(&self) -> bool {
        match self.action {
            ActionType::Wait | ActionType::Navigate => true,
            ActionType::Scroll => !self.has_target(),
            _ => false,
        }
    }

    pub fn has_target(&self) -> bool {
        self.selector.is_some()
            || self.xpath.is_some()
            || self.coordinates.is_some()
            || (self.text.is_some() && !self.action.is_text_entry())
    }

    /// Short human description of the target for messages
    pub fn target_label(&self) -> String {
        if let Some(selector) = &self.selector {
            selector.clone()
        } else if let Some(xpath) = &self.xpath {
            xpath.clone()
        } else if let Some(text) = &self.text {
            format!("text \"{}\"", text)
        } else if let Some(point) = &self.coordinates {
            format!("point ({}, {})", point.x, point.y)
        } else {
            "no target".to_string()
        }
    }
}

const BATCH_KEYS: [&str; 3] = ["actions", "payload", "commands"];

/// Reduce an inbound message to an ordered, non-empty list of commands.
///
/// Accepts a bare array or an object carrying the array under `actions`,
/// `payload` or `commands`. A batch with any malformed item is rejected
/// whole.
pub fn parse_batch(value: &Value) -> Result<Vec<Command>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => BATCH_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .ok_or_else(|| {
                PilotError::protocol("Batch object has no actions, payload or commands list")
            })?,
        _ => return Err(PilotError::protocol("Batch must be a list or a wrapper object")),
    };
    if items.is_empty() {
        return Err(PilotError::protocol("Batch is empty"));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item.clone())
                .map_err(|e| PilotError::protocol(format!("Command {} is malformed: {}", i, e)))
        })
        .collect()
}
