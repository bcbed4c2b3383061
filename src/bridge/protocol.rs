//! Wire protocol between the page and its remote controller
//!
//! Inbound messages are JSON objects tagged by `action` (or bare command
//! arrays). Outbound replies to discovery queries share one envelope:
//! `{action: "dom_monitor_response", requestId, data, success}`.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::actions::{parse_batch, Command};
use crate::core::{PilotError, Result};
use crate::detectors::MediaCommand;
use crate::index::{EntryFilter, IntentOptions};

pub const EXECUTE_ACTIONS: &str = "execute_actions";
pub const FIND_ELEMENTS: &str = "dom_monitor_find_elements";
pub const GET_STATS: &str = "dom_monitor_get_stats";
pub const GET_ALL_ELEMENTS: &str = "dom_monitor_get_all_elements";
pub const REFRESH: &str = "dom_monitor_refresh";
pub const SCROLL_GET_ALL: &str = "scroll_detector_get_all";
pub const MEDIA_GET_ALL: &str = "media_detector_get_all";
pub const MEDIA_CONTROL: &str = "media_control";
pub const RESPONSE: &str = "dom_monitor_response";

/// How a media control request names its element
#[derive(Debug, Clone, PartialEq)]
pub enum MediaTarget {
    Identity(String),
    Selector(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    ExecuteActions(Vec<Command>),
    FindElements {
        request_id: Value,
        intent: String,
        options: IntentOptions,
    },
    GetStats {
        request_id: Value,
    },
    GetAllElements {
        request_id: Value,
        filter: EntryFilter,
    },
    Refresh {
        request_id: Value,
    },
    ScrollGetAll {
        request_id: Value,
    },
    MediaGetAll {
        request_id: Value,
    },
    MediaControl {
        request_id: Value,
        target: MediaTarget,
        command: MediaCommand,
    },
}

impl InboundMessage {
    /// Correlation id to echo in the reply, if the message carries one
    pub fn request_id(&self) -> Option<&Value> {
        match self {
            Self::ExecuteActions(_) => None,
            Self::FindElements { request_id, .. }
            | Self::GetStats { request_id }
            | Self::GetAllElements { request_id, .. }
            | Self::Refresh { request_id }
            | Self::ScrollGetAll { request_id }
            | Self::MediaGetAll { request_id }
            | Self::MediaControl { request_id, .. } => Some(request_id),
        }
    }
}

fn request_id(map: &Map<String, Value>) -> Value {
    map.get("requestId")
        .or_else(|| map.get("request_id"))
        .cloned()
        .unwrap_or(Value::Null)
}

fn options<T: DeserializeOwned + Default>(map: &Map<String, Value>) -> Result<T> {
    match map.get("options") {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| PilotError::protocol(format!("Invalid options: {}", e))),
    }
}

fn media_control(map: &Map<String, Value>) -> Result<(MediaTarget, MediaCommand)> {
    let target = match (
        map.get("identity").and_then(Value::as_str),
        map.get("selector").and_then(Value::as_str),
    ) {
        (Some(identity), _) => MediaTarget::Identity(identity.to_string()),
        (None, Some(selector)) => MediaTarget::Selector(selector.to_string()),
        (None, None) => return Err(PilotError::protocol("media_control needs an identity or selector")),
    };
    let name = map
        .get("command")
        .and_then(Value::as_str)
        .ok_or_else(|| PilotError::protocol("media_control needs a command"))?;
    let value = map.get("value").and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });
    let command = MediaCommand::parse(name, value)
        .ok_or_else(|| PilotError::protocol(format!("Unsupported media command '{}'", name)))?;
    Ok((target, command))
}

/// Decode one inbound message
pub fn parse_message(value: &Value) -> Result<InboundMessage> {
    let map = match value {
        Value::Array(_) => return parse_batch(value).map(InboundMessage::ExecuteActions),
        Value::Object(map) => map,
        _ => return Err(PilotError::protocol("Message must be an object or a list of commands")),
    };
    let action = map.get("action").and_then(Value::as_str);
    let request_id = request_id(map);
    match action {
        Some(FIND_ELEMENTS) => {
            let intent = map
                .get("intent")
                .and_then(Value::as_str)
                .filter(|i| !i.trim().is_empty())
                .ok_or_else(|| PilotError::protocol("find_elements needs an intent"))?;
            Ok(InboundMessage::FindElements {
                request_id,
                intent: intent.to_string(),
                options: options(map)?,
            })
        }
        Some(GET_STATS) => Ok(InboundMessage::GetStats { request_id }),
        Some(GET_ALL_ELEMENTS) => Ok(InboundMessage::GetAllElements {
            request_id,
            filter: options(map)?,
        }),
        Some(REFRESH) => Ok(InboundMessage::Refresh { request_id }),
        Some(SCROLL_GET_ALL) => Ok(InboundMessage::ScrollGetAll { request_id }),
        Some(MEDIA_GET_ALL) => Ok(InboundMessage::MediaGetAll { request_id }),
        Some(MEDIA_CONTROL) => {
            let (target, command) = media_control(map)?;
            Ok(InboundMessage::MediaControl {
                request_id,
                target,
                command,
            })
        }
        Some(EXECUTE_ACTIONS) | None => parse_batch(value).map(InboundMessage::ExecuteActions),
        // Controllers sometimes tag a wrapper with their own action name
        Some(other) => parse_batch(value)
            .map(InboundMessage::ExecuteActions)
            .map_err(|_| PilotError::protocol(format!("Unknown message action '{}'", other))),
    }
}

/// Reply envelope for discovery queries
pub fn response(request_id: &Value, data: Value, success: bool) -> Value {
    json!({
        "action": RESPONSE,
        "requestId": request_id,
        "data": data,
        "success": success,
    })
}

/// Failed reply carrying the error text
pub fn error_response(request_id: &Value, error: &PilotError) -> Value {
    json!({
        "action": RESPONSE,
        "requestId": request_id,
        "data": Value::Null,
        "success": false,
        "error": error.to_string(),
        "error_type": error.kind(),
    })
}

/// Message for input that could not be decoded at all
pub fn protocol_error(error: &PilotError) -> Value {
    json!({
        "action": "error",
        "error_type": error.kind(),
        "message": error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_messages() {
        let msg = parse_message(&json!({
            "action": FIND_ELEMENTS,
            "intent": "contact button",
            "options": {"limit": 3, "visibleOnly": true},
            "requestId": "r1"
        }))
        .unwrap();
        match msg {
            InboundMessage::FindElements { request_id, intent, options } => {
                assert_eq!(request_id, json!("r1"));
                assert_eq!(intent, "contact button");
                assert_eq!(options.limit, 3);
                assert!(options.visible_only);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            parse_message(&json!({"action": GET_STATS, "requestId": 9})).unwrap(),
            InboundMessage::GetStats { request_id: json!(9) }
        );
    }

    #[test]
    fn test_batches_and_wrappers() {
        let wrapped = json!({"action": "execute_actions", "actions": [{"action": "click", "selector": "#a"}]});
        assert!(matches!(parse_message(&wrapped).unwrap(), InboundMessage::ExecuteActions(c) if c.len() == 1));
        let bare = json!({"commands": [{"action": "wait", "value": 10}]});
        assert!(matches!(parse_message(&bare).unwrap(), InboundMessage::ExecuteActions(_)));
        assert!(parse_message(&json!({"action": "execute_actions", "actions": []})).is_err());
    }

    #[test]
    fn test_media_control() {
        let msg = parse_message(&json!({
            "action": MEDIA_CONTROL,
            "selector": "video",
            "command": "seek",
            "value": "12.5",
            "requestId": "m"
        }))
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::MediaControl {
                request_id: json!("m"),
                target: MediaTarget::Selector("video".to_string()),
                command: MediaCommand::Seek(12.5),
            }
        );
        assert!(parse_message(&json!({"action": MEDIA_CONTROL, "command": "play"})).is_err());
        assert!(parse_message(&json!({"action": MEDIA_CONTROL, "identity": "x", "command": "rewind"})).is_err());
    }

    #[test]
    fn test_unknown_messages() {
        let err = parse_message(&json!({"action": "self_destruct"})).unwrap_err();
        assert_eq!(err.kind(), "protocol_error");
        assert!(parse_message(&json!(42)).is_err());

        let tagged = json!({"action": "run_steps", "payload": [{"action": "focus", "selector": "#q"}]});
        assert!(matches!(parse_message(&tagged).unwrap(), InboundMessage::ExecuteActions(c) if c.len() == 1));
    }
}
