//! Candidate outbound values
//!
//! [`PageValue`] can hold everything page-local code might try to send,
//! including live node handles and callbacks, so the boundary check has
//! something to reject.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::core::{PilotError, Result};
use crate::dom::NodeId;

#[derive(Debug, Clone, PartialEq)]
pub enum PageValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<PageValue>),
    Map(BTreeMap<String, PageValue>),
    /// Live element handle; never legal output
    Node(NodeId),
    /// Callback; never legal output
    Function(String),
}

impl PageValue {
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, PageValue)>) -> Self {
        PageValue::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn string(value: impl Into<String>) -> Self {
        PageValue::String(value.into())
    }

    pub fn opt_string(value: Option<&str>) -> Self {
        value.map_or(PageValue::Null, PageValue::string)
    }

    pub fn opt_bool(value: Option<bool>) -> Self {
        value.map_or(PageValue::Null, PageValue::Bool)
    }

    /// Replace every node handle using `resolve`
    pub fn replace_nodes(self, resolve: &impl Fn(NodeId) -> PageValue) -> Self {
        match self {
            PageValue::Node(node) => resolve(node),
            PageValue::List(items) => {
                PageValue::List(items.into_iter().map(|v| v.replace_nodes(resolve)).collect())
            }
            PageValue::Map(fields) => PageValue::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, v.replace_nodes(resolve)))
                    .collect(),
            ),
            other => other,
        }
    }
}

impl From<Value> for PageValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => PageValue::Null,
            Value::Bool(b) => PageValue::Bool(b),
            Value::Number(n) => PageValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => PageValue::String(s),
            Value::Array(items) => PageValue::List(items.into_iter().map(PageValue::from).collect()),
            Value::Object(fields) => {
                PageValue::Map(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<bool> for PageValue {
    fn from(value: bool) -> Self {
        PageValue::Bool(value)
    }
}

impl From<f64> for PageValue {
    fn from(value: f64) -> Self {
        PageValue::Number(value)
    }
}

impl From<&str> for PageValue {
    fn from(value: &str) -> Self {
        PageValue::string(value)
    }
}

impl From<String> for PageValue {
    fn from(value: String) -> Self {
        PageValue::String(value)
    }
}

/// Walk `value` and convert it to plain JSON, failing on live references,
/// functions, or nesting deeper than `max_depth` containers. `depth` is the
/// nesting level `value` sits at (0 for a top-level value).
pub fn validate_serialization(value: &PageValue, depth: usize, max_depth: usize) -> Result<Value> {
    validate_at(value, depth, max_depth, "$")
}

fn validate_at(value: &PageValue, depth: usize, max_depth: usize, path: &str) -> Result<Value> {
    match value {
        PageValue::Null => Ok(Value::Null),
        PageValue::Bool(b) => Ok(Value::Bool(*b)),
        PageValue::Number(n) => Ok(Number::from_f64(*n).map_or(Value::Null, Value::Number)),
        PageValue::String(s) => Ok(Value::String(s.clone())),
        PageValue::Node(node) => Err(PilotError::serialization(format!(
            "live element reference ({}) at {}",
            node, path
        ))),
        PageValue::Function(name) => Err(PilotError::serialization(format!(
            "function value '{}' at {}",
            name, path
        ))),
        PageValue::List(items) => {
            let depth = enter(depth, max_depth, path)?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| validate_at(item, depth, max_depth, &format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        PageValue::Map(fields) => {
            let depth = enter(depth, max_depth, path)?;
            let mut out = Map::new();
            for (key, item) in fields {
                let value = validate_at(item, depth, max_depth, &format!("{}.{}", path, key))?;
                out.insert(key.clone(), value);
            }
            Ok(Value::Object(out))
        }
    }
}

fn enter(depth: usize, max_depth: usize, path: &str) -> Result<usize> {
    let depth = depth + 1;
    if depth > max_depth {
        return Err(PilotError::serialization(format!(
            "nesting depth {} exceeds maximum {} at {}",
            depth, max_depth, path
        )));
    }
    Ok(depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested(levels: usize) -> PageValue {
        let mut value = PageValue::Number(1.0);
        for _ in 0..levels {
            value = PageValue::List(vec![value]);
        }
        value
    }

    #[test]
    fn test_rejects_live_values() {
        let with_node = PageValue::map([("el", PageValue::Node(NodeId(7)))]);
        let err = validate_serialization(&with_node, 0, 10).unwrap_err();
        assert!(err.to_string().contains("$.el"));

        let with_fn = PageValue::List(vec![PageValue::Function("onclick".into())]);
        assert!(validate_serialization(&with_fn, 0, 10).is_err());
    }

    #[test]
    fn test_depth_ceiling() {
        assert!(validate_serialization(&nested(10), 0, 10).is_ok());
        assert!(validate_serialization(&nested(11), 0, 10).is_err());
    }

    #[test]
    fn test_non_finite_numbers_become_null() {
        let value = PageValue::List(vec![PageValue::Number(f64::NAN), PageValue::Number(2.5)]);
        assert_eq!(
            validate_serialization(&value, 0, 10).unwrap(),
            serde_json::json!([null, 2.5])
        );
    }

    #[test]
    fn test_replace_nodes() {
        let value = PageValue::map([("parent", PageValue::Node(NodeId(3)))]);
        let replaced = value.replace_nodes(&|n| PageValue::string(format!("id-{}", n.index())));
        assert_eq!(
            validate_serialization(&replaced, 0, 10).unwrap(),
            serde_json::json!({"parent": "id-3"})
        );
    }
}
