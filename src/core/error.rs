//! Custom error types for pagepilot
//!
//! Provides a unified error handling system across all modules.

use thiserror::Error;

/// Main error type for pagepilot operations
#[derive(Error, Debug)]
pub enum PilotError {
    /// A single element's data could not be derived
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// No resolution strategy matched a target
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Element found but the requested effect failed or is type-invalid
    #[error("Action error: {0}")]
    Action(String),

    /// A value failed the outbound boundary check
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed inbound message or batch
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// CSS selector could not be parsed
    #[error("Invalid selector '{0}'")]
    InvalidSelector(String),

    /// XPath expression could not be parsed or evaluated
    #[error("Invalid xpath '{expression}': {reason}")]
    InvalidXPath { expression: String, reason: String },

    /// Node handle does not refer to a live element
    #[error("Node {0} is not an element")]
    NotAnElement(usize),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for pagepilot operations
pub type Result<T> = std::result::Result<T, PilotError>;

impl PilotError {
    /// Create an extraction error
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    /// Create an action error
    pub fn action(msg: impl Into<String>) -> Self {
        Self::Action(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an xpath error
    pub fn xpath(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidXPath {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable tag used in error placeholders
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extraction_error",
            Self::ElementNotFound(_) => "element_not_found",
            Self::Action(_) => "action_error",
            Self::Serialization(_) => "serialization_error",
            Self::Protocol(_) => "protocol_error",
            Self::InvalidSelector(_) => "invalid_selector",
            Self::InvalidXPath { .. } => "invalid_xpath",
            Self::NotAnElement(_) => "not_an_element",
            Self::Config(_) => "config_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PilotError::xpath("//div[", "unterminated predicate");
        assert_eq!(
            err.to_string(),
            "Invalid xpath '//div[': unterminated predicate"
        );
        assert_eq!(err.kind(), "invalid_xpath");
    }

    #[test]
    fn test_json_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: PilotError = parse.unwrap_err().into();
        assert_eq!(err.kind(), "json_error");
    }
}
