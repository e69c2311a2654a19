//! Error types for the fallible edges of the engine.
//!
//! Action application never errors (see `action::Rejection`); these cover
//! decoding untrusted input, the external layout call, and configuration.

use thiserror::Error;

/// Input that could not be decoded at all.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid MessagePack: {0}")]
    MsgPack(#[from] rmp_serde::decode::Error),
    #[error("expected {expected}, found {found}")]
    Shape {
        expected: &'static str,
        found: &'static str,
    },
}

/// Encoding a sync message failed.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("MessagePack encoding failed: {0}")]
    MsgPack(#[from] rmp_serde::encode::Error),
}

/// A render cycle's layout did not complete. The graph is untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("layout engine failed: {0}")]
    Engine(String),
    #[error("layout timed out after {0} ms")]
    Timeout(u64),
    #[error("layout engine returned no position for {0}")]
    MissingNode(String),
    #[error("session closed before layout completed")]
    SessionClosed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid layout config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid layout config: {field} must be {rule}")]
    Invalid {
        field: &'static str,
        rule: &'static str,
    },
}

/// Describe a JSON value's kind for `DecodeError::Shape`.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
