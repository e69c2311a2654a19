//! Tolerant decoding of action batches produced by the language model.
//!
//! The upstream translator is untrusted: it wraps JSON in markdown fences,
//! alternates between bare arrays and `{"actions": [...]}` objects, and
//! invents action or node types. Each element is decoded on its own so one
//! hallucinated entry never costs the rest of the batch.

use crate::action::{Action, ActionType, BatchReport, run_batch};
use crate::error::{DecodeError, json_kind};
use crate::model::{GraphState, NodeType};
use serde_json::Value;

/// The usable actions of one utterance plus how many were thrown away.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBatch {
    pub actions: Vec<Action>,
    pub filtered: usize,
}

impl DecodedBatch {
    /// Apply the decoded actions; the report counts filtered entries as ignored.
    pub fn apply(&self, state: &mut GraphState) -> BatchReport {
        run_batch(state, &self.actions, self.filtered)
    }
}

/// Decode one raw model response into a batch.
///
/// # Errors
/// The text is not JSON, or the JSON is neither an array, an object wrapping
/// `actions`, nor a single action object.
pub fn decode_actions(raw: &str) -> Result<DecodedBatch, DecodeError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Ok(DecodedBatch::default());
    }
    let value: Value = serde_json::from_str(body)?;

    let elements = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("actions") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(DecodeError::Shape {
                    expected: "an `actions` array",
                    found: json_kind(&other),
                });
            }
            None if map.contains_key("actionType") => vec![Value::Object(map)],
            None => {
                return Err(DecodeError::Shape {
                    expected: "an `actions` array",
                    found: "an object without one",
                });
            }
        },
        other => {
            return Err(DecodeError::Shape {
                expected: "an array of actions",
                found: json_kind(&other),
            });
        }
    };

    let mut batch = DecodedBatch::default();
    for element in elements {
        match decode_one(element) {
            Some(action) => batch.actions.push(action),
            None => batch.filtered += 1,
        }
    }
    if batch.filtered > 0 {
        log::warn!("filtered {} unrecognized action(s)", batch.filtered);
    }
    Ok(batch)
}

fn decode_one(element: Value) -> Option<Action> {
    let Value::Object(map) = &element else {
        log::debug!("dropping non-object action: {element}");
        return None;
    };

    let action_type = map.get("actionType").and_then(Value::as_str);
    if !action_type.is_some_and(is_known_action_type) {
        log::debug!("dropping action with unknown type {action_type:?}");
        return None;
    }
    match map.get("nodeType") {
        None | Some(Value::Null) => {}
        Some(Value::String(t)) if NodeType::parse(t).is_some() => {}
        Some(other) => {
            log::debug!("dropping action with unknown node type {other}");
            return None;
        }
    }

    match serde_json::from_value::<Action>(element) {
        Ok(action) => Some(action),
        Err(err) => {
            log::debug!("dropping malformed action: {err}");
            None
        }
    }
}

fn is_known_action_type(s: &str) -> bool {
    serde_json::from_value::<ActionType>(Value::String(s.to_string())).is_ok()
}

/// Extract the body of the first fenced code block, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[start + 3..];
    // Skip the info string (`json`, `JSON`, ...) up to the end of the line.
    let body = match after_fence.find('\n') {
        Some(nl) => &after_fence[nl + 1..],
        None => after_fence,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}
