//! Sync message encoding for persistence and cross-process sync.
//!
//! A message is a flat, order-independent list of node records and edge
//! records. `deserialize` only fills the maps; it does not repair orphaned
//! edges or dangling containment. Run `GraphState::cleanup` on the result
//! when the message did not come from `serialize`.

use crate::error::{DecodeError, EncodeError};
use crate::model::{Edge, GraphState, Node};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Snapshot `state` as a message. Records are sorted by id so equal graphs
/// encode to equal bytes.
pub fn serialize(state: &GraphState) -> SyncMessage {
    SyncMessage {
        nodes: state
            .sorted_node_ids()
            .into_iter()
            .map(|id| state.nodes[&id].clone())
            .collect(),
        edges: state
            .sorted_edge_ids()
            .into_iter()
            .map(|id| state.edges[&id].clone())
            .collect(),
    }
}

/// Rebuild the node and edge maps. Later records win on duplicate ids.
pub fn deserialize(message: &SyncMessage) -> GraphState {
    let mut state = GraphState::new();
    for node in &message.nodes {
        state.insert_node(node.clone());
    }
    for edge in &message.edges {
        state.insert_edge(edge.clone());
    }
    state
}

impl SyncMessage {
    pub fn to_json(&self) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Compact MessagePack encoding (field names kept, so it stays
    /// order-independent).
    pub fn to_msgpack(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
