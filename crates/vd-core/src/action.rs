//! Structured edit actions and the processor that applies them.
//!
//! Each action is validated and applied on its own: a rejected action leaves
//! the graph exactly as it was, and the rest of the batch still runs. A batch
//! is therefore per-action atomic, not all-or-nothing. After a batch the
//! graph is cleaned up (orphaned edges, dangling containment, cycles).

use crate::id::{EdgeId, NodeId};
use crate::model::{Cleanup, Edge, GraphState, HintPosition, Node, NodeType};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

// ─── Actions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    #[default]
    CreateNode,
    UpdateNode,
    DeleteNode,
    CreateEdge,
    DeleteEdge,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionType::CreateNode => "create_node",
            ActionType::UpdateNode => "update_node",
            ActionType::DeleteNode => "delete_node",
            ActionType::CreateEdge => "create_edge",
            ActionType::DeleteEdge => "delete_edge",
        })
    }
}

/// One edit instruction. Every field but `action_type` is optional, and
/// whether a field is present matters (see `update_node` merge rules).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,
    /// `None` = absent, `Some(None)` = explicit `null` (detach).
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<HintPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bidirectional: Option<bool>,
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl Action {
    pub fn create_node(id: &str, label: &str, node_type: NodeType) -> Self {
        Self {
            action_type: ActionType::CreateNode,
            id: Some(id.into()),
            label: Some(label.into()),
            node_type: Some(node_type),
            ..Default::default()
        }
    }

    pub fn update_node(id: &str) -> Self {
        Self {
            action_type: ActionType::UpdateNode,
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn delete_node(id: &str) -> Self {
        Self {
            action_type: ActionType::DeleteNode,
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn create_edge(source: &str, target: &str) -> Self {
        Self {
            action_type: ActionType::CreateEdge,
            source_id: Some(source.into()),
            target_id: Some(target.into()),
            ..Default::default()
        }
    }

    pub fn delete_edge_by_id(id: &str) -> Self {
        Self {
            action_type: ActionType::DeleteEdge,
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn delete_edge_between(source: &str, target: &str) -> Self {
        Self {
            action_type: ActionType::DeleteEdge,
            source_id: Some(source.into()),
            target_id: Some(target.into()),
            ..Default::default()
        }
    }
}

// ─── Rejections ──────────────────────────────────────────────────────────

/// Why an action was not applied. Never fatal; surfaced only through logs
/// and the batch summary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),
    #[error("frame {0} cannot be an edge endpoint")]
    FrameEndpoint(NodeId),
    #[error("parenting {node} under {parent} would create a containment cycle")]
    ContainmentCycle { node: NodeId, parent: NodeId },
    #[error("no edge matches the given id or endpoints")]
    EdgeNotFound,
}

/// A present, non-blank string field, trimmed.
fn required(value: &Option<String>, field: &'static str) -> Result<String, Rejection> {
    match value.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(Rejection::MissingField(field)),
    }
}

fn optional_id(value: &Option<String>) -> Option<NodeId> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(NodeId::intern)
}

fn sanitize_opacity(opacity: Option<f32>) -> Option<f32> {
    opacity.filter(|o| o.is_finite()).map(|o| o.clamp(0.0, 1.0))
}

// ─── Processor ───────────────────────────────────────────────────────────

/// Apply one action. Returns whether it was valid and applied; a rejected
/// action does not touch `state`.
pub fn apply(state: &mut GraphState, action: &Action) -> bool {
    match try_apply(state, action) {
        Ok(()) => {
            log::debug!("applied {}", action.action_type);
            true
        }
        Err(reason) => {
            log::warn!("rejected {}: {reason}", action.action_type);
            false
        }
    }
}

/// Apply one action, reporting why it was rejected.
pub fn try_apply(state: &mut GraphState, action: &Action) -> Result<(), Rejection> {
    match action.action_type {
        ActionType::CreateNode => create_node(state, action),
        ActionType::UpdateNode => update_node(state, action),
        ActionType::DeleteNode => delete_node(state, action),
        ActionType::CreateEdge => create_edge(state, action),
        ActionType::DeleteEdge => delete_edge(state, action),
    }
}

/// Resolve a requested parent: `Ok(None)` when it must be dropped because it
/// names an existing non-frame node, `Err` when it would close a cycle.
fn resolve_parent(
    state: &GraphState,
    node: NodeId,
    parent: NodeId,
) -> Result<Option<NodeId>, Rejection> {
    match state.node(parent) {
        Some(p) if !p.is_frame() => {
            log::warn!("ignoring parent {parent} of {node}: not a frame");
            return Ok(None);
        }
        _ => {}
    }
    if state.would_create_cycle(node, parent) {
        return Err(Rejection::ContainmentCycle { node, parent });
    }
    Ok(Some(parent))
}

fn create_node(state: &mut GraphState, action: &Action) -> Result<(), Rejection> {
    let id = NodeId::intern(&required(&action.id, "id")?);
    let label = required(&action.label, "label")?;
    let node_type = action.node_type.ok_or(Rejection::MissingField("nodeType"))?;

    let parent_id = match action.parent_id.as_ref().and_then(optional_id) {
        Some(parent) => resolve_parent(state, id, parent)?,
        None => None,
    };

    // Whole-object overwrite on collision, unlike update_node's merge.
    state.insert_node(Node {
        id,
        label,
        description: action.description.clone().unwrap_or_default(),
        node_type,
        parent_id,
        color: action.color.clone(),
        position: action.position.clone(),
        relative_to: optional_id(&action.relative_to),
        opacity: sanitize_opacity(action.opacity),
    });
    Ok(())
}

fn update_node(state: &mut GraphState, action: &Action) -> Result<(), Rejection> {
    let id = NodeId::intern(&required(&action.id, "id")?);
    let existing = state.node(id).ok_or(Rejection::UnknownNode(id))?;
    let node_type = action.node_type.unwrap_or(existing.node_type);

    // Validate everything before the first write.
    let parent_change = match &action.parent_id {
        None => None,
        Some(requested) => match optional_id(requested) {
            None => Some(None),
            Some(parent) => resolve_parent(state, id, parent)?.map(Some),
        },
    };

    let Some(node) = state.node_mut(id) else {
        return Err(Rejection::UnknownNode(id));
    };
    if let Some(label) = &action.label {
        node.label = label.clone();
    }
    if let Some(description) = &action.description {
        node.description = description.clone();
    }
    node.node_type = node_type;
    if let Some(parent) = parent_change {
        node.parent_id = parent;
    }
    if let Some(color) = &action.color {
        node.color = Some(color.clone());
    }
    if let Some(opacity) = sanitize_opacity(action.opacity) {
        node.opacity = Some(opacity);
    }
    if let Some(position) = &action.position {
        node.position = Some(position.clone());
    }
    if let Some(anchor) = optional_id(&action.relative_to) {
        node.relative_to = Some(anchor);
    }
    Ok(())
}

fn delete_node(state: &mut GraphState, action: &Action) -> Result<(), Rejection> {
    let id = NodeId::intern(&required(&action.id, "id")?);
    let removal = state.remove_node_cascade(id);
    if removal.is_empty() {
        log::debug!("delete_node {id}: nothing to delete");
    } else {
        log::debug!(
            "delete_node {id}: removed {} node(s), {} edge(s)",
            removal.nodes.len(),
            removal.edges.len()
        );
    }
    Ok(())
}

fn create_edge(state: &mut GraphState, action: &Action) -> Result<(), Rejection> {
    let source = NodeId::intern(&required(&action.source_id, "sourceId")?);
    let target = NodeId::intern(&required(&action.target_id, "targetId")?);
    for endpoint in [source, target] {
        if state.is_frame(endpoint) {
            return Err(Rejection::FrameEndpoint(endpoint));
        }
    }

    let id = match action.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(explicit) => EdgeId::intern(explicit),
        None => EdgeId::between(source, target),
    };
    // Endpoints may not exist yet; post-batch cleanup removes the edge if
    // they never materialize.
    state.insert_edge(Edge {
        id,
        source_id: source,
        target_id: target,
        bidirectional: action.bidirectional.unwrap_or(false),
    });
    Ok(())
}

fn delete_edge(state: &mut GraphState, action: &Action) -> Result<(), Rejection> {
    let explicit = action.id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let target = match explicit {
        // An explicit id is authoritative; the pair is not consulted.
        Some(explicit) => Some(EdgeId::intern(explicit)).filter(|id| state.edge(*id).is_some()),
        None => match (optional_id(&action.source_id), optional_id(&action.target_id)) {
            (Some(source), Some(target)) => state.find_edge_between(source, target),
            _ => None,
        },
    }
    .ok_or(Rejection::EdgeNotFound)?;
    state.remove_edge(target);
    Ok(())
}

// ─── Batches ─────────────────────────────────────────────────────────────

/// Outcome of one voice turn's batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: usize,
    pub rejected: usize,
    /// Actions dropped at decode time (unknown action or node type).
    pub filtered: usize,
    pub cleanup: Cleanup,
}

impl BatchReport {
    pub fn ignored(&self) -> usize {
        self.rejected + self.filtered
    }

    /// "N commands understood, M ignored".
    pub fn summary(&self) -> String {
        format!(
            "{} commands understood, {} ignored",
            self.applied,
            self.ignored()
        )
    }
}

/// Apply actions in array order, then clean up the graph.
pub fn apply_batch(state: &mut GraphState, actions: &[Action]) -> BatchReport {
    run_batch(state, actions, 0)
}

pub(crate) fn run_batch(
    state: &mut GraphState,
    actions: &[Action],
    filtered: usize,
) -> BatchReport {
    let mut report = BatchReport {
        filtered,
        ..Default::default()
    };
    for action in actions {
        if apply(state, action) {
            report.applied += 1;
        } else {
            report.rejected += 1;
        }
    }
    report.cleanup = state.cleanup();
    log::info!("{}", report.summary());
    report
}
