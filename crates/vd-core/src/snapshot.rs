//! Visual snapshot → GraphState reconciliation.
//!
//! The canvas persists a tldraw-style record store: shape records (geo,
//! frame, text, note, arrow, ...) and binding records that pin arrow
//! terminals to shapes. Extraction is the inverse of rendering and must
//! never fail: a shape mid-drag, a half-bound arrow, or a stale parent is
//! dropped rather than carried into the graph.

use crate::id::{EdgeId, NodeId};
use crate::model::{Edge, GraphState, HintPosition, Node, NodeType};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Presentation-layer prefix on shape record ids.
pub const SHAPE_PREFIX: &str = "shape:";

/// Strip the presentation prefix from a shape id.
pub fn strip_shape_prefix(id: &str) -> &str {
    id.strip_prefix(SHAPE_PREFIX).unwrap_or(id)
}

// ─── Records ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeRecord {
    /// Raw record id, prefix included.
    pub id: String,
    /// Shape type (`geo`, `frame`, `arrow`, ...).
    pub kind: String,
    /// Raw parent id: another shape, or a page.
    pub parent_id: Option<String>,
    pub opacity: Option<f32>,
    pub props: Map<String, Value>,
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Start,
    End,
}

impl Terminal {
    fn key(&self) -> &'static str {
        match self {
            Terminal::Start => "start",
            Terminal::End => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindingRecord {
    /// The arrow shape.
    pub from_id: String,
    /// The shape the terminal is attached to.
    pub to_id: String,
    pub terminal: Terminal,
}

/// All shape and binding records of one snapshot; other records ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Records {
    pub shapes: Vec<ShapeRecord>,
    pub bindings: Vec<BindingRecord>,
}

fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn object_field(record: &Map<String, Value>, key: &str) -> Map<String, Value> {
    match record.get(key) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

impl Records {
    /// Collect records from any of the accepted snapshot layouts:
    /// `{"store": {...}}`, `{"document": {"store": {...}}}`,
    /// `{"records": [...]}`, or a bare array.
    pub fn parse(snapshot: &Value) -> Self {
        let mut records = Records::default();
        for record in record_values(snapshot) {
            if let Value::Object(map) = record {
                records.push(map);
            }
        }
        records
    }

    fn push(&mut self, record: &Map<String, Value>) {
        match str_field(record, "typeName") {
            Some("shape") => {
                let (Some(id), Some(kind)) = (str_field(record, "id"), str_field(record, "type"))
                else {
                    log::debug!("skipping shape record without id/type");
                    return;
                };
                self.shapes.push(ShapeRecord {
                    id: id.to_string(),
                    kind: kind.to_string(),
                    parent_id: str_field(record, "parentId").map(str::to_string),
                    opacity: record
                        .get("opacity")
                        .and_then(Value::as_f64)
                        .map(|o| o as f32),
                    props: object_field(record, "props"),
                    meta: object_field(record, "meta"),
                });
            }
            Some("binding") => {
                let props = object_field(record, "props");
                let terminal = match str_field(&props, "terminal") {
                    Some("start") => Terminal::Start,
                    Some("end") => Terminal::End,
                    _ => return,
                };
                let from = str_field(record, "fromId");
                if let (Some(from), Some(to)) = (from, str_field(record, "toId")) {
                    self.bindings.push(BindingRecord {
                        from_id: from.to_string(),
                        to_id: to.to_string(),
                        terminal,
                    });
                }
            }
            _ => {}
        }
    }

    /// Shape the given arrow terminal is bound to, if any. Binding records
    /// win; the legacy inline `props.<terminal>.boundShapeId` is a fallback.
    pub fn endpoint<'a>(&'a self, arrow: &'a ShapeRecord, terminal: Terminal) -> Option<&'a str> {
        self.bindings
            .iter()
            .find(|b| b.from_id == arrow.id && b.terminal == terminal)
            .map(|b| b.to_id.as_str())
            .or_else(|| {
                arrow
                    .props
                    .get(terminal.key())
                    .and_then(|t| t.get("boundShapeId"))
                    .and_then(Value::as_str)
            })
    }
}

fn record_values(snapshot: &Value) -> Vec<&Value> {
    match snapshot {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            if let Some(document) = map.get("document") {
                return record_values(document);
            }
            match (map.get("store"), map.get("records")) {
                (Some(Value::Object(store)), _) => store.values().collect(),
                (_, Some(Value::Array(items))) => items.iter().collect(),
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

// ─── Shape interpretation ────────────────────────────────────────────────

pub fn is_connector(shape: &ShapeRecord) -> bool {
    shape.kind == "arrow"
}

/// The node kind a shape stands for, or `None` when it is not a graph node
/// (connectors, freehand drawings, images, ...).
pub fn shape_node_type(shape: &ShapeRecord) -> Option<NodeType> {
    if is_connector(shape) {
        return None;
    }
    if let Some(t) = str_field(&shape.meta, "nodeType").and_then(NodeType::parse) {
        return Some(t);
    }
    match shape.kind.as_str() {
        "frame" => Some(NodeType::Frame),
        "text" => Some(NodeType::Text),
        "note" => Some(NodeType::Note),
        "geo" => Some(match str_field(&shape.props, "geo").unwrap_or("rectangle") {
            "ellipse" | "oval" => NodeType::Circle,
            "cloud" => NodeType::Cloud,
            "diamond" | "rhombus" => NodeType::Diamond,
            "hexagon" => NodeType::Hexagon,
            _ => NodeType::Box,
        }),
        _ => None,
    }
}

fn arrowhead_drawn(shape: &ShapeRecord, key: &str) -> bool {
    str_field(&shape.props, key).is_some_and(|head| head != "none")
}

fn shape_to_node(shape: &ShapeRecord, node_type: NodeType) -> Node {
    let id = NodeId::intern(strip_shape_prefix(&shape.id));
    let label = str_field(&shape.meta, "label")
        .or_else(|| str_field(&shape.props, "text"))
        .or_else(|| str_field(&shape.props, "name"))
        .unwrap_or_default();

    let mut node = Node::new(id, label, node_type);
    node.description = str_field(&shape.meta, "description")
        .unwrap_or_default()
        .to_string();
    node.color = str_field(&shape.meta, "color")
        .or_else(|| str_field(&shape.props, "color"))
        .map(str::to_string);
    node.opacity = shape
        .meta
        .get("opacity")
        .and_then(Value::as_f64)
        .map(|o| o as f32)
        .or(shape.opacity.filter(|o| *o < 1.0))
        .filter(|o| o.is_finite())
        .map(|o| o.clamp(0.0, 1.0));
    if node_type.is_annotation() {
        node.position = str_field(&shape.meta, "position").map(HintPosition::parse);
        node.relative_to = str_field(&shape.meta, "relativeTo").map(NodeId::intern);
    }
    node
}

// ─── Extraction ──────────────────────────────────────────────────────────

/// Best-effort GraphState from a visual snapshot. Never fails.
pub fn extract(snapshot: &Value) -> GraphState {
    let records = Records::parse(snapshot);
    let by_id: HashMap<&str, &ShapeRecord> =
        records.shapes.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut state = GraphState::new();

    for shape in &records.shapes {
        let Some(node_type) = shape_node_type(shape) else {
            continue;
        };
        let mut node = shape_to_node(shape, node_type);
        // Only a frame shape confers a parent; pages and groups do not.
        node.parent_id = shape
            .parent_id
            .as_deref()
            .and_then(|p| by_id.get(p))
            .filter(|parent| shape_node_type(parent) == Some(NodeType::Frame))
            .map(|parent| NodeId::intern(strip_shape_prefix(&parent.id)));
        state.insert_node(node);
    }

    for arrow in records.shapes.iter().filter(|s| is_connector(s)) {
        let resolve = |terminal| {
            records
                .endpoint(arrow, terminal)
                .map(|raw| NodeId::intern(strip_shape_prefix(raw)))
                .filter(|id| state.contains_node(*id) && !state.is_frame(*id))
        };
        let (Some(source), Some(target)) = (resolve(Terminal::Start), resolve(Terminal::End))
        else {
            log::debug!("dropping connector {} with unresolved terminal", arrow.id);
            continue;
        };
        let edge = Edge {
            id: EdgeId::intern(strip_shape_prefix(&arrow.id)),
            source_id: source,
            target_id: target,
            bidirectional: arrowhead_drawn(arrow, "arrowheadStart")
                && arrowhead_drawn(arrow, "arrowheadEnd"),
        };
        state.insert_edge(edge);
    }

    let cleanup = state.cleanup();
    log::info!(
        "extracted {} node(s), {} edge(s) from snapshot ({} repaired)",
        state.nodes.len(),
        state.edges.len(),
        cleanup.len()
    );
    state
}

/// `extract` from raw JSON text; unparseable text yields an empty graph.
pub fn extract_str(raw: &str) -> GraphState {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => extract(&value),
        Err(err) => {
            log::warn!("unreadable snapshot, starting empty: {err}");
            GraphState::new()
        }
    }
}
