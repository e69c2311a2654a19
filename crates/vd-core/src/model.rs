//! Core graph data model for voice-edited diagrams.
//!
//! The graph is two flat maps: nodes by id and edges by id. Containment is
//! expressed through `Node::parent_id`, which may only name a `frame` node.
//! The model never stores geometry; positions are re-derived by the layout
//! coordinator on every render. `position`/`relative_to` are placement
//! *hints* and are only honoured on annotation kinds (`text`, `note`).

use crate::id::{EdgeId, NodeId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::fmt;

// ─── Node kinds ──────────────────────────────────────────────────────────

/// The closed set of node kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    // Semantic infrastructure kinds
    Database,
    Server,
    Client,
    Storage,
    Network,
    // Generic shapes
    Box,
    Circle,
    Cloud,
    Diamond,
    Hexagon,
    Person,
    Process,
    Data,
    // Structural / annotation kinds
    Frame,
    Text,
    Note,
}

impl NodeType {
    pub const ALL: [NodeType; 16] = [
        NodeType::Database,
        NodeType::Server,
        NodeType::Client,
        NodeType::Storage,
        NodeType::Network,
        NodeType::Box,
        NodeType::Circle,
        NodeType::Cloud,
        NodeType::Diamond,
        NodeType::Hexagon,
        NodeType::Person,
        NodeType::Process,
        NodeType::Data,
        NodeType::Frame,
        NodeType::Text,
        NodeType::Note,
    ];

    /// Parse a wire keyword. Unknown keywords yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Database => "database",
            NodeType::Server => "server",
            NodeType::Client => "client",
            NodeType::Storage => "storage",
            NodeType::Network => "network",
            NodeType::Box => "box",
            NodeType::Circle => "circle",
            NodeType::Cloud => "cloud",
            NodeType::Diamond => "diamond",
            NodeType::Hexagon => "hexagon",
            NodeType::Person => "person",
            NodeType::Process => "process",
            NodeType::Data => "data",
            NodeType::Frame => "frame",
            NodeType::Text => "text",
            NodeType::Note => "note",
        }
    }

    /// Annotation kinds accept `position`/`relativeTo` placement hints.
    pub fn is_annotation(&self) -> bool {
        matches!(self, NodeType::Text | NodeType::Note)
    }

    /// Palette color used when a node carries no explicit override.
    pub fn default_color(&self) -> &'static str {
        match self {
            NodeType::Database => "blue",
            NodeType::Server => "green",
            NodeType::Client => "violet",
            NodeType::Storage => "orange",
            NodeType::Network => "light-blue",
            NodeType::Cloud => "light-blue",
            NodeType::Person => "light-violet",
            NodeType::Process => "light-green",
            NodeType::Data => "light-red",
            NodeType::Diamond => "yellow",
            NodeType::Hexagon => "red",
            NodeType::Box | NodeType::Circle => "black",
            NodeType::Frame => "grey",
            NodeType::Text => "black",
            NodeType::Note => "yellow",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Placement hints ─────────────────────────────────────────────────────

/// Relative placement keyword for annotation nodes.
///
/// `Top`/`Bottom` are kept distinct from `Above`/`Below` so the keyword
/// round-trips verbatim, but they resolve identically. Unknown keywords are
/// preserved in `Other` and resolve like `Right`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HintPosition {
    Above,
    Below,
    Left,
    Right,
    Top,
    Bottom,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Other(String),
}

impl HintPosition {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "above" => HintPosition::Above,
            "below" => HintPosition::Below,
            "left" => HintPosition::Left,
            "right" => HintPosition::Right,
            "top" => HintPosition::Top,
            "bottom" => HintPosition::Bottom,
            "top-left" => HintPosition::TopLeft,
            "top-right" => HintPosition::TopRight,
            "bottom-left" => HintPosition::BottomLeft,
            "bottom-right" => HintPosition::BottomRight,
            _ => HintPosition::Other(s.to_string()),
        }
    }

    pub fn keyword(&self) -> &str {
        match self {
            HintPosition::Above => "above",
            HintPosition::Below => "below",
            HintPosition::Left => "left",
            HintPosition::Right => "right",
            HintPosition::Top => "top",
            HintPosition::Bottom => "bottom",
            HintPosition::TopLeft => "top-left",
            HintPosition::TopRight => "top-right",
            HintPosition::BottomLeft => "bottom-left",
            HintPosition::BottomRight => "bottom-right",
            HintPosition::Other(s) => s,
        }
    }
}

impl Serialize for HintPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.keyword())
    }
}

impl<'de> Deserialize<'de> for HintPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(HintPosition::parse(&s))
    }
}

// ─── Nodes & Edges ───────────────────────────────────────────────────────

/// A diagram node. Carries no coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<HintPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_to: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
}

impl Node {
    pub fn new(id: NodeId, label: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id,
            label: label.into(),
            description: String::new(),
            node_type,
            parent_id: None,
            color: None,
            position: None,
            relative_to: None,
            opacity: None,
        }
    }

    pub fn is_frame(&self) -> bool {
        self.node_type == NodeType::Frame
    }

    /// The placement hint, honoured only for annotation kinds.
    pub fn hint_position(&self) -> Option<&HintPosition> {
        if self.node_type.is_annotation() {
            self.position.as_ref()
        } else {
            None
        }
    }

    /// The reference node of the placement hint, only for annotation kinds.
    pub fn hint_anchor(&self) -> Option<NodeId> {
        if self.node_type.is_annotation() {
            self.relative_to
        } else {
            None
        }
    }

    pub fn effective_color(&self) -> &str {
        self.color
            .as_deref()
            .unwrap_or_else(|| self.node_type.default_color())
    }

    pub fn effective_opacity(&self) -> f32 {
        self.opacity.unwrap_or(1.0)
    }
}

/// A connection between two nodes. Frames are never endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    #[serde(default)]
    pub bidirectional: bool,
}

impl Edge {
    pub fn new(source_id: NodeId, target_id: NodeId) -> Self {
        Self {
            id: EdgeId::between(source_id, target_id),
            source_id,
            target_id,
            bidirectional: false,
        }
    }

    pub fn touches(&self, id: NodeId) -> bool {
        self.source_id == id || self.target_id == id
    }
}

// ─── Graph state ─────────────────────────────────────────────────────────

/// What a cascading node removal took with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removal {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<EdgeId>,
}

impl Removal {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// What a post-mutation cleanup pass repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cleanup {
    /// Edges purged because an endpoint no longer exists.
    pub orphaned_edges: Vec<EdgeId>,
    /// Edges purged because an endpoint is a frame.
    pub frame_edges: Vec<EdgeId>,
    /// Nodes whose `parent_id` named a missing or non-frame node.
    pub detached_nodes: Vec<NodeId>,
    /// Nodes detached to break a containment cycle.
    pub cycle_breaks: Vec<NodeId>,
}

impl Cleanup {
    /// Total number of repairs.
    pub fn len(&self) -> usize {
        self.orphaned_edges.len()
            + self.frame_edges.len()
            + self.detached_nodes.len()
            + self.cycle_breaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The authoritative per-session graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphState {
    pub nodes: HashMap<NodeId, Node>,
    pub edges: HashMap<EdgeId, Edge>,
}

impl GraphState {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn is_frame(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(Node::is_frame)
    }

    /// Insert or overwrite a node (last write wins).
    pub fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    /// Insert or overwrite an edge (last write wins).
    pub fn insert_edge(&mut self, edge: Edge) {
        self.edges.insert(edge.id, edge);
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<Edge> {
        self.edges.remove(&id)
    }

    /// Node ids sorted by text, for deterministic iteration.
    pub fn sorted_node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Edge ids sorted by text, for deterministic iteration.
    pub fn sorted_edge_ids(&self) -> Vec<EdgeId> {
        let mut ids: Vec<EdgeId> = self.edges.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Direct children of a node (nodes whose `parent_id` names it), sorted.
    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut children: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.parent_id == Some(id))
            .map(|n| n.id)
            .collect();
        children.sort();
        children
    }

    /// The first edge (in id order) going exactly from `source` to `target`.
    pub fn find_edge_between(&self, source: NodeId, target: NodeId) -> Option<EdgeId> {
        self.sorted_edge_ids().into_iter().find(|id| {
            let e = &self.edges[id];
            e.source_id == source && e.target_id == target
        })
    }

    /// Would making `parent` the container of `child` close a containment cycle?
    pub fn would_create_cycle(&self, child: NodeId, parent: NodeId) -> bool {
        if child == parent {
            return true;
        }
        let mut seen = HashSet::new();
        let mut current = Some(parent);
        while let Some(id) = current {
            if id == child {
                return true;
            }
            // A pre-existing cycle above `parent` must not spin forever.
            if !seen.insert(id) {
                return false;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent_id);
        }
        false
    }

    /// Remove a node, every node contained in it (transitively), and every
    /// edge touching a removed node. Removing a missing id is a no-op.
    pub fn remove_node_cascade(&mut self, id: NodeId) -> Removal {
        let mut removal = Removal::default();
        let mut work: SmallVec<[NodeId; 8]> = SmallVec::new();
        work.push(id);

        while let Some(current) = work.pop() {
            if self.nodes.remove(&current).is_none() {
                continue;
            }
            removal.nodes.push(current);
            work.extend(
                self.nodes
                    .values()
                    .filter(|n| n.parent_id == Some(current))
                    .map(|n| n.id),
            );
        }

        if !removal.nodes.is_empty() {
            let gone: HashSet<NodeId> = removal.nodes.iter().copied().collect();
            self.edges.retain(|edge_id, edge| {
                let dead = gone.contains(&edge.source_id) || gone.contains(&edge.target_id);
                if dead {
                    removal.edges.push(*edge_id);
                }
                !dead
            });
            removal.edges.sort();
        }
        removal
    }

    /// Drop every edge whose source or target is missing.
    pub fn purge_orphan_edges(&mut self) -> Vec<EdgeId> {
        let nodes = &self.nodes;
        let mut purged = Vec::new();
        self.edges.retain(|id, edge| {
            let alive = nodes.contains_key(&edge.source_id) && nodes.contains_key(&edge.target_id);
            if !alive {
                log::warn!(
                    "purging orphaned edge {} ({} -> {})",
                    id,
                    edge.source_id,
                    edge.target_id
                );
                purged.push(*id);
            }
            alive
        });
        purged.sort();
        purged
    }

    /// Drop every edge that touches a frame. Frames are never edge endpoints,
    /// but a frame can appear after its edge in a batch, or an endpoint can
    /// be retyped to `frame`.
    pub fn purge_frame_edges(&mut self) -> Vec<EdgeId> {
        let nodes = &self.nodes;
        let is_frame = |id: &NodeId| nodes.get(id).is_some_and(Node::is_frame);
        let mut purged = Vec::new();
        self.edges.retain(|id, edge| {
            let touches_frame = is_frame(&edge.source_id) || is_frame(&edge.target_id);
            if touches_frame {
                log::warn!(
                    "purging edge {} ({} -> {}): frame endpoint",
                    id,
                    edge.source_id,
                    edge.target_id
                );
                purged.push(*id);
            }
            !touches_frame
        });
        purged.sort();
        purged
    }

    /// Clear any `parent_id` that names a missing or non-frame node.
    pub fn clear_dangling_parents(&mut self) -> Vec<NodeId> {
        let frames: HashSet<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.is_frame())
            .map(|n| n.id)
            .collect();
        let mut detached = Vec::new();
        for node in self.nodes.values_mut() {
            if let Some(parent) = node.parent_id
                && !frames.contains(&parent)
            {
                log::warn!("detaching {} from non-frame parent {}", node.id, parent);
                node.parent_id = None;
                detached.push(node.id);
            }
        }
        detached.sort();
        detached
    }

    /// Detach nodes until no containment cycle remains.
    ///
    /// Nodes are visited in id order; the node at which a walk re-enters its
    /// own path is detached, so the result is deterministic.
    pub fn break_containment_cycles(&mut self) -> Vec<NodeId> {
        let mut broken = Vec::new();
        let mut settled: HashSet<NodeId> = HashSet::new();

        for start in self.sorted_node_ids() {
            let mut path: Vec<NodeId> = Vec::new();
            let mut on_path: HashSet<NodeId> = HashSet::new();
            let mut current = Some(start);

            while let Some(id) = current {
                if settled.contains(&id) {
                    break;
                }
                if !on_path.insert(id) {
                    // `id` closes the cycle: cut the link from the last node
                    // on the path back into it.
                    if let Some(&last) = path.last()
                        && let Some(node) = self.nodes.get_mut(&last)
                    {
                        log::warn!("breaking containment cycle at {}", last);
                        node.parent_id = None;
                        broken.push(last);
                    }
                    break;
                }
                path.push(id);
                current = self.nodes.get(&id).and_then(|n| n.parent_id);
            }
            settled.extend(path);
        }
        broken
    }

    /// Post-mutation invariant enforcement: orphaned and frame-bound edges,
    /// dangling containment, containment cycles.
    pub fn cleanup(&mut self) -> Cleanup {
        Cleanup {
            orphaned_edges: self.purge_orphan_edges(),
            frame_edges: self.purge_frame_edges(),
            detached_nodes: self.clear_dangling_parents(),
            cycle_breaks: self.break_containment_cycles(),
        }
    }
}
