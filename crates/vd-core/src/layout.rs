//! Layout coordination: GraphState → engine input → absolute LayoutResult.
//!
//! Frames become containers, their children nest inside, and everything
//! else sits at the root. Hint-positioned annotations are sent to the engine
//! too (so edges touching them have endpoints) but their engine position is
//! replaced afterwards by a keyword-relative placement. Edges touching a
//! frame never reach the engine and never appear in the result.

use crate::config::LayoutConfig;
use crate::engine::{LayoutEdge, LayoutEngine, LayoutGraph, LayoutNode, PositionedNode};
use crate::error::LayoutError;
use crate::id::{EdgeId, NodeId};
use crate::model::{Edge, GraphState, HintPosition, Node};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ─── Geometry ────────────────────────────────────────────────────────────

/// Absolute bounding box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Bounds {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }
}

/// Top-left corner for a `width`×`height` box placed against `reference`.
///
/// Horizontal and vertical rules are independent: left/right put the box
/// `gap` outside the reference's side, above/below put it `gap` outside its
/// top or bottom edge, and an axis with no rule is centered. Corner keywords
/// combine one rule from each axis; unknown keywords behave as `right`.
pub fn place(
    position: &HintPosition,
    reference: Bounds,
    width: f32,
    height: f32,
    gap: f32,
) -> (f32, f32) {
    #[derive(Clone, Copy)]
    enum Side {
        Before,
        Center,
        After,
    }

    let (horizontal, vertical) = match position {
        HintPosition::Above | HintPosition::Top => (Side::Center, Side::Before),
        HintPosition::Below | HintPosition::Bottom => (Side::Center, Side::After),
        HintPosition::Left => (Side::Before, Side::Center),
        HintPosition::Right | HintPosition::Other(_) => (Side::After, Side::Center),
        HintPosition::TopLeft => (Side::Before, Side::Before),
        HintPosition::TopRight => (Side::After, Side::Before),
        HintPosition::BottomLeft => (Side::Before, Side::After),
        HintPosition::BottomRight => (Side::After, Side::After),
    };

    let (cx, cy) = reference.center();
    let x = match horizontal {
        Side::Before => reference.x - gap - width,
        Side::Center => cx - width / 2.0,
        Side::After => reference.right() + gap,
    };
    let y = match vertical {
        Side::Before => reference.y - gap - height,
        Side::Center => cy - height / 2.0,
        Side::After => reference.bottom() + gap,
    };
    (x, y)
}

// ─── Result ──────────────────────────────────────────────────────────────

/// A node with fresh geometry; attributes carried through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedNode {
    #[serde(flatten)]
    pub node: Node,
    #[serde(flatten)]
    pub bounds: Bounds,
    /// `color` or the kind's default.
    pub resolved_color: String,
    /// `opacity` or fully opaque.
    pub resolved_opacity: f32,
}

/// Ids the renderer should delete because they are no longer current.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StaleIds {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<EdgeId>,
}

impl StaleIds {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// One render cycle's positioned diagram. Nodes and edges sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutResult {
    pub nodes: Vec<PlacedNode>,
    pub edges: Vec<Edge>,
}

impl LayoutResult {
    pub fn node(&self, id: NodeId) -> Option<&PlacedNode> {
        self.nodes
            .binary_search_by(|n| n.node.id.cmp(&id))
            .ok()
            .map(|i| &self.nodes[i])
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.node.id).collect()
    }

    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.edges.iter().map(|e| e.id).collect()
    }

    /// Everything `previous` rendered that this result no longer contains.
    pub fn stale_ids(&self, previous: &LayoutResult) -> StaleIds {
        let nodes: HashSet<NodeId> = self.node_ids().into_iter().collect();
        let edges: HashSet<EdgeId> = self.edge_ids().into_iter().collect();
        StaleIds {
            nodes: previous
                .node_ids()
                .into_iter()
                .filter(|id| !nodes.contains(id))
                .collect(),
            edges: previous
                .edge_ids()
                .into_iter()
                .filter(|id| !edges.contains(id))
                .collect(),
        }
    }
}

// ─── Coordinator ─────────────────────────────────────────────────────────

/// The engine input for one graph, plus which nodes get hint placement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedLayout {
    pub graph: LayoutGraph,
    pub hinted: Vec<NodeId>,
}

pub struct LayoutCoordinator {
    engine: Arc<dyn LayoutEngine>,
    config: LayoutConfig,
}

impl LayoutCoordinator {
    pub fn new(engine: Arc<dyn LayoutEngine>, config: LayoutConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Compute a fresh layout for `state`.
    ///
    /// # Errors
    /// The engine failed, timed out, or left a node unpositioned. No partial
    /// layout is ever returned.
    pub async fn layout(&self, state: &GraphState) -> Result<LayoutResult, LayoutError> {
        let prepared = self.prepare(state);
        let timeout = self.config.timeout();

        let call = self.engine.compute(prepared.graph.clone());
        let positioned = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(positioned)) => positioned,
            Ok(Err(err)) => {
                log::error!("layout engine failed: {err}");
                return Err(err);
            }
            Err(_) => {
                log::error!("layout engine timed out after {} ms", self.config.timeout_ms);
                return Err(LayoutError::Timeout(self.config.timeout_ms));
            }
        };

        let mut bounds = HashMap::with_capacity(state.nodes.len());
        flatten(&positioned.children, 0.0, 0.0, &mut bounds);
        let missing = state
            .sorted_node_ids()
            .into_iter()
            .find(|id| !bounds.contains_key(id));
        if let Some(missing) = missing {
            log::error!("layout engine dropped node {missing}");
            return Err(LayoutError::MissingNode(missing.to_string()));
        }

        resolve_hints(state, &prepared.hinted, &mut bounds, self.config.hint_gap);
        Ok(assemble(state, &prepared.graph.edges, &bounds))
    }

    /// Build the hierarchical engine input.
    pub fn prepare(&self, state: &GraphState) -> PreparedLayout {
        let parents = effective_parents(state);
        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut roots = Vec::new();
        for id in state.sorted_node_ids() {
            match parents.get(&id) {
                Some(parent) => children.entry(*parent).or_default().push(id),
                None => roots.push(id),
            }
        }

        let graph_children = roots
            .iter()
            .map(|id| self.build_node(state, *id, &children))
            .collect();

        let edges = state
            .sorted_edge_ids()
            .into_iter()
            .filter_map(|id| {
                let edge = &state.edges[&id];
                let endpoints_ok = [edge.source_id, edge.target_id]
                    .iter()
                    .all(|n| state.contains_node(*n) && !state.is_frame(*n));
                if !endpoints_ok {
                    log::debug!("excluding edge {id} from layout");
                }
                endpoints_ok.then_some(LayoutEdge {
                    id,
                    source: edge.source_id,
                    target: edge.target_id,
                })
            })
            .collect();

        let hinted = state
            .sorted_node_ids()
            .into_iter()
            .filter(|id| state.nodes[id].hint_position().is_some())
            .collect();

        PreparedLayout {
            graph: LayoutGraph {
                children: graph_children,
                edges,
            },
            hinted,
        }
    }

    fn build_node(
        &self,
        state: &GraphState,
        id: NodeId,
        children: &HashMap<NodeId, Vec<NodeId>>,
    ) -> LayoutNode {
        let node = &state.nodes[&id];
        let (width, height) = self.config.intrinsic_size(node);
        LayoutNode {
            id,
            width,
            height,
            children: children
                .get(&id)
                .map(|ids| {
                    ids.iter()
                        .map(|c| self.build_node(state, *c, children))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Each node's container, when it has a valid one: the parent exists, is a
/// frame, and the chain above it is acyclic.
fn effective_parents(state: &GraphState) -> HashMap<NodeId, NodeId> {
    let mut parents = HashMap::new();
    for (id, node) in &state.nodes {
        let Some(parent) = node.parent_id else { continue };
        if !state.is_frame(parent) {
            continue;
        }
        let mut seen = HashSet::from([*id]);
        let mut current = Some(parent);
        let mut cyclic = false;
        while let Some(p) = current {
            if !seen.insert(p) {
                cyclic = true;
                break;
            }
            current = state
                .node(p)
                .and_then(|n| n.parent_id)
                .filter(|pp| state.is_frame(*pp));
        }
        if !cyclic {
            parents.insert(*id, parent);
        }
    }
    parents
}

/// Convert engine-relative positions to absolute bounds.
fn flatten(nodes: &[PositionedNode], ox: f32, oy: f32, out: &mut HashMap<NodeId, Bounds>) {
    for node in nodes {
        let x = ox + node.x;
        let y = oy + node.y;
        out.insert(node.id, Bounds::new(x, y, node.width, node.height));
        flatten(&node.children, x, y, out);
    }
}

/// Overwrite hint-positioned nodes with keyword-relative placement.
fn resolve_hints(
    state: &GraphState,
    hinted: &[NodeId],
    bounds: &mut HashMap<NodeId, Bounds>,
    gap: f32,
) {
    let hinted_set: HashSet<NodeId> = hinted.iter().copied().collect();
    let drawing = state
        .sorted_node_ids()
        .into_iter()
        .filter(|id| !hinted_set.contains(id))
        .filter_map(|id| bounds.get(&id).copied())
        .reduce(|a, b| a.union(&b))
        .unwrap_or_default();

    let mut resolved: HashSet<NodeId> = HashSet::new();
    let mut pending: Vec<NodeId> = hinted.to_vec();

    // Hints anchored on other hints wait for their anchor; anything left
    // when a pass makes no progress (anchor cycles) falls back to the drawing.
    loop {
        let before = resolved.len();
        let mut deferred = Vec::new();
        for id in pending.drain(..) {
            let node = &state.nodes[&id];
            let anchor = node
                .hint_anchor()
                .filter(|a| *a != id && bounds.contains_key(a));
            let reference = match anchor {
                Some(a) if hinted_set.contains(&a) && !resolved.contains(&a) => {
                    deferred.push(id);
                    continue;
                }
                Some(a) => bounds[&a],
                None => drawing,
            };
            place_hint(node, reference, bounds, gap);
            resolved.insert(id);
        }
        if deferred.is_empty() {
            break;
        }
        if resolved.len() == before {
            for id in deferred {
                log::debug!("hint anchor cycle at {id}, placing against the drawing");
                place_hint(&state.nodes[&id], drawing, bounds, gap);
            }
            break;
        }
        pending = deferred;
    }
}

fn place_hint(node: &Node, reference: Bounds, bounds: &mut HashMap<NodeId, Bounds>, gap: f32) {
    let Some(position) = node.hint_position() else { return };
    let Some(own) = bounds.get_mut(&node.id) else { return };
    let (x, y) = place(position, reference, own.width, own.height, gap);
    own.x = x;
    own.y = y;
}

fn assemble(
    state: &GraphState,
    edges: &[LayoutEdge],
    bounds: &HashMap<NodeId, Bounds>,
) -> LayoutResult {
    let nodes = state
        .sorted_node_ids()
        .into_iter()
        .map(|id| {
            let node = state.nodes[&id].clone();
            PlacedNode {
                resolved_color: node.effective_color().to_string(),
                resolved_opacity: node.effective_opacity(),
                bounds: bounds[&id],
                node,
            }
        })
        .collect();
    let edges = edges.iter().map(|e| state.edges[&e.id].clone()).collect();
    LayoutResult { nodes, edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LayeredEngine, PositionedGraph};
    use crate::model::NodeType;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> NodeId {
        NodeId::intern(s)
    }

    const BOX: Bounds = Bounds {
        x: 100.0,
        y: 100.0,
        width: 200.0,
        height: 100.0,
    };

    #[test]
    fn place_each_keyword() {
        let p = |k: &str| place(&HintPosition::parse(k), BOX, 40.0, 20.0, 10.0);
        assert_eq!(p("above"), (180.0, 70.0));
        assert_eq!(p("top"), (180.0, 70.0));
        assert_eq!(p("below"), (180.0, 210.0));
        assert_eq!(p("bottom"), (180.0, 210.0));
        assert_eq!(p("left"), (50.0, 140.0));
        assert_eq!(p("right"), (310.0, 140.0));
        assert_eq!(p("top-left"), (50.0, 70.0));
        assert_eq!(p("top-right"), (310.0, 70.0));
        assert_eq!(p("bottom-left"), (50.0, 210.0));
        assert_eq!(p("bottom-right"), (310.0, 210.0));
        assert_eq!(p("somewhere"), p("right"));
    }

    #[test]
    fn union_covers_both() {
        let a = Bounds::new(0.0, 0.0, 10.0, 10.0);
        let b = Bounds::new(20.0, -5.0, 10.0, 10.0);
        assert_eq!(a.union(&b), Bounds::new(0.0, -5.0, 30.0, 15.0));
    }

    /// Puts every node at a fixed spot so hint math is easy to check.
    struct FixedEngine(HashMap<NodeId, (f32, f32)>);

    #[async_trait]
    impl LayoutEngine for FixedEngine {
        async fn compute(&self, graph: LayoutGraph) -> Result<PositionedGraph, LayoutError> {
            fn go(
                nodes: Vec<LayoutNode>,
                at: &HashMap<NodeId, (f32, f32)>,
            ) -> Vec<PositionedNode> {
                nodes
                    .into_iter()
                    .map(|n| {
                        let (x, y) = at.get(&n.id).copied().unwrap_or_default();
                        PositionedNode {
                            id: n.id,
                            x,
                            y,
                            width: n.width,
                            height: n.height,
                            children: go(n.children, at),
                        }
                    })
                    .collect()
            }
            Ok(PositionedGraph {
                children: go(graph.children, &self.0),
            })
        }
    }

    fn coordinator(engine: impl LayoutEngine + 'static) -> LayoutCoordinator {
        LayoutCoordinator::new(Arc::new(engine), LayoutConfig::default())
    }

    #[tokio::test]
    async fn hint_above_anchor_is_deterministic() {
        let mut g = GraphState::new();
        g.insert_node(Node::new(id("h_n1"), "Server", NodeType::Server));
        let mut caption = Node::new(id("h_cap"), "abcde", NodeType::Text);
        caption.position = Some(HintPosition::Above);
        caption.relative_to = Some(id("h_n1"));
        g.insert_node(caption);

        let engine = FixedEngine(HashMap::from([(id("h_n1"), (100.0, 200.0))]));
        let coordinator = coordinator(engine);
        let first = coordinator.layout(&g).await.unwrap();
        let second = coordinator.layout(&g).await.unwrap();
        assert_eq!(first, second);

        // n1 is 160×60 at (100,200); caption is 40×24, gap 20.
        let cap = first.node(id("h_cap")).unwrap();
        assert_eq!((cap.bounds.x, cap.bounds.y), (160.0, 156.0));
    }

    #[tokio::test]
    async fn hint_without_anchor_uses_whole_drawing() {
        let mut g = GraphState::new();
        g.insert_node(Node::new(id("d_a"), "A", NodeType::Box));
        g.insert_node(Node::new(id("d_b"), "B", NodeType::Box));
        let mut title = Node::new(id("d_title"), "Title", NodeType::Text);
        title.position = Some(HintPosition::Below);
        g.insert_node(title);

        let engine = FixedEngine(HashMap::from([
            (id("d_a"), (0.0, 0.0)),
            (id("d_b"), (300.0, 100.0)),
        ]));
        let result = coordinator(engine).layout(&g).await.unwrap();
        // Drawing spans (0,0)-(460,160); title 40×24 centered below.
        let t = result.node(id("d_title")).unwrap();
        assert_eq!((t.bounds.x, t.bounds.y), (210.0, 180.0));
    }

    #[tokio::test]
    async fn hint_chained_on_hint() {
        let mut g = GraphState::new();
        g.insert_node(Node::new(id("c_base"), "Base", NodeType::Box));
        let mut first = Node::new(id("c_z_first"), "1234", NodeType::Text);
        first.position = Some(HintPosition::Right);
        first.relative_to = Some(id("c_base"));
        let mut second = Node::new(id("c_a_second"), "1234", NodeType::Text);
        second.position = Some(HintPosition::Below);
        second.relative_to = Some(id("c_z_first"));
        g.insert_node(first);
        g.insert_node(second);

        let engine = FixedEngine(HashMap::new());
        let result = coordinator(engine).layout(&g).await.unwrap();
        let f = result.node(id("c_z_first")).unwrap().bounds;
        let s = result.node(id("c_a_second")).unwrap().bounds;
        assert_eq!(f.x, 180.0);
        assert_eq!(s.x, f.x);
        assert_eq!(s.y, f.bottom() + 20.0);
    }

    #[tokio::test]
    async fn hint_anchor_cycle_falls_back_to_drawing() {
        let mut g = GraphState::new();
        g.insert_node(Node::new(id("y_base"), "Base", NodeType::Box));
        let mut a = Node::new(id("y_a"), "a", NodeType::Note);
        a.position = Some(HintPosition::Left);
        a.relative_to = Some(id("y_b"));
        let mut b = Node::new(id("y_b"), "b", NodeType::Note);
        b.position = Some(HintPosition::Left);
        b.relative_to = Some(id("y_a"));
        g.insert_node(a);
        g.insert_node(b);

        let result = coordinator(FixedEngine(HashMap::new())).layout(&g).await.unwrap();
        let a = result.node(id("y_a")).unwrap().bounds;
        let b = result.node(id("y_b")).unwrap().bounds;
        assert_eq!(a, b);
        assert_eq!(a.x, -20.0 - 160.0);
    }

    #[test]
    fn frame_edges_excluded_cross_boundary_kept() {
        let mut g = GraphState::new();
        g.insert_node(Node::new(id("x_zone"), "Zone", NodeType::Frame));
        let mut inside = Node::new(id("x_in"), "In", NodeType::Server);
        inside.parent_id = Some(id("x_zone"));
        g.insert_node(inside);
        g.insert_node(Node::new(id("x_out"), "Out", NodeType::Client));
        g.insert_edge(Edge::new(id("x_out"), id("x_in")));
        g.insert_edge(Edge::new(id("x_out"), id("x_zone")));

        let prepared = coordinator(LayeredEngine::default()).prepare(&g);
        let edge_ids: Vec<_> = prepared.graph.edges.iter().map(|e| e.id).collect();
        assert_eq!(edge_ids, vec![EdgeId::intern("x_out->x_in")]);

        let roots: Vec<_> = prepared.graph.children.iter().map(|n| n.id).collect();
        assert_eq!(roots, vec![id("x_out"), id("x_zone")]);
        assert_eq!(prepared.graph.children[1].children[0].id, id("x_in"));
    }

    #[tokio::test]
    async fn frame_edges_never_in_result() {
        let mut g = GraphState::new();
        g.insert_node(Node::new(id("r_zone"), "Zone", NodeType::Frame));
        g.insert_node(Node::new(id("r_a"), "A", NodeType::Box));
        g.insert_edge(Edge::new(id("r_a"), id("r_zone")));

        let result = coordinator(LayeredEngine::default()).layout(&g).await.unwrap();
        assert!(result.edges.is_empty());
        assert_eq!(result.nodes.len(), 2);
    }

    #[tokio::test]
    async fn child_positions_are_absolute() {
        let mut g = GraphState::new();
        g.insert_node(Node::new(id("abs_zone"), "Zone", NodeType::Frame));
        let mut inside = Node::new(id("abs_in"), "In", NodeType::Server);
        inside.parent_id = Some(id("abs_zone"));
        g.insert_node(inside);

        let engine = FixedEngine(HashMap::from([
            (id("abs_zone"), (50.0, 50.0)),
            (id("abs_in"), (10.0, 30.0)),
        ]));
        let result = coordinator(engine).layout(&g).await.unwrap();
        let b = result.node(id("abs_in")).unwrap().bounds;
        assert_eq!((b.x, b.y), (60.0, 80.0));
    }

    struct BrokenEngine;

    #[async_trait]
    impl LayoutEngine for BrokenEngine {
        async fn compute(&self, _: LayoutGraph) -> Result<PositionedGraph, LayoutError> {
            Err(LayoutError::Engine("elk crashed".into()))
        }
    }

    struct SlowEngine;

    #[async_trait]
    impl LayoutEngine for SlowEngine {
        async fn compute(&self, graph: LayoutGraph) -> Result<PositionedGraph, LayoutError> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(LayeredEngine::default().layout(&graph))
        }
    }

    #[tokio::test]
    async fn engine_failure_propagates() {
        let mut g = GraphState::new();
        g.insert_node(Node::new(id("f_a"), "A", NodeType::Box));
        let err = coordinator(BrokenEngine).layout(&g).await.unwrap_err();
        assert_eq!(err, LayoutError::Engine("elk crashed".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn engine_timeout_propagates() {
        let mut g = GraphState::new();
        g.insert_node(Node::new(id("t_a"), "A", NodeType::Box));
        let err = coordinator(SlowEngine).layout(&g).await.unwrap_err();
        assert_eq!(err, LayoutError::Timeout(10_000));
    }

    #[tokio::test]
    async fn attributes_carried_through() {
        let mut g = GraphState::new();
        let mut db = Node::new(id("attr_db"), "Users", NodeType::Database);
        db.description = "primary".into();
        db.opacity = Some(0.5);
        g.insert_node(db.clone());

        let result = coordinator(LayeredEngine::default()).layout(&g).await.unwrap();
        let placed = result.node(id("attr_db")).unwrap();
        assert_eq!(placed.node, db);
        assert_eq!(placed.resolved_color, "blue");
        assert_eq!(placed.resolved_opacity, 0.5);
    }

    #[test]
    fn stale_ids_lists_removed_shapes() {
        let node = |s: &str| PlacedNode {
            node: Node::new(id(s), s, NodeType::Box),
            bounds: Bounds::default(),
            resolved_color: "black".into(),
            resolved_opacity: 1.0,
        };
        let previous = LayoutResult {
            nodes: vec![node("s_a"), node("s_b")],
            edges: vec![Edge::new(id("s_a"), id("s_b"))],
        };
        let current = LayoutResult {
            nodes: vec![node("s_a")],
            edges: vec![],
        };
        let stale = current.stale_ids(&previous);
        assert_eq!(stale.nodes, vec![id("s_b")]);
        assert_eq!(stale.edges, vec![EdgeId::intern("s_a->s_b")]);
    }
}
