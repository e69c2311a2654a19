//! The hierarchical layout-engine contract and a built-in layered engine.
//!
//! The coordinator hands the engine a tree of sized boxes plus the edges
//! between them and gets back the same tree with coordinates. Coordinates in
//! a `PositionedNode` are relative to its containing node (ELK convention);
//! top-level nodes are relative to the drawing origin.

use crate::config::LayoutConfig;
use crate::error::LayoutError;
use crate::id::{EdgeId, NodeId};
use async_trait::async_trait;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Engine input / output ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub id: NodeId,
    pub width: f32,
    pub height: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LayoutNode>,
}

impl LayoutNode {
    pub fn leaf(id: NodeId, width: f32, height: f32) -> Self {
        Self {
            id,
            width,
            height,
            children: Vec::new(),
        }
    }

    fn collect_ids(&self, out: &mut Vec<NodeId>) {
        out.push(self.id);
        for child in &self.children {
            child.collect_ids(out);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
}

/// The whole engine input: root-level nodes and every edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutGraph {
    pub children: Vec<LayoutNode>,
    pub edges: Vec<LayoutEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedNode {
    pub id: NodeId,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PositionedNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionedGraph {
    pub children: Vec<PositionedNode>,
}

// ─── Engine trait ────────────────────────────────────────────────────────

/// An external hierarchical layout engine. May run out of process.
#[async_trait]
pub trait LayoutEngine: Send + Sync {
    /// # Errors
    /// Any failure of the engine; the coordinator propagates it unchanged.
    async fn compute(&self, graph: LayoutGraph) -> Result<PositionedGraph, LayoutError>;
}

// ─── Built-in layered engine ─────────────────────────────────────────────

/// A small top-down layered layout.
///
/// Per container: edges are lifted to the container's direct children,
/// strongly connected components share a layer start, longest-path ranks
/// pick the layer, and layers are centered on the widest one. Containers
/// grow to fit their contents plus padding and a title band.
#[derive(Debug, Clone, Default)]
pub struct LayeredEngine {
    config: LayoutConfig,
}

impl LayeredEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    /// Synchronous core of `compute`.
    pub fn layout(&self, graph: &LayoutGraph) -> PositionedGraph {
        let (children, _, _) = self.layout_container(&graph.children, &graph.edges);
        PositionedGraph { children }
    }

    /// Lay out `nodes` as siblings; returns them positioned relative to the
    /// container's content origin, plus the content width and height.
    fn layout_container(
        &self,
        nodes: &[LayoutNode],
        edges: &[LayoutEdge],
    ) -> (Vec<PositionedNode>, f32, f32) {
        if nodes.is_empty() {
            return (Vec::new(), 0.0, 0.0);
        }

        let mut placed: Vec<PositionedNode> =
            nodes.iter().map(|n| self.size_node(n, edges)).collect();

        // Map every id in each sibling's subtree to that sibling.
        let mut owner: HashMap<NodeId, usize> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            let mut ids = Vec::new();
            node.collect_ids(&mut ids);
            for id in ids {
                owner.insert(id, i);
            }
        }

        let mut dag: DiGraph<usize, ()> = DiGraph::with_capacity(nodes.len(), edges.len());
        let indices: Vec<NodeIndex> = (0..nodes.len()).map(|i| dag.add_node(i)).collect();
        for edge in edges {
            if let (Some(&s), Some(&t)) = (owner.get(&edge.source), owner.get(&edge.target))
                && s != t
            {
                dag.update_edge(indices[s], indices[t], ());
            }
        }

        let ranks = longest_path_ranks(&dag);
        let layer_count = ranks.iter().copied().max().unwrap_or(0) + 1;
        let mut layers: Vec<Vec<usize>> = vec![Vec::new(); layer_count];
        for (i, &rank) in ranks.iter().enumerate() {
            layers[rank].push(i);
        }
        layers.retain(|layer| !layer.is_empty());

        let spacing = self.config.node_spacing;
        let layer_widths: Vec<f32> = layers
            .iter()
            .map(|layer| {
                let sum: f32 = layer.iter().map(|&i| placed[i].width).sum();
                sum + spacing * (layer.len().saturating_sub(1)) as f32
            })
            .collect();
        let content_width = layer_widths.iter().copied().fold(0.0, f32::max);

        let mut y = 0.0;
        for (layer, layer_width) in layers.iter().zip(&layer_widths) {
            let layer_height = layer.iter().map(|&i| placed[i].height).fold(0.0, f32::max);
            let mut x = (content_width - layer_width) / 2.0;
            for &i in layer {
                let node = &mut placed[i];
                node.x = x;
                node.y = y + (layer_height - node.height) / 2.0;
                x += node.width + spacing;
            }
            y += layer_height + self.config.layer_spacing;
        }
        let content_height = y - self.config.layer_spacing;

        (placed, content_width, content_height)
    }

    /// Size a node; containers are laid out recursively and grown to fit.
    fn size_node(&self, node: &LayoutNode, edges: &[LayoutEdge]) -> PositionedNode {
        if node.children.is_empty() {
            return PositionedNode {
                id: node.id,
                x: 0.0,
                y: 0.0,
                width: node.width,
                height: node.height,
                children: Vec::new(),
            };
        }

        let pad = self.config.frame_padding;
        let header = self.config.frame_header;
        let (mut children, content_w, content_h) = self.layout_container(&node.children, edges);
        for child in &mut children {
            child.x += pad;
            child.y += pad + header;
        }

        let width = node.width.max(content_w + 2.0 * pad);
        let height = node.height.max(content_h + 2.0 * pad + header);
        // Center contents when the declared minimum is wider than needed.
        let slack = (width - content_w - 2.0 * pad) / 2.0;
        if slack > 0.0 {
            for child in &mut children {
                child.x += slack;
            }
        }

        PositionedNode {
            id: node.id,
            x: 0.0,
            y: 0.0,
            width,
            height,
            children,
        }
    }
}

#[async_trait]
impl LayoutEngine for LayeredEngine {
    async fn compute(&self, graph: LayoutGraph) -> Result<PositionedGraph, LayoutError> {
        Ok(self.layout(&graph))
    }
}

/// Longest-path layer per node, with each cycle collapsed into one layer.
fn longest_path_ranks(dag: &DiGraph<usize, ()>) -> Vec<usize> {
    // tarjan_scc yields components in reverse topological order.
    let mut sccs = tarjan_scc(dag);
    sccs.reverse();

    let mut component = vec![0usize; dag.node_count()];
    for (c, scc) in sccs.iter().enumerate() {
        for idx in scc {
            component[idx.index()] = c;
        }
    }

    let mut component_rank = vec![0usize; sccs.len()];
    for (c, scc) in sccs.iter().enumerate() {
        let mut rank = 0;
        for &idx in scc {
            for edge in dag.edges_directed(idx, Direction::Incoming) {
                let pred = component[edge.source().index()];
                if pred != c {
                    rank = rank.max(component_rank[pred] + 1);
                }
            }
        }
        component_rank[c] = rank;
    }

    (0..dag.node_count())
        .map(|i| component_rank[component[i]])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::intern(s)
    }

    fn edge(s: &str, t: &str) -> LayoutEdge {
        LayoutEdge {
            id: EdgeId::between(id(s), id(t)),
            source: id(s),
            target: id(t),
        }
    }

    #[test]
    fn chain_stacks_vertically() {
        let engine = LayeredEngine::default();
        let graph = LayoutGraph {
            children: vec![
                LayoutNode::leaf(id("c"), 100.0, 50.0),
                LayoutNode::leaf(id("a"), 100.0, 50.0),
                LayoutNode::leaf(id("b"), 100.0, 50.0),
            ],
            edges: vec![edge("a", "b"), edge("b", "c")],
        };
        let out = engine.layout(&graph);
        let y = |name: &str| out.children.iter().find(|n| n.id == id(name)).unwrap().y;
        assert!(y("a") < y("b") && y("b") < y("c"));
        assert_eq!(y("b") - y("a"), 50.0 + 80.0);
    }

    #[test]
    fn cycle_does_not_hang() {
        let engine = LayeredEngine::default();
        let graph = LayoutGraph {
            children: vec![
                LayoutNode::leaf(id("x"), 10.0, 10.0),
                LayoutNode::leaf(id("y"), 10.0, 10.0),
            ],
            edges: vec![edge("x", "y"), edge("y", "x")],
        };
        let out = engine.layout(&graph);
        assert_eq!(out.children.len(), 2);
        assert_eq!(out.children[0].y, out.children[1].y);
    }

    #[test]
    fn container_wraps_children_with_padding() {
        let engine = LayeredEngine::default();
        let graph = LayoutGraph {
            children: vec![LayoutNode {
                id: id("vpc"),
                width: 0.0,
                height: 0.0,
                children: vec![
                    LayoutNode::leaf(id("w1"), 100.0, 40.0),
                    LayoutNode::leaf(id("w2"), 100.0, 40.0),
                ],
            }],
            edges: vec![],
        };
        let out = engine.layout(&graph);
        let vpc = &out.children[0];
        // Two siblings in one layer: 100 + 40 + 100, plus padding on both sides.
        assert_eq!(vpc.width, 240.0 + 48.0);
        assert_eq!(vpc.height, 40.0 + 48.0 + 32.0);
        assert_eq!(vpc.children[0].x, 24.0);
        assert_eq!(vpc.children[0].y, 56.0);
    }

    #[test]
    fn cross_container_edges_are_lifted() {
        let engine = LayeredEngine::default();
        let graph = LayoutGraph {
            children: vec![
                LayoutNode::leaf(id("lb"), 100.0, 40.0),
                LayoutNode {
                    id: id("zone"),
                    width: 0.0,
                    height: 0.0,
                    children: vec![LayoutNode::leaf(id("app"), 100.0, 40.0)],
                },
            ],
            edges: vec![edge("lb", "app")],
        };
        let out = engine.layout(&graph);
        assert!(out.children[0].y < out.children[1].y);
    }
}
