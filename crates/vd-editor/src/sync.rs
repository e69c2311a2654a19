//! Manual-edit sync: visual surface → GraphState.
//!
//! When the user deletes, rewires, or drags shapes on the canvas, the
//! surface reports what currently exists and the sync folds the difference
//! back into the graph:
//!
//! - **Deletions**: a non-frame node or an edge with no live counterpart is
//!   removed (nodes cascade like `delete_node`). Frames are only ever
//!   removed through the action pipeline.
//! - **Rewiring**: a live connector bound at both ends to nodes other than
//!   its recorded endpoints takes the new endpoints.
//! - **Reparenting**: a node whose live frame parent differs from its
//!   `parent_id` takes the live parent; no other field changes.
//!
//! Geometry never flows back. Positions are always re-derived by layout.

use serde_json::Value;
use std::collections::HashMap;
use vd_core::model::{Cleanup, GraphState, NodeType};
use vd_core::snapshot::{self, Records, Terminal};
use vd_core::{EdgeId, NodeId};

// ─── Live surface enumeration ────────────────────────────────────────────

/// A graph-node shape currently on the surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceShape {
    pub id: NodeId,
    pub kind: Option<NodeType>,
    /// The enclosing shape, if the shape is not directly on a page.
    pub parent_id: Option<NodeId>,
}

/// A connector currently on the surface, with whatever ends are bound.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceConnector {
    pub id: EdgeId,
    pub start: Option<NodeId>,
    pub end: Option<NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceEnumeration {
    pub shapes: Vec<SurfaceShape>,
    pub connectors: Vec<SurfaceConnector>,
}

impl SurfaceEnumeration {
    /// Enumerate the live surface from a visual snapshot.
    pub fn from_snapshot(value: &Value) -> Self {
        let records = Records::parse(value);
        let parent_of = |raw: Option<&str>| {
            raw.filter(|p| p.starts_with(snapshot::SHAPE_PREFIX))
                .map(|p| NodeId::intern(snapshot::strip_shape_prefix(p)))
        };
        let endpoint = |arrow: &snapshot::ShapeRecord, terminal: Terminal| {
            records
                .endpoint(arrow, terminal)
                .map(|raw| NodeId::intern(snapshot::strip_shape_prefix(raw)))
        };

        let mut surface = SurfaceEnumeration::default();
        for shape in &records.shapes {
            let id = snapshot::strip_shape_prefix(&shape.id);
            if snapshot::is_connector(shape) {
                surface.connectors.push(SurfaceConnector {
                    id: EdgeId::intern(id),
                    start: endpoint(shape, Terminal::Start),
                    end: endpoint(shape, Terminal::End),
                });
            } else if let Some(kind) = snapshot::shape_node_type(shape) {
                surface.shapes.push(SurfaceShape {
                    id: NodeId::intern(id),
                    kind: Some(kind),
                    parent_id: parent_of(shape.parent_id.as_deref()),
                });
            }
        }
        surface
    }

    pub fn with_shape(mut self, id: &str, parent: Option<&str>) -> Self {
        self.shapes.push(SurfaceShape {
            id: NodeId::intern(id),
            kind: None,
            parent_id: parent.map(NodeId::intern),
        });
        self
    }

    pub fn with_connector(mut self, id: &str, start: Option<&str>, end: Option<&str>) -> Self {
        self.connectors.push(SurfaceConnector {
            id: EdgeId::intern(id),
            start: start.map(NodeId::intern),
            end: end.map(NodeId::intern),
        });
        self
    }
}

// ─── Sync ────────────────────────────────────────────────────────────────

/// What one manual-edit sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub deleted_nodes: Vec<NodeId>,
    pub deleted_edges: Vec<EdgeId>,
    pub rewired_edges: Vec<EdgeId>,
    pub reparented: Vec<NodeId>,
    pub cleanup: Cleanup,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.deleted_nodes.is_empty()
            && self.deleted_edges.is_empty()
            && self.rewired_edges.is_empty()
            && self.reparented.is_empty()
    }
}

/// Fold the live surface back into `state`.
pub fn apply_manual_edits(state: &mut GraphState, surface: &SurfaceEnumeration) -> SyncReport {
    let mut report = SyncReport::default();
    let live_shapes: HashMap<NodeId, &SurfaceShape> =
        surface.shapes.iter().map(|s| (s.id, s)).collect();
    let live_connectors: HashMap<EdgeId, &SurfaceConnector> =
        surface.connectors.iter().map(|c| (c.id, c)).collect();

    // Deletions, in id order so the report is stable.
    for id in state.sorted_node_ids() {
        if live_shapes.contains_key(&id) || !state.contains_node(id) || state.is_frame(id) {
            continue;
        }
        let removal = state.remove_node_cascade(id);
        log::debug!("manual delete of {id} removed {} edge(s)", removal.edges.len());
        report.deleted_nodes.extend(removal.nodes);
        report.deleted_edges.extend(removal.edges);
    }
    for id in state.sorted_edge_ids() {
        if !live_connectors.contains_key(&id) && state.remove_edge(id).is_some() {
            log::debug!("manual delete of edge {id}");
            report.deleted_edges.push(id);
        }
    }

    for id in state.sorted_edge_ids() {
        let Some(connector) = live_connectors.get(&id) else { continue };
        let (Some(start), Some(end)) = (connector.start, connector.end) else {
            continue;
        };
        let connectable = |n: NodeId| state.contains_node(n) && !state.is_frame(n);
        if !(connectable(start) && connectable(end)) {
            continue;
        }
        if let Some(edge) = state.edges.get_mut(&id)
            && (edge.source_id, edge.target_id) != (start, end)
        {
            log::debug!("manual rewire of {id} to {start} -> {end}");
            edge.source_id = start;
            edge.target_id = end;
            report.rewired_edges.push(id);
        }
    }

    for id in state.sorted_node_ids() {
        let Some(shape) = live_shapes.get(&id) else { continue };
        let live_parent = shape.parent_id.filter(|p| state.is_frame(*p));
        let Some(current) = state.node(id).map(|n| n.parent_id) else {
            continue;
        };
        if live_parent == current {
            continue;
        }
        if let Some(parent) = live_parent
            && state.would_create_cycle(id, parent)
        {
            log::warn!("ignoring manual reparent of {id} into {parent}: containment cycle");
            continue;
        }
        if let Some(node) = state.node_mut(id) {
            node.parent_id = live_parent;
            report.reparented.push(id);
        }
    }

    report.cleanup = state.cleanup();
    if !report.is_empty() {
        log::info!(
            "manual edits: {} node(s) deleted, {} edge(s) deleted, {} rewired, {} reparented",
            report.deleted_nodes.len(),
            report.deleted_edges.len(),
            report.rewired_edges.len(),
            report.reparented.len()
        );
    }
    report
}
