//! Integration tests: snapshot reconcile + manual-edit sync (vd-editor ↔ vd-core).
//!
//! Loads a whiteboard snapshot, edits the raw records the way the canvas
//! would, and checks the graph follows.

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use vd_core::{EdgeId, GraphState, NodeId, extract};
use vd_editor::sync::{SurfaceEnumeration, apply_manual_edits};

fn whiteboard() -> Value {
    serde_json::from_str(include_str!("fixtures/whiteboard.json")).unwrap()
}

fn store(value: &mut Value) -> &mut serde_json::Map<String, Value> {
    value["document"]["store"].as_object_mut().unwrap()
}

fn id(s: &str) -> NodeId {
    NodeId::intern(s)
}

fn loaded() -> (Value, GraphState) {
    let value = whiteboard();
    let state = extract(&value);
    (value, state)
}

// ─── Snapshot → graph ───────────────────────────────────────────────────

#[test]
fn whiteboard_reconciles_into_graph() {
    let (_, state) = loaded();
    assert_eq!(
        state
            .sorted_node_ids()
            .iter()
            .map(|n| n.as_str())
            .collect::<Vec<_>>(),
        vec!["cdn", "cluster", "edge_zone", "note", "queue", "worker"]
    );
    assert_eq!(state.node(id("worker")).unwrap().parent_id, Some(id("cluster")));
    assert_eq!(state.node(id("cdn")).unwrap().parent_id, Some(id("edge_zone")));
    assert_eq!(
        state.node(id("note")).unwrap().label,
        "Scale workers on queue depth"
    );
    assert!(state.edge(EdgeId::intern("cdn_to_w")).unwrap().bidirectional);
    assert!(!state.edge(EdgeId::intern("q_to_w")).unwrap().bidirectional);
}

// ─── Manual edits ───────────────────────────────────────────────────────

#[test]
fn moving_shapes_changes_nothing() {
    let (mut value, mut state) = loaded();
    let before = state.clone();
    store(&mut value)["shape:worker"]["x"] = json!(900);
    store(&mut value)["shape:note"]["y"] = json!(-40);

    let report = apply_manual_edits(&mut state, &SurfaceEnumeration::from_snapshot(&value));
    assert!(report.is_empty());
    assert_eq!(state, before);
}

#[test]
fn deleting_a_shape_cascades_to_its_connectors() {
    let (mut value, mut state) = loaded();
    let records = store(&mut value);
    records.remove("shape:worker");
    records.remove("binding:b");
    records.remove("binding:d");

    let report = apply_manual_edits(&mut state, &SurfaceEnumeration::from_snapshot(&value));
    assert_eq!(report.deleted_nodes, vec![id("worker")]);
    let mut deleted = report.deleted_edges.clone();
    deleted.sort();
    assert_eq!(
        deleted,
        vec![EdgeId::intern("cdn_to_w"), EdgeId::intern("q_to_w")]
    );
    assert!(state.edges.is_empty());
    assert_eq!(state.nodes.len(), 5);
}

#[test]
fn deleting_a_connector_keeps_its_nodes() {
    let (mut value, mut state) = loaded();
    store(&mut value).remove("shape:q_to_w");

    let report = apply_manual_edits(&mut state, &SurfaceEnumeration::from_snapshot(&value));
    assert_eq!(report.deleted_edges, vec![EdgeId::intern("q_to_w")]);
    assert!(state.contains_node(id("queue")));
    assert_eq!(state.edges.len(), 1);
}

#[test]
fn dragging_into_another_frame_reparents() {
    let (mut value, mut state) = loaded();
    store(&mut value)["shape:cdn"]["parentId"] = json!("shape:cluster");

    let report = apply_manual_edits(&mut state, &SurfaceEnumeration::from_snapshot(&value));
    assert_eq!(report.reparented, vec![id("cdn")]);
    let cdn = state.node(id("cdn")).unwrap();
    assert_eq!(cdn.parent_id, Some(id("cluster")));
    assert_eq!(cdn.label, "CDN");
}

#[test]
fn deleted_frame_survives_but_releases_children() {
    let (mut value, mut state) = loaded();
    let records = store(&mut value);
    records.remove("shape:cluster");
    records["shape:worker"]["parentId"] = json!("page:main");
    records["shape:queue"]["parentId"] = json!("page:main");

    let report = apply_manual_edits(&mut state, &SurfaceEnumeration::from_snapshot(&value));
    assert!(report.deleted_nodes.is_empty());
    assert!(state.contains_node(id("cluster")));
    assert_eq!(report.reparented, vec![id("queue"), id("worker")]);
    assert_eq!(state.node(id("worker")).unwrap().parent_id, None);
}

#[test]
fn rebinding_an_arrow_rewires_the_edge() {
    let (mut value, mut state) = loaded();
    store(&mut value)["binding:c"]["toId"] = json!("shape:queue");

    let report = apply_manual_edits(&mut state, &SurfaceEnumeration::from_snapshot(&value));
    assert_eq!(report.rewired_edges, vec![EdgeId::intern("cdn_to_w")]);
    let edge = state.edge(EdgeId::intern("cdn_to_w")).unwrap();
    assert_eq!((edge.source_id, edge.target_id), (id("queue"), id("worker")));
    assert!(edge.bidirectional);
}
