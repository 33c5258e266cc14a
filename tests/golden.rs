//! Golden tests for the graph kernel.
//!
//! These tests drive the public facade end to end and pin down the exact
//! snapshots the frontend receives.

use std::sync::Arc;

use cactus_graph::store::InMemoryGraphStore;
use cactus_graph::{
    project, Branch, BranchId, Camera, Graph, GraphId, GraphKernel, GraphRecords, GraphState,
    GraphStore, GraphTree, Node, NodeId, BRANCH_COLOR, ROOT_BRANCH_LABEL,
};
use chrono::{TimeZone, Utc};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn kernel() -> GraphKernel<InMemoryGraphStore> {
    GraphKernel::new(Arc::new(InMemoryGraphStore::new()))
}

fn gid() -> GraphId {
    GraphId::new("golden")
}

fn record_node(id: i64, branch: i64, sequence: i64, content: &str) -> Node {
    Node {
        id: NodeId::new(id),
        branch_id: BranchId::new(branch),
        sequence,
        content: content.to_string(),
        author: "user".to_string(),
        created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, sequence as u32).unwrap(),
    }
}

fn record_branch(id: i64, label: &str, parent: Option<i64>) -> Branch {
    Branch {
        id: BranchId::new(id),
        graph_id: gid(),
        label: label.to_string(),
        parent_node: parent.map(NodeId::new),
    }
}

/// Root branch with two nodes and one fork from the first.
fn forked_records() -> GraphRecords {
    GraphRecords {
        graph: Graph::with_default_name(gid()),
        branches: vec![
            record_branch(1, ROOT_BRANCH_LABEL, None),
            record_branch(2, "Exploration", Some(1)),
        ],
        nodes: vec![
            record_node(1, 1, 1, "Hello root"),
            record_node(2, 1, 2, "Second"),
            record_node(3, 2, 1, "Fork here"),
        ],
    }
}

fn head_flags(state: &GraphState, branch: BranchId) -> Vec<bool> {
    state
        .branch(branch)
        .unwrap()
        .node_ids
        .iter()
        .map(|id| state.node(*id).unwrap().is_head)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// End-to-end scenario
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn golden_end_to_end_scenario() {
    let kernel = kernel();

    // Create root
    let state = kernel.create_root(&gid(), "Hello root", "user").await.unwrap();
    assert_eq!(state.branches.len(), 1);
    assert_eq!(state.nodes.len(), 1);
    let root = state.root_branch().unwrap().clone();
    assert_eq!(root.label, ROOT_BRANCH_LABEL);
    let first = root.node_ids[0];
    assert!(state.node(first).unwrap().is_head);

    // Extend
    let state = kernel.extend(first, "Second", "user").await.unwrap();
    assert_eq!(state.nodes.len(), 2);
    let members = state.branch(root.id).unwrap().node_ids.clone();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0], first);
    let second = members[1];
    assert_eq!(head_flags(&state, root.id), vec![false, true]);

    // Fork from the first node
    let state = kernel.fork(first, "Exploration", "Fork here", "user").await.unwrap();
    assert_eq!(state.branches.len(), 2);
    let forks = state.branches_forked_from(first);
    assert_eq!(forks.len(), 1);
    assert_eq!(forks[0].label, "Exploration");
    assert_eq!(forks[0].parent_node_id, Some(first));
    assert_eq!(forks[0].node_ids.len(), 1);

    // Delete children of the first node
    let before = state.branch(root.id).unwrap().clone();
    let state = kernel.delete_children(first).await.unwrap();
    assert_eq!(state.branches.len(), 1);
    assert_eq!(state.branch(root.id).unwrap(), &before);
    assert_eq!(state.nodes.len(), 2);

    // Delete extension before the second node
    let state = kernel.delete_extension(second).await.unwrap();
    assert_eq!(state.branch(root.id).unwrap().node_ids, vec![second]);
    assert!(state.node(first).is_none());
    assert!(state.node(second).unwrap().is_head);
}

// ─────────────────────────────────────────────────────────────────────────────
// Projection
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn golden_projection_of_fixed_records() {
    let tree = GraphTree::build(forked_records()).unwrap();
    let state = project(&tree);

    assert_eq!(state.id, gid());
    assert_eq!(state.name, "Project golden");
    assert_eq!(state.camera, Camera::default());
    assert_eq!(state.branch_order, vec![BranchId::new(1), BranchId::new(2)]);
    assert_eq!(state.next_node_id, 4);
    assert_eq!(state.next_branch_id, 3);
    assert_eq!(state.next_color_index, 1);

    // Branches by id, nodes by sequence: y = -40, -100, -160.
    let ys: Vec<f64> = [1, 2, 3]
        .iter()
        .map(|id| state.node(NodeId::new(*id)).unwrap().y)
        .collect();
    assert_eq!(ys, vec![-40.0, -100.0, -160.0]);
    assert!(state.nodes.values().all(|n| n.x == 0.0));
    assert!(state.branches.values().all(|b| b.color == BRANCH_COLOR));

    let exploration = state.branch(BranchId::new(2)).unwrap();
    assert_eq!(exploration.parent_node_id, Some(NodeId::new(1)));
    assert_eq!(head_flags(&state, BranchId::new(1)), vec![false, true]);
    assert_eq!(head_flags(&state, BranchId::new(2)), vec![true]);
}

#[test]
fn golden_snapshot_wire_shape() {
    let tree = GraphTree::build(forked_records()).unwrap();
    let json = serde_json::to_value(project(&tree)).unwrap();

    assert_eq!(json["id"], "golden");
    assert_eq!(json["camera"]["scale"], 1.0);
    assert_eq!(json["nodes"]["2"]["isHead"], true);
    assert_eq!(json["branches"]["2"]["parentNodeId"], 1);
    assert!(json["branches"]["1"]["parentNodeId"].is_null());
    assert_eq!(json["branches"]["1"]["nodeIds"], serde_json::json!([1, 2]));
    assert_eq!(json["nextNodeId"], 4);
    assert_eq!(json["nextBranchId"], 3);
    assert_eq!(json["nextColorIndex"], 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Determinism
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn golden_fingerprint_ignores_record_order() {
    let ordered = forked_records();
    let mut shuffled = forked_records();
    shuffled.branches.reverse();
    shuffled.nodes.reverse();

    let a = project(&GraphTree::build(ordered).unwrap());
    let b = project(&GraphTree::build(shuffled).unwrap());

    assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
    assert_eq!(a.fingerprint(), b.fingerprint());
}

#[tokio::test]
async fn golden_repeated_snapshots_are_identical() {
    let kernel = kernel();
    let state = kernel.create_root(&gid(), "Hello root", "user").await.unwrap();
    let first = state.root_branch().unwrap().node_ids[0];
    kernel.fork(first, "side", "b", "user").await.unwrap();

    let a = kernel.get_or_create_graph(&gid()).await.unwrap();
    let b = kernel.get_or_create_graph(&gid()).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.fingerprint(), b.fingerprint());
}

#[tokio::test]
async fn golden_fingerprint_changes_after_mutation() {
    let kernel = kernel();
    let before = kernel.create_root(&gid(), "Hello root", "user").await.unwrap();
    let first = before.root_branch().unwrap().node_ids[0];
    let after = kernel.extend(first, "Second", "user").await.unwrap();

    assert_ne!(before.fingerprint(), after.fingerprint());
}

// ─────────────────────────────────────────────────────────────────────────────
// Deletion cascades
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn golden_delete_node_cascades_through_forks() {
    let kernel = kernel();
    let state = kernel.create_root(&gid(), "a", "user").await.unwrap();
    let root = state.root_branch().unwrap().id;
    let first = state.branch(root).unwrap().node_ids[0];
    let state = kernel.extend(first, "b", "user").await.unwrap();
    let second = state.head_of(root).unwrap();

    // Fork from the second node, then fork again from the fork.
    let state = kernel.fork(second, "side", "c", "user").await.unwrap();
    let side = state.branches_forked_from(second)[0].clone();
    let state = kernel.fork(side.node_ids[0], "deeper", "d", "user").await.unwrap();
    assert_eq!(state.branches.len(), 3);

    let state = kernel.delete_node_and_descendants(second).await.unwrap();
    assert_eq!(state.branches.len(), 1);
    assert_eq!(state.branch(root).unwrap().node_ids, vec![first]);
    assert!(state.node(first).unwrap().is_head);

    let tree = kernel.engine().load_tree(&gid()).await.unwrap();
    assert_eq!(tree.num_nodes(), 1);
}

#[tokio::test]
async fn golden_delete_children_on_leaf_is_noop() {
    let kernel = kernel();
    let state = kernel.create_root(&gid(), "a", "user").await.unwrap();
    let first = state.root_branch().unwrap().node_ids[0];

    let after = kernel.delete_children(first).await.unwrap();
    assert_eq!(state, after);
}

#[tokio::test]
async fn golden_delete_graph_removes_everything() {
    let store = Arc::new(InMemoryGraphStore::new());
    let kernel = GraphKernel::new(Arc::clone(&store));
    let state = kernel.create_root(&gid(), "a", "user").await.unwrap();
    let first = state.root_branch().unwrap().node_ids[0];
    kernel.fork(first, "side", "b", "user").await.unwrap();

    kernel.delete_graph(&gid()).await.unwrap();

    assert_eq!(store.num_graphs(), 0);
    assert_eq!(store.num_branches(), 0);
    assert_eq!(store.num_nodes(), 0);
    assert!(store.load_graph(&gid()).await.unwrap().is_none());
    let err = kernel.extend(first, "c", "user").await.unwrap_err();
    assert_eq!(err.code(), "NODE_NOT_FOUND");
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn golden_concurrent_extends_all_succeed() {
    let kernel = Arc::new(kernel());
    let state = kernel.create_root(&gid(), "Hello root", "user").await.unwrap();
    let root = state.root_branch().unwrap().id;
    let first = state.branch(root).unwrap().node_ids[0];

    let tasks: Vec<_> = (0..400)
        .map(|i| {
            let kernel = Arc::clone(&kernel);
            tokio::spawn(async move { kernel.extend(first, &format!("turn {}", i), "user").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let tree = kernel.engine().load_tree(&gid()).await.unwrap();
    let sequences: Vec<i64> = tree
        .nodes_of(root)
        .unwrap()
        .iter()
        .map(|id| tree.node(*id).unwrap().sequence)
        .collect();
    assert_eq!(sequences, (1..=401).collect::<Vec<_>>());
    assert_eq!(tree.head(root).unwrap().unwrap().sequence, 401);
}

// ─────────────────────────────────────────────────────────────────────────────
// Context path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn golden_context_path_follows_fork_points() {
    let kernel = kernel();
    let state = kernel.create_root(&gid(), "a", "user").await.unwrap();
    let root = state.root_branch().unwrap().id;
    let first = state.branch(root).unwrap().node_ids[0];
    kernel.extend(first, "b", "user").await.unwrap();
    let state = kernel.fork(first, "side", "x", "user").await.unwrap();
    let side = state.branches_forked_from(first)[0].clone();
    let state = kernel.extend(side.node_ids[0], "y", "user").await.unwrap();
    let tip = state.head_of(side.id).unwrap();

    let path = kernel.context_path(tip).await.unwrap();
    let contents: Vec<&str> = path.iter().map(|n| n.content.as_str()).collect();
    assert_eq!(contents, vec!["a", "x", "y"]);
}
