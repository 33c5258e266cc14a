//! State projector: derives the render-ready [`GraphState`] from a tree.
//!
//! Layout here is a placeholder. Every node sits at `x = 0` and nodes are
//! stacked upwards in visiting order (branches by id, nodes by sequence).
//! A real layout engine can replace [`Layout`] without touching mutations.

use std::collections::BTreeMap;

use crate::tree::GraphTree;
use crate::types::{Camera, GraphState, SerializableBranch, SerializableNode};

/// Color given to every branch until per-branch palettes exist.
pub const BRANCH_COLOR: &str = "#f59e0b";

/// Palette cursor reported to the frontend.
pub const NEXT_COLOR_INDEX: u32 = 1;

/// Deterministic vertical stacking parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    /// `y` of the first visited node.
    pub y_origin: f64,
    /// Distance between consecutive nodes (subtracted from `y`).
    pub y_step: f64,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            y_origin: -40.0,
            y_step: 60.0,
        }
    }
}

impl Layout {
    /// `y` of the `index`-th visited node.
    pub fn y_at(&self, index: usize) -> f64 {
        self.y_origin - self.y_step * index as f64
    }
}

/// Project a tree with the default layout.
pub fn project(tree: &GraphTree) -> GraphState {
    project_with(tree, &Layout::default())
}

/// Project a tree with an explicit layout.
pub fn project_with(tree: &GraphTree, layout: &Layout) -> GraphState {
    let mut nodes = BTreeMap::new();
    let mut branches = BTreeMap::new();
    let mut branch_order = Vec::with_capacity(tree.num_branches());
    let mut visited = 0usize;

    for branch in tree.branches() {
        // The arena is validated on build, so membership lookups cannot miss.
        let members = tree.nodes_of(branch.id).unwrap_or(&[]);
        let head = members.last().copied();

        for id in members {
            nodes.insert(
                id.to_string(),
                SerializableNode {
                    id: *id,
                    x: 0.0,
                    y: layout.y_at(visited),
                    is_head: Some(*id) == head,
                },
            );
            visited += 1;
        }

        branches.insert(
            branch.id.to_string(),
            SerializableBranch {
                id: branch.id,
                label: branch.label.clone(),
                color: BRANCH_COLOR.to_string(),
                node_ids: members.to_vec(),
                parent_node_id: branch.parent_node,
            },
        );
        branch_order.push(branch.id);
    }

    let graph = tree.graph();
    GraphState {
        id: graph.id.clone(),
        name: graph.name.clone(),
        camera: Camera::default(),
        nodes,
        branches,
        branch_order,
        next_node_id: tree.max_node_id().map_or(1, |id| id.get() + 1),
        next_branch_id: tree.max_branch_id().map_or(1, |id| id.get() + 1),
        next_color_index: NEXT_COLOR_INDEX,
    }
}
