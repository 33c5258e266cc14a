//! Render-ready graph state consumed by the frontend.
//!
//! Field names are camelCase on the wire and must stay stable: the
//! frontend persists and diffs these snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{BranchId, GraphId, NodeId};
use crate::canonical::canonical_hash_hex;

/// Initial viewport of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Horizontal offset.
    pub x: f64,
    /// Vertical offset.
    pub y: f64,
    /// Zoom factor.
    pub scale: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            x: 150.0,
            y: 500.0,
            scale: 1.0,
        }
    }
}

/// A node positioned for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializableNode {
    /// Node id.
    pub id: NodeId,
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
    /// Whether this node is the head of its branch.
    pub is_head: bool,
}

/// A branch with its ordered node membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializableBranch {
    /// Branch id.
    pub id: BranchId,
    /// Display label.
    pub label: String,
    /// CSS color.
    pub color: String,
    /// Member nodes, ascending by sequence.
    pub node_ids: Vec<NodeId>,
    /// Fork point, `null` for the root branch.
    pub parent_node_id: Option<NodeId>,
}

/// Flattened snapshot of a graph.
///
/// Maps are keyed by the stringified id, matching the JSON object keys
/// the frontend indexes by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphState {
    /// Graph id.
    pub id: GraphId,
    /// Graph display name.
    pub name: String,
    /// Initial viewport.
    pub camera: Camera,
    /// Positioned nodes by id.
    pub nodes: BTreeMap<String, SerializableNode>,
    /// Branches by id.
    pub branches: BTreeMap<String, SerializableBranch>,
    /// Branch ids in iteration order.
    pub branch_order: Vec<BranchId>,
    /// One past the largest node id.
    pub next_node_id: i64,
    /// One past the largest branch id.
    pub next_branch_id: i64,
    /// Next palette slot for a new branch color.
    pub next_color_index: u32,
}

impl GraphState {
    /// Look up a node record by id.
    pub fn node(&self, id: NodeId) -> Option<&SerializableNode> {
        self.nodes.get(&id.to_string())
    }

    /// Look up a branch record by id.
    pub fn branch(&self, id: BranchId) -> Option<&SerializableBranch> {
        self.branches.get(&id.to_string())
    }

    /// The branch without a parent node, if any.
    pub fn root_branch(&self) -> Option<&SerializableBranch> {
        self.branches.values().find(|b| b.parent_node_id.is_none())
    }

    /// Branches that forked directly from `node`.
    pub fn branches_forked_from(&self, node: NodeId) -> Vec<&SerializableBranch> {
        self.branch_order
            .iter()
            .filter_map(|id| self.branch(*id))
            .filter(|b| b.parent_node_id == Some(node))
            .collect()
    }

    /// Head node of a branch, if the branch has any nodes.
    pub fn head_of(&self, branch: BranchId) -> Option<NodeId> {
        self.branch(branch)?
            .node_ids
            .iter()
            .copied()
            .find(|id| self.node(*id).is_some_and(|n| n.is_head))
    }

    /// Stable fingerprint of the snapshot (xxh64 of canonical JSON).
    pub fn fingerprint(&self) -> String {
        canonical_hash_hex(self)
    }
}
