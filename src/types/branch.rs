//! Branch types: linear runs of nodes that may fork off another branch.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::graph::GraphId;
use super::node::NodeId;

/// Label given to the root branch of every graph.
pub const ROOT_BRANCH_LABEL: &str = "Main Chat";

/// Store-assigned identifier of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(i64);

impl BranchId {
    /// Wrap a raw id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for BranchId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A branch record as persisted.
///
/// `parent_node` is `None` only for the graph's root branch. Forked
/// branches point at a node in a different branch of the same graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Unique identifier.
    pub id: BranchId,
    /// Owning graph.
    pub graph_id: GraphId,
    /// Display label.
    pub label: String,
    /// Node this branch forked from.
    pub parent_node: Option<NodeId>,
}

impl Branch {
    /// Whether this is the graph's root branch.
    pub fn is_root(&self) -> bool {
        self.parent_node.is_none()
    }
}
