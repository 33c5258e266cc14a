//! Graph storage backends.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tree::{GraphRecords, Removal};
use crate::types::{BranchId, Graph, GraphId, NewNode, NodeDraft, NodeId};

/// One structural mutation, applied atomically by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeSet {
    /// Insert the graph if absent, then a root branch with its first node.
    CreateRoot {
        /// Graph to upsert.
        graph: Graph,
        /// Root branch label.
        label: String,
        /// First node of the root branch.
        first_node: NewNode,
    },
    /// Append a node after the current head of an existing branch.
    ///
    /// The store picks `max(sequence) + 1` inside the same transaction.
    AppendNode {
        /// Target branch.
        branch: BranchId,
        /// Node payload.
        node: NodeDraft,
    },
    /// Create a branch forked from an existing node, with its first node.
    Fork {
        /// Fork point.
        parent_node: NodeId,
        /// Branch label.
        label: String,
        /// First node of the new branch.
        first_node: NewNode,
    },
    /// Delete a planned batch of nodes and branches.
    Remove(Removal),
}

impl ChangeSet {
    /// Short name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateRoot { .. } => "create_root",
            Self::AppendNode { .. } => "append_node",
            Self::Fork { .. } => "fork",
            Self::Remove(_) => "remove",
        }
    }
}

/// Outcome of [`GraphStore::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Applied {
    /// A node was inserted, possibly with a new branch.
    Inserted {
        /// Branch holding the new node.
        branch: BranchId,
        /// The new node.
        node: NodeId,
        /// Sequence the node was stored at.
        sequence: i64,
    },
    /// The planned ids were deleted.
    Removed {
        /// Number of nodes deleted.
        nodes: usize,
        /// Number of branches deleted.
        branches: usize,
    },
    /// Nothing changed (root already present).
    Unchanged,
}

/// Trait for graph storage backends.
///
/// Every `apply` is a single transaction: either the whole change set is
/// visible afterwards or none of it is. Stores assign branch and node ids.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync;

    /// Fetch a graph with all of its branches and nodes.
    async fn load_graph(&self, id: &GraphId) -> Result<Option<GraphRecords>, Self::Error>;

    /// Resolve which graph a node belongs to.
    async fn graph_id_for_node(&self, id: NodeId) -> Result<Option<GraphId>, Self::Error>;

    /// Insert a graph if no graph with that id exists. Returns true if inserted.
    async fn create_graph(&self, graph: &Graph) -> Result<bool, Self::Error>;

    /// Apply one change set to a graph atomically.
    ///
    /// A `Remove` naming an id that no longer exists fails as a whole.
    async fn apply(&self, graph: &GraphId, changes: ChangeSet) -> Result<Applied, Self::Error>;

    /// Delete a graph with all its branches and nodes. Returns false if absent.
    async fn delete_graph(&self, id: &GraphId) -> Result<bool, Self::Error>;

    /// Check that the backend is reachable.
    async fn is_healthy(&self) -> bool {
        true
    }
}

pub use memory::InMemoryGraphStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresGraphStore;
