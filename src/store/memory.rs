//! In-memory graph store for tests and single-process deployments.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Applied, ChangeSet, GraphStore};
use crate::tree::{GraphRecords, Removal};
use crate::types::{Branch, BranchId, Graph, GraphId, NewNode, Node, NodeId, FIRST_SEQUENCE};

/// Error type for in-memory store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InMemoryError {
    /// Graph not found.
    #[error("Graph not found: {0}")]
    GraphNotFound(GraphId),
    /// Branch not found in the target graph.
    #[error("Branch not found: {0}")]
    BranchNotFound(BranchId),
    /// Node not found in the target graph.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),
    /// Sequence already taken in the branch.
    #[error("Sequence {sequence} already used in branch {branch}")]
    DuplicateSequence {
        /// Target branch.
        branch: BranchId,
        /// Conflicting sequence.
        sequence: i64,
    },
    /// Removal would leave a branch forking from a deleted node.
    #[error("Branch {branch} would be orphaned by deleting node {node}")]
    OrphanedBranch {
        /// Surviving branch.
        branch: BranchId,
        /// Deleted fork point.
        node: NodeId,
    },
    /// Removal would leave a node in a deleted branch.
    #[error("Node {node} would be orphaned by deleting branch {branch}")]
    OrphanedNode {
        /// Surviving node.
        node: NodeId,
        /// Deleted branch.
        branch: BranchId,
    },
}

#[derive(Debug, Default)]
struct Inner {
    graphs: BTreeMap<GraphId, Graph>,
    branches: BTreeMap<BranchId, Branch>,
    nodes: BTreeMap<NodeId, Node>,
    last_branch_id: i64,
    last_node_id: i64,
}

impl Inner {
    fn alloc_branch(&mut self) -> BranchId {
        self.last_branch_id += 1;
        BranchId::new(self.last_branch_id)
    }

    fn alloc_node(&mut self) -> NodeId {
        self.last_node_id += 1;
        NodeId::new(self.last_node_id)
    }

    fn require_graph(&self, id: &GraphId) -> Result<(), InMemoryError> {
        if self.graphs.contains_key(id) {
            Ok(())
        } else {
            Err(InMemoryError::GraphNotFound(id.clone()))
        }
    }

    fn branch_in(&self, graph: &GraphId, id: BranchId) -> Result<&Branch, InMemoryError> {
        self.branches
            .get(&id)
            .filter(|b| &b.graph_id == graph)
            .ok_or(InMemoryError::BranchNotFound(id))
    }

    fn node_in(&self, graph: &GraphId, id: NodeId) -> Result<&Node, InMemoryError> {
        let node = self.nodes.get(&id).ok_or(InMemoryError::NodeNotFound(id))?;
        self.branch_in(graph, node.branch_id)
            .map_err(|_| InMemoryError::NodeNotFound(id))?;
        Ok(node)
    }

    /// One past the branch's largest sequence, read under the write lock.
    fn next_sequence(&self, branch: BranchId) -> i64 {
        self.nodes
            .values()
            .filter(|n| n.branch_id == branch)
            .map(|n| n.sequence)
            .max()
            .unwrap_or(FIRST_SEQUENCE - 1)
            + 1
    }

    fn insert_node(&mut self, branch: BranchId, new_node: NewNode) -> Result<NodeId, InMemoryError> {
        let taken = self
            .nodes
            .values()
            .any(|n| n.branch_id == branch && n.sequence == new_node.sequence);
        if taken {
            return Err(InMemoryError::DuplicateSequence {
                branch,
                sequence: new_node.sequence,
            });
        }
        let id = self.alloc_node();
        self.nodes.insert(id, new_node.into_node(id, branch));
        Ok(id)
    }

    /// Checks the whole batch before touching anything.
    fn remove(&mut self, graph: &GraphId, removal: Removal) -> Result<Applied, InMemoryError> {
        let node_set: BTreeSet<NodeId> = removal.nodes.iter().copied().collect();
        let branch_set: BTreeSet<BranchId> = removal.branches.iter().copied().collect();

        for id in &node_set {
            self.node_in(graph, *id)?;
        }
        for id in &branch_set {
            self.branch_in(graph, *id)?;
        }
        for branch in self.branches.values() {
            if branch_set.contains(&branch.id) {
                continue;
            }
            if let Some(parent) = branch.parent_node.filter(|p| node_set.contains(p)) {
                return Err(InMemoryError::OrphanedBranch { branch: branch.id, node: parent });
            }
        }
        for node in self.nodes.values() {
            if !node_set.contains(&node.id) && branch_set.contains(&node.branch_id) {
                return Err(InMemoryError::OrphanedNode { node: node.id, branch: node.branch_id });
            }
        }

        for id in &node_set {
            self.nodes.remove(id);
        }
        for id in &branch_set {
            self.branches.remove(id);
        }

        Ok(Applied::Removed {
            nodes: node_set.len(),
            branches: branch_set.len(),
        })
    }
}

/// In-memory graph store.
///
/// A single `RwLock` guards all tables, so each `apply` observes and
/// produces a consistent state. Ids are allocated from monotonically
/// increasing counters and never reused.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    inner: RwLock<Inner>,
}

impl InMemoryGraphStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load prebuilt records, bypassing structural checks.
    ///
    /// Id counters advance past the largest inserted id.
    pub fn insert_records(&self, records: GraphRecords) {
        let mut inner = self.inner.write();
        for branch in records.branches {
            inner.last_branch_id = inner.last_branch_id.max(branch.id.get());
            inner.branches.insert(branch.id, branch);
        }
        for node in records.nodes {
            inner.last_node_id = inner.last_node_id.max(node.id.get());
            inner.nodes.insert(node.id, node);
        }
        inner.graphs.insert(records.graph.id.clone(), records.graph);
    }

    /// Number of graphs.
    pub fn num_graphs(&self) -> usize {
        self.inner.read().graphs.len()
    }

    /// Number of branches across all graphs.
    pub fn num_branches(&self) -> usize {
        self.inner.read().branches.len()
    }

    /// Number of nodes across all graphs.
    pub fn num_nodes(&self) -> usize {
        self.inner.read().nodes.len()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    type Error = InMemoryError;

    async fn load_graph(&self, id: &GraphId) -> Result<Option<GraphRecords>, Self::Error> {
        let inner = self.inner.read();
        let Some(graph) = inner.graphs.get(id) else {
            return Ok(None);
        };

        let branches: Vec<Branch> = inner
            .branches
            .values()
            .filter(|b| &b.graph_id == id)
            .cloned()
            .collect();
        let branch_ids: BTreeSet<BranchId> = branches.iter().map(|b| b.id).collect();
        let nodes = inner
            .nodes
            .values()
            .filter(|n| branch_ids.contains(&n.branch_id))
            .cloned()
            .collect();

        Ok(Some(GraphRecords {
            graph: graph.clone(),
            branches,
            nodes,
        }))
    }

    async fn graph_id_for_node(&self, id: NodeId) -> Result<Option<GraphId>, Self::Error> {
        let inner = self.inner.read();
        Ok(inner
            .nodes
            .get(&id)
            .and_then(|n| inner.branches.get(&n.branch_id))
            .map(|b| b.graph_id.clone()))
    }

    async fn create_graph(&self, graph: &Graph) -> Result<bool, Self::Error> {
        let mut inner = self.inner.write();
        if inner.graphs.contains_key(&graph.id) {
            return Ok(false);
        }
        inner.graphs.insert(graph.id.clone(), graph.clone());
        Ok(true)
    }

    async fn apply(&self, graph: &GraphId, changes: ChangeSet) -> Result<Applied, Self::Error> {
        let mut inner = self.inner.write();

        match changes {
            ChangeSet::CreateRoot { graph: record, label, first_node } => {
                if &record.id != graph {
                    return Err(InMemoryError::GraphNotFound(graph.clone()));
                }
                inner.graphs.entry(record.id.clone()).or_insert(record);
                let has_root = inner
                    .branches
                    .values()
                    .any(|b| &b.graph_id == graph && b.is_root());
                if has_root {
                    return Ok(Applied::Unchanged);
                }
                let branch = inner.alloc_branch();
                inner.branches.insert(
                    branch,
                    Branch {
                        id: branch,
                        graph_id: graph.clone(),
                        label,
                        parent_node: None,
                    },
                );
                let sequence = first_node.sequence;
                let node = inner.insert_node(branch, first_node)?;
                Ok(Applied::Inserted { branch, node, sequence })
            }
            ChangeSet::AppendNode { branch, node } => {
                inner.require_graph(graph)?;
                inner.branch_in(graph, branch)?;
                let sequence = inner.next_sequence(branch);
                let node = inner.insert_node(branch, node.at(sequence))?;
                Ok(Applied::Inserted { branch, node, sequence })
            }
            ChangeSet::Fork { parent_node, label, first_node } => {
                inner.require_graph(graph)?;
                inner.node_in(graph, parent_node)?;
                let branch = inner.alloc_branch();
                inner.branches.insert(
                    branch,
                    Branch {
                        id: branch,
                        graph_id: graph.clone(),
                        label,
                        parent_node: Some(parent_node),
                    },
                );
                let sequence = first_node.sequence;
                let node = inner.insert_node(branch, first_node)?;
                Ok(Applied::Inserted { branch, node, sequence })
            }
            ChangeSet::Remove(removal) => {
                inner.require_graph(graph)?;
                inner.remove(graph, removal)
            }
        }
    }

    async fn delete_graph(&self, id: &GraphId) -> Result<bool, Self::Error> {
        let mut inner = self.inner.write();
        if inner.graphs.remove(id).is_none() {
            return Ok(false);
        }
        let doomed: BTreeSet<BranchId> = inner
            .branches
            .values()
            .filter(|b| &b.graph_id == id)
            .map(|b| b.id)
            .collect();
        inner.branches.retain(|bid, _| !doomed.contains(bid));
        inner.nodes.retain(|_, n| !doomed.contains(&n.branch_id));
        Ok(true)
    }
}
