//! Arena view of one graph's branches and nodes.
//!
//! The store hands back flat records; [`GraphTree::build`] indexes them by
//! id and validates the structural invariants:
//!
//! - at most one branch has no parent node (the root)
//! - sequences are unique within a branch
//! - every fork points at an existing node in a *different* branch
//! - fork chains terminate (no cycles between branches)
//!
//! Traversals walk the arena by id. Removal planning uses an explicit
//! worklist so that a whole cascade is computed up front and handed to the
//! store as a single batch.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{Branch, BranchId, Graph, GraphId, Node, NodeId, FIRST_SEQUENCE};

/// Flat records for one graph, as loaded from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphRecords {
    /// The graph itself.
    pub graph: Graph,
    /// All branches of the graph.
    pub branches: Vec<Branch>,
    /// All nodes of those branches.
    pub nodes: Vec<Node>,
}

impl GraphRecords {
    /// Records for a graph with no branches yet.
    pub fn empty(graph: Graph) -> Self {
        Self {
            graph,
            branches: Vec::new(),
            nodes: Vec::new(),
        }
    }
}

/// Structural error found while building or walking a tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// Node id not present in the graph.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),
    /// Branch id not present in the graph.
    #[error("Branch not found: {0}")]
    BranchNotFound(BranchId),
    /// A branch record belongs to another graph.
    #[error("Branch {branch} belongs to graph {owner}, not {expected}")]
    ForeignBranch {
        /// Offending branch.
        branch: BranchId,
        /// Graph the branch claims.
        owner: GraphId,
        /// Graph being built.
        expected: GraphId,
    },
    /// More than one branch without a parent node.
    #[error("Graph has multiple root branches: {first} and {second}")]
    MultipleRoots {
        /// Root seen first.
        first: BranchId,
        /// Root seen second.
        second: BranchId,
    },
    /// Two nodes share a sequence number in one branch.
    #[error("Duplicate sequence {sequence} in branch {branch}")]
    DuplicateSequence {
        /// Branch holding the duplicates.
        branch: BranchId,
        /// Repeated sequence.
        sequence: i64,
    },
    /// A branch forks from a node that does not exist.
    #[error("Branch {branch} forks from missing node {node}")]
    DanglingFork {
        /// Forked branch.
        branch: BranchId,
        /// Missing parent node.
        node: NodeId,
    },
    /// A branch forks from one of its own nodes.
    #[error("Branch {0} forks from its own node")]
    SelfFork(BranchId),
    /// Fork chain loops back on itself.
    #[error("Fork cycle through branch {0}")]
    Cycle(BranchId),
}

/// Ids scheduled for deletion by one mutation.
///
/// Ordering is post-order: every sub-branch's nodes appear before the node
/// it forked from, and a branch appears after all of its nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Removal {
    /// Nodes to delete.
    pub nodes: Vec<NodeId>,
    /// Branches to delete.
    pub branches: Vec<BranchId>,
}

impl Removal {
    /// True when nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.branches.is_empty()
    }

    /// Append another removal plan.
    pub fn absorb(&mut self, other: Removal) {
        self.nodes.extend(other.nodes);
        self.branches.extend(other.branches);
    }
}

enum Visit {
    Enter(NodeId),
    LeaveNode(NodeId),
    LeaveBranch(BranchId),
}

/// Indexed, validated forest of one graph.
#[derive(Debug, Clone)]
pub struct GraphTree {
    graph: Graph,
    branches: BTreeMap<BranchId, Branch>,
    nodes: BTreeMap<NodeId, Node>,
    /// Member nodes per branch, ascending by sequence.
    branch_nodes: BTreeMap<BranchId, Vec<NodeId>>,
    /// Branches forked from each node, ascending by id.
    sub_branches: BTreeMap<NodeId, Vec<BranchId>>,
}

impl GraphTree {
    /// Index and validate a graph's records.
    pub fn build(records: GraphRecords) -> Result<Self, TreeError> {
        let GraphRecords { graph, branches, nodes } = records;

        let mut branch_map = BTreeMap::new();
        let mut branch_nodes: BTreeMap<BranchId, Vec<NodeId>> = BTreeMap::new();
        let mut root: Option<BranchId> = None;

        for branch in branches {
            if branch.graph_id != graph.id {
                return Err(TreeError::ForeignBranch {
                    branch: branch.id,
                    owner: branch.graph_id,
                    expected: graph.id,
                });
            }
            if branch.is_root() {
                if let Some(first) = root {
                    return Err(TreeError::MultipleRoots { first, second: branch.id });
                }
                root = Some(branch.id);
            }
            branch_nodes.insert(branch.id, Vec::new());
            branch_map.insert(branch.id, branch);
        }

        let mut node_map = BTreeMap::new();
        for node in nodes {
            branch_nodes
                .get_mut(&node.branch_id)
                .ok_or(TreeError::BranchNotFound(node.branch_id))?
                .push(node.id);
            node_map.insert(node.id, node);
        }

        for (branch_id, members) in branch_nodes.iter_mut() {
            members.sort_by_key(|id| node_map.get(id).map(|n: &Node| n.sequence));
            for pair in members.windows(2) {
                let a = node_map.get(&pair[0]).map(|n| n.sequence);
                let b = node_map.get(&pair[1]).map(|n| n.sequence);
                if let (Some(sequence), true) = (a, a == b) {
                    return Err(TreeError::DuplicateSequence { branch: *branch_id, sequence });
                }
            }
        }

        let mut sub_branches: BTreeMap<NodeId, Vec<BranchId>> = BTreeMap::new();
        for branch in branch_map.values() {
            if let Some(parent) = branch.parent_node {
                let parent_node = node_map.get(&parent).ok_or(TreeError::DanglingFork {
                    branch: branch.id,
                    node: parent,
                })?;
                if parent_node.branch_id == branch.id {
                    return Err(TreeError::SelfFork(branch.id));
                }
                sub_branches.entry(parent).or_default().push(branch.id);
            }
        }

        let tree = Self {
            graph,
            branches: branch_map,
            nodes: node_map,
            branch_nodes,
            sub_branches,
        };
        tree.check_acyclic()?;
        Ok(tree)
    }

    /// Every fork chain must reach a root within `branches.len()` hops.
    fn check_acyclic(&self) -> Result<(), TreeError> {
        let limit = self.branches.len();
        for start in self.branches.values() {
            let mut current = start;
            let mut hops = 0;
            while let Some(parent) = current.parent_node {
                hops += 1;
                if hops > limit {
                    return Err(TreeError::Cycle(start.id));
                }
                let node = self.node(parent)?;
                current = self.branch(node.branch_id)?;
            }
        }
        Ok(())
    }

    /// The graph record.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The graph id.
    pub fn id(&self) -> &GraphId {
        &self.graph.id
    }

    /// Look up a branch.
    pub fn branch(&self, id: BranchId) -> Result<&Branch, TreeError> {
        self.branches.get(&id).ok_or(TreeError::BranchNotFound(id))
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(&id).ok_or(TreeError::NodeNotFound(id))
    }

    /// Whether the node belongs to this graph.
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Branches in stored order (ascending id).
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    /// Number of branches.
    pub fn num_branches(&self) -> usize {
        self.branches.len()
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The branch with no parent node.
    pub fn root_branch(&self) -> Option<&Branch> {
        self.branches.values().find(|b| b.is_root())
    }

    /// Member node ids of a branch, ascending by sequence.
    pub fn nodes_of(&self, branch: BranchId) -> Result<&[NodeId], TreeError> {
        self.branch_nodes
            .get(&branch)
            .map(Vec::as_slice)
            .ok_or(TreeError::BranchNotFound(branch))
    }

    /// Branches forked directly from a node.
    pub fn sub_branches_of(&self, node: NodeId) -> &[BranchId] {
        self.sub_branches.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Largest sequence in a branch, `None` when the branch is empty.
    pub fn max_sequence(&self, branch: BranchId) -> Result<Option<i64>, TreeError> {
        match self.nodes_of(branch)?.last() {
            Some(id) => Ok(Some(self.node(*id)?.sequence)),
            None => Ok(None),
        }
    }

    /// Sequence the next appended node receives.
    pub fn next_sequence(&self, branch: BranchId) -> Result<i64, TreeError> {
        Ok(self
            .max_sequence(branch)?
            .unwrap_or(FIRST_SEQUENCE - 1)
            + 1)
    }

    /// Head node of a branch.
    pub fn head(&self, branch: BranchId) -> Result<Option<&Node>, TreeError> {
        match self.nodes_of(branch)?.last() {
            Some(id) => Ok(Some(self.node(*id)?)),
            None => Ok(None),
        }
    }

    /// Largest node id, if any node exists.
    pub fn max_node_id(&self) -> Option<NodeId> {
        self.nodes.keys().next_back().copied()
    }

    /// Largest branch id, if any branch exists.
    pub fn max_branch_id(&self) -> Option<BranchId> {
        self.branches.keys().next_back().copied()
    }

    /// Plan deletion of a node and everything forked from it, transitively.
    pub fn plan_subtree_removal(&self, node: NodeId) -> Result<Removal, TreeError> {
        self.node(node)?;

        let mut removal = Removal::default();
        let mut seen = BTreeSet::new();
        let mut stack = vec![Visit::Enter(node)];

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(id) => {
                    if !seen.insert(id) {
                        continue;
                    }
                    self.node(id)?;
                    stack.push(Visit::LeaveNode(id));
                    for branch in self.sub_branches_of(id).iter().rev() {
                        stack.push(Visit::LeaveBranch(*branch));
                        for member in self.nodes_of(*branch)?.iter().rev() {
                            stack.push(Visit::Enter(*member));
                        }
                    }
                }
                Visit::LeaveNode(id) => removal.nodes.push(id),
                Visit::LeaveBranch(id) => removal.branches.push(id),
            }
        }

        Ok(removal)
    }

    /// Plan deletion of every node preceding `node` in its branch, with
    /// their sub-branch subtrees. `node` and later nodes are kept.
    pub fn plan_extension_removal(&self, node: NodeId) -> Result<Removal, TreeError> {
        let target = self.node(node)?;
        let mut removal = Removal::default();

        for member in self.nodes_of(target.branch_id)? {
            let candidate = self.node(*member)?;
            if candidate.id != target.id && candidate.sequence < target.sequence {
                removal.absorb(self.plan_subtree_removal(candidate.id)?);
            }
        }

        Ok(removal)
    }

    /// Plan deletion of every branch forked directly from `node`, with
    /// their contents. `node` and its own branch are kept.
    pub fn plan_children_removal(&self, node: NodeId) -> Result<Removal, TreeError> {
        self.node(node)?;
        let mut removal = Removal::default();

        for branch in self.sub_branches_of(node) {
            for member in self.nodes_of(*branch)? {
                removal.absorb(self.plan_subtree_removal(*member)?);
            }
            removal.branches.push(*branch);
        }

        Ok(removal)
    }

    /// Conversation history leading to `node`, oldest first.
    ///
    /// Walks up the fork chain: the nodes of each branch up to and including
    /// the fork point, then the branch's own nodes up to `node`.
    pub fn context_path(&self, node: NodeId) -> Result<Vec<&Node>, TreeError> {
        let mut segments: Vec<Vec<&Node>> = Vec::new();
        let mut cursor = Some(node);

        while let Some(id) = cursor {
            let tip = self.node(id)?;
            let branch = self.branch(tip.branch_id)?;
            let mut segment = Vec::new();
            for member in self.nodes_of(branch.id)? {
                let n = self.node(*member)?;
                if n.sequence > tip.sequence {
                    break;
                }
                segment.push(n);
            }
            segments.push(segment);
            cursor = branch.parent_node;
        }

        Ok(segments.into_iter().rev().flatten().collect())
    }
}
