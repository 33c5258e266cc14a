//! Tree mutation engine.
//!
//! The engine is the only component that changes entity relationships.
//! Each operation follows the same shape:
//!
//! 1. Resolve the graph owning the target and load it as a [`GraphTree`]
//! 2. Validate and plan the change against the arena (no store writes)
//! 3. Hand one [`ChangeSet`] to the store, which applies it in a single
//!    transaction
//!
//! Planning fails fast on the first missing entity, so an aborted cascade
//! never reaches the store and nothing is partially deleted.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::store::{Applied, ChangeSet, GraphStore};
use crate::tree::{GraphTree, Removal, TreeError};
use crate::types::{
    BranchId, Graph, GraphId, NewNode, Node, NodeDraft, NodeId, FIRST_SEQUENCE, ROOT_BRANCH_LABEL,
};

/// Identifies the entity a lookup failed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// A graph.
    Graph(GraphId),
    /// A branch.
    Branch(BranchId),
    /// A node.
    Node(NodeId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph(id) => write!(f, "graph {}", id),
            Self::Branch(id) => write!(f, "branch {}", id),
            Self::Node(id) => write!(f, "node {}", id),
        }
    }
}

/// Error type for engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(Entity),
    /// Structural constraint violated. Not raised by the current operations.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// The store failed, or returned data that violates tree invariants.
    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl EngineError {
    /// Create a storage failure from any store error.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::StorageFailure(e.to_string())
    }

    fn from_tree(graph: &GraphId, e: TreeError) -> Self {
        match e {
            TreeError::NodeNotFound(id) => Self::NotFound(Entity::Node(id)),
            TreeError::BranchNotFound(id) => Self::NotFound(Entity::Branch(id)),
            other => Self::corrupt(graph, other),
        }
    }

    /// Stored records that cannot form a valid tree.
    fn corrupt(graph: &GraphId, e: TreeError) -> Self {
        Self::StorageFailure(format!("inconsistent graph {}: {}", graph, e))
    }
}

/// Result of a get-or-create lookup.
#[derive(Debug, Clone)]
pub enum GraphLookup {
    /// The graph already existed.
    Found(GraphTree),
    /// The graph was created by this call.
    Created(GraphTree),
}

impl GraphLookup {
    /// Whether the lookup created the graph.
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// The loaded tree.
    pub fn into_tree(self) -> GraphTree {
        match self {
            Self::Found(tree) | Self::Created(tree) => tree,
        }
    }
}

/// Structural mutation engine over a [`GraphStore`].
pub struct TreeEngine<S: GraphStore> {
    store: Arc<S>,
}

impl<S: GraphStore + 'static> TreeEngine<S> {
    /// Create an engine over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load a graph, `None` if it does not exist.
    pub async fn lookup_graph(&self, id: &GraphId) -> Result<Option<GraphTree>, EngineError> {
        let records = self
            .store
            .load_graph(id)
            .await
            .map_err(EngineError::from_store)?;
        records
            .map(|r| GraphTree::build(r).map_err(|e| EngineError::corrupt(id, e)))
            .transpose()
    }

    /// Load a graph, failing with NotFound if it does not exist.
    pub async fn load_tree(&self, id: &GraphId) -> Result<GraphTree, EngineError> {
        self.lookup_graph(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(Entity::Graph(id.clone())))
    }

    /// Look up a graph and create it (with no branches) if absent.
    pub async fn get_or_create_graph(&self, id: &GraphId) -> Result<GraphLookup, EngineError> {
        if let Some(tree) = self.lookup_graph(id).await? {
            return Ok(GraphLookup::Found(tree));
        }

        let graph = Graph::with_default_name(id.clone());
        let inserted = self
            .store
            .create_graph(&graph)
            .await
            .map_err(EngineError::from_store)?;
        if inserted {
            info!(graph_id = %id, "Graph created");
            Ok(GraphLookup::Created(self.load_tree(id).await?))
        } else {
            // Lost a race with another creator; theirs is the graph now.
            debug!(graph_id = %id, "Graph appeared concurrently");
            Ok(GraphLookup::Found(self.load_tree(id).await?))
        }
    }

    /// Load the graph that owns `node`.
    async fn tree_for_node(&self, node: NodeId) -> Result<GraphTree, EngineError> {
        let graph_id = self
            .store
            .graph_id_for_node(node)
            .await
            .map_err(EngineError::from_store)?
            .ok_or_else(|| {
                warn!(node_id = %node, "Node not found");
                EngineError::NotFound(Entity::Node(node))
            })?;

        let tree = self.load_tree(&graph_id).await?;
        if !tree.contains_node(node) {
            return Err(EngineError::NotFound(Entity::Node(node)));
        }
        Ok(tree)
    }

    async fn commit(&self, graph: &GraphId, changes: ChangeSet) -> Result<Applied, EngineError> {
        let kind = changes.kind();
        let applied = self
            .store
            .apply(graph, changes)
            .await
            .map_err(EngineError::from_store)?;
        debug!(graph_id = %graph, kind, ?applied, "Change set applied");
        Ok(applied)
    }

    async fn commit_removal(
        &self,
        tree: &GraphTree,
        removal: Removal,
        operation: &'static str,
    ) -> Result<GraphId, EngineError> {
        let graph_id = tree.id().clone();
        if removal.is_empty() {
            debug!(graph_id = %graph_id, operation, "Nothing to remove");
            return Ok(graph_id);
        }

        let (nodes, branches) = (removal.nodes.len(), removal.branches.len());
        self.commit(&graph_id, ChangeSet::Remove(removal)).await?;
        info!(graph_id = %graph_id, operation, nodes, branches, "Removed subtree");
        Ok(graph_id)
    }

    /// Create the root branch and its first node, creating the graph if needed.
    ///
    /// A no-op when the graph already has a root branch.
    pub async fn create_root(
        &self,
        graph_id: &GraphId,
        content: &str,
        author: &str,
    ) -> Result<GraphId, EngineError> {
        if let Some(tree) = self.lookup_graph(graph_id).await? {
            if let Some(root) = tree.root_branch() {
                warn!(graph_id = %graph_id, branch_id = %root.id, "Root already exists, create_root is a no-op");
                return Ok(graph_id.clone());
            }
        }

        let graph = Graph::with_default_name(graph_id.clone());
        let changes = ChangeSet::CreateRoot {
            graph,
            label: ROOT_BRANCH_LABEL.to_string(),
            first_node: NewNode::now(FIRST_SEQUENCE, content, author),
        };
        match self.commit(graph_id, changes).await? {
            Applied::Inserted { branch, node, .. } => {
                info!(graph_id = %graph_id, branch_id = %branch, node_id = %node, "Root created");
            }
            _ => debug!(graph_id = %graph_id, "Root created concurrently"),
        }
        Ok(graph_id.clone())
    }

    /// Append a node after the head of `node`'s branch.
    pub async fn extend(
        &self,
        node: NodeId,
        content: &str,
        author: &str,
    ) -> Result<GraphId, EngineError> {
        let tree = self.tree_for_node(node).await?;
        let graph_id = tree.id().clone();
        let branch = tree
            .node(node)
            .map_err(|e| EngineError::from_tree(&graph_id, e))?
            .branch_id;

        let changes = ChangeSet::AppendNode {
            branch,
            node: NodeDraft::now(content, author),
        };
        if let Applied::Inserted { node: new_node, sequence, .. } = self.commit(&graph_id, changes).await? {
            info!(graph_id = %graph_id, branch_id = %branch, node_id = %new_node, sequence, "Branch extended");
        }
        Ok(graph_id)
    }

    /// Create a branch forked from `parent`, holding one node.
    pub async fn fork(
        &self,
        parent: NodeId,
        label: &str,
        initial_content: &str,
        author: &str,
    ) -> Result<GraphId, EngineError> {
        let tree = self.tree_for_node(parent).await?;
        let graph_id = tree.id().clone();

        let changes = ChangeSet::Fork {
            parent_node: parent,
            label: label.to_string(),
            first_node: NewNode::now(FIRST_SEQUENCE, initial_content, author),
        };
        if let Applied::Inserted { branch, node, .. } = self.commit(&graph_id, changes).await? {
            info!(graph_id = %graph_id, parent_node_id = %parent, branch_id = %branch, node_id = %node, "Branch forked");
        }
        Ok(graph_id)
    }

    /// Delete a node, every branch forked from it (transitively) and all
    /// nodes in those branches.
    pub async fn delete_node_and_descendants(&self, node: NodeId) -> Result<GraphId, EngineError> {
        let tree = self.tree_for_node(node).await?;
        let removal = tree
            .plan_subtree_removal(node)
            .map_err(|e| EngineError::from_tree(tree.id(), e))?;
        self.commit_removal(&tree, removal, "delete_node_and_descendants").await
    }

    /// Delete every node before `node` in its branch, with their subtrees.
    pub async fn delete_extension(&self, node: NodeId) -> Result<GraphId, EngineError> {
        let tree = self.tree_for_node(node).await?;
        let removal = tree
            .plan_extension_removal(node)
            .map_err(|e| EngineError::from_tree(tree.id(), e))?;
        self.commit_removal(&tree, removal, "delete_extension").await
    }

    /// Delete every branch forked directly from `node`, with their subtrees.
    pub async fn delete_children(&self, node: NodeId) -> Result<GraphId, EngineError> {
        let tree = self.tree_for_node(node).await?;
        let removal = tree
            .plan_children_removal(node)
            .map_err(|e| EngineError::from_tree(tree.id(), e))?;
        self.commit_removal(&tree, removal, "delete_children").await
    }

    /// Delete a graph and everything it owns.
    pub async fn delete_graph(&self, graph_id: &GraphId) -> Result<(), EngineError> {
        let deleted = self
            .store
            .delete_graph(graph_id)
            .await
            .map_err(EngineError::from_store)?;
        if !deleted {
            return Err(EngineError::NotFound(Entity::Graph(graph_id.clone())));
        }
        info!(graph_id = %graph_id, "Graph deleted");
        Ok(())
    }

    /// History leading to `node`, oldest first, following fork points.
    pub async fn context_path(&self, node: NodeId) -> Result<Vec<Node>, EngineError> {
        let tree = self.tree_for_node(node).await?;
        let path = tree
            .context_path(node)
            .map_err(|e| EngineError::from_tree(tree.id(), e))?;
        Ok(path.into_iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGraphStore;
    use crate::tree::tests::sample_records;
    use crate::tree::GraphRecords;

    fn seeded() -> TreeEngine<InMemoryGraphStore> {
        let store = InMemoryGraphStore::new();
        store.insert_records(sample_records());
        TreeEngine::new(Arc::new(store))
    }

    fn gid() -> GraphId {
        GraphId::new("g")
    }

    #[tokio::test]
    async fn test_get_or_create_distinguishes_found_and_created() {
        let engine = TreeEngine::new(Arc::new(InMemoryGraphStore::new()));

        let first = engine.get_or_create_graph(&gid()).await.unwrap();
        assert!(first.was_created());
        assert_eq!(first.into_tree().graph().name, "Project g");

        let second = engine.get_or_create_graph(&gid()).await.unwrap();
        assert!(!second.was_created());
    }

    #[tokio::test]
    async fn test_create_root_is_idempotent() {
        let engine = TreeEngine::new(Arc::new(InMemoryGraphStore::new()));

        engine.create_root(&gid(), "Hello root", "user").await.unwrap();
        engine.create_root(&gid(), "Hello again", "user").await.unwrap();

        let tree = engine.load_tree(&gid()).await.unwrap();
        assert_eq!(tree.num_branches(), 1);
        assert_eq!(tree.num_nodes(), 1);
        let root = tree.root_branch().unwrap();
        assert_eq!(root.label, ROOT_BRANCH_LABEL);
        let head = tree.head(root.id).unwrap().unwrap();
        assert_eq!(head.sequence, FIRST_SEQUENCE);
        assert_eq!(head.content, "Hello root");
    }

    #[tokio::test]
    async fn test_create_root_on_existing_empty_graph() {
        let engine = TreeEngine::new(Arc::new(InMemoryGraphStore::new()));
        engine.get_or_create_graph(&gid()).await.unwrap();
        engine.create_root(&gid(), "Hello root", "user").await.unwrap();

        let tree = engine.load_tree(&gid()).await.unwrap();
        assert!(tree.root_branch().is_some());
    }

    #[tokio::test]
    async fn test_extend_appends_after_head_from_any_node() {
        let engine = seeded();
        // Extending from n1 still appends after n3, the head of branch 1.
        engine.extend(NodeId::new(1), "fourth", "assistant").await.unwrap();

        let tree = engine.load_tree(&gid()).await.unwrap();
        let head = tree.head(BranchId::new(1)).unwrap().unwrap();
        assert_eq!(head.sequence, 4);
        assert_eq!(head.content, "fourth");
        assert_eq!(head.author, "assistant");
        assert_eq!(tree.node(NodeId::new(3)).unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn test_fork_creates_single_node_branch() {
        let engine = seeded();
        engine.fork(NodeId::new(5), "Exploration", "what if", "user").await.unwrap();

        let tree = engine.load_tree(&gid()).await.unwrap();
        let forks = tree.sub_branches_of(NodeId::new(5));
        assert_eq!(forks.len(), 1);
        let branch = tree.branch(forks[0]).unwrap();
        assert_eq!(branch.label, "Exploration");
        let members = tree.nodes_of(branch.id).unwrap();
        assert_eq!(members.len(), 1);
        let first = tree.node(members[0]).unwrap();
        assert_eq!(first.sequence, FIRST_SEQUENCE);
        assert_eq!(first.content, "what if");
    }

    #[tokio::test]
    async fn test_missing_node_is_not_found() {
        let engine = seeded();
        let missing = NodeId::new(999);
        let expected = EngineError::NotFound(Entity::Node(missing));

        assert_eq!(engine.extend(missing, "x", "user").await.unwrap_err(), expected);
        assert_eq!(engine.fork(missing, "l", "x", "user").await.unwrap_err(), expected);
        assert_eq!(engine.delete_node_and_descendants(missing).await.unwrap_err(), expected);
        assert_eq!(engine.delete_extension(missing).await.unwrap_err(), expected);
        assert_eq!(engine.delete_children(missing).await.unwrap_err(), expected);
        assert_eq!(engine.store().num_nodes(), 8);
    }

    #[tokio::test]
    async fn test_delete_node_and_descendants() {
        let engine = seeded();
        engine.delete_node_and_descendants(NodeId::new(2)).await.unwrap();

        let tree = engine.load_tree(&gid()).await.unwrap();
        assert!(!tree.contains_node(NodeId::new(2)));
        assert!(!tree.contains_node(NodeId::new(7)));
        assert!(tree.branch(BranchId::new(4)).is_err());
        assert_eq!(tree.num_nodes(), 6);
    }

    #[tokio::test]
    async fn test_delete_extension_and_children() {
        let engine = seeded();
        engine.delete_children(NodeId::new(1)).await.unwrap();
        let tree = engine.load_tree(&gid()).await.unwrap();
        assert_eq!(tree.num_branches(), 3);
        assert_eq!(tree.nodes_of(BranchId::new(1)).unwrap().len(), 3);

        engine.delete_extension(NodeId::new(3)).await.unwrap();
        let tree = engine.load_tree(&gid()).await.unwrap();
        assert_eq!(tree.nodes_of(BranchId::new(1)).unwrap(), &[NodeId::new(3)]);
        // Branch 5 forks from n3 and survives.
        assert_eq!(tree.num_branches(), 2);
    }

    #[tokio::test]
    async fn test_delete_graph() {
        let engine = seeded();
        engine.delete_graph(&gid()).await.unwrap();
        assert_eq!(
            engine.delete_graph(&gid()).await.unwrap_err(),
            EngineError::NotFound(Entity::Graph(gid()))
        );
        assert_eq!(
            engine.extend(NodeId::new(1), "x", "user").await.unwrap_err(),
            EngineError::NotFound(Entity::Node(NodeId::new(1)))
        );
    }

    #[tokio::test]
    async fn test_corrupt_records_surface_as_storage_failure() {
        let store = InMemoryGraphStore::new();
        let mut records = sample_records();
        records.branches.push(crate::tree::tests::branch(9, None));
        store.insert_records(records);
        let engine = TreeEngine::new(Arc::new(store));

        assert!(matches!(
            engine.load_tree(&gid()).await,
            Err(EngineError::StorageFailure(_))
        ));
    }

    /// Serves one fixed set of records, however malformed.
    struct FixedStore(GraphRecords);

    #[async_trait::async_trait]
    impl GraphStore for FixedStore {
        type Error = crate::store::memory::InMemoryError;

        async fn load_graph(&self, _id: &GraphId) -> Result<Option<GraphRecords>, Self::Error> {
            Ok(Some(self.0.clone()))
        }

        async fn graph_id_for_node(&self, _id: NodeId) -> Result<Option<GraphId>, Self::Error> {
            Ok(Some(self.0.graph.id.clone()))
        }

        async fn create_graph(&self, _graph: &Graph) -> Result<bool, Self::Error> {
            Ok(false)
        }

        async fn apply(&self, _graph: &GraphId, _changes: ChangeSet) -> Result<Applied, Self::Error> {
            Ok(Applied::Unchanged)
        }

        async fn delete_graph(&self, _id: &GraphId) -> Result<bool, Self::Error> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_node_in_missing_branch_is_storage_failure() {
        let mut records = sample_records();
        records.nodes.push(crate::tree::tests::node(42, 77, 1));
        let engine = TreeEngine::new(Arc::new(FixedStore(records)));

        let err = engine.load_tree(&gid()).await.unwrap_err();
        assert!(matches!(err, EngineError::StorageFailure(_)), "{:?}", err);

        let err = engine.extend(NodeId::new(1), "x", "user").await.unwrap_err();
        assert!(matches!(err, EngineError::StorageFailure(_)), "{:?}", err);
    }
}
