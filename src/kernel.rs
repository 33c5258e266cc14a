//! Service facade: mutate, reload, project.
//!
//! Every call runs one engine operation, reloads the affected graph and
//! projects it, so callers always observe post-mutation state.

use std::sync::Arc;
use std::time::Instant;

use crate::engine::{EngineError, Entity, GraphLookup, TreeEngine};
use crate::projector::project;
use crate::store::GraphStore;
use crate::types::{GraphId, GraphState, Node, NodeId};

/// Error type surfaced to callers of the facade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// Referenced graph, branch or node does not exist.
    #[error("Not found: {0}")]
    NotFound(Entity),
    /// Structural constraint violated.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// The persistence layer failed to commit.
    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl KernelError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(Entity::Graph(_)) => "GRAPH_NOT_FOUND",
            Self::NotFound(Entity::Branch(_)) => "BRANCH_NOT_FOUND",
            Self::NotFound(Entity::Node(_)) => "NODE_NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::StorageFailure(_) => "STORAGE_FAILURE",
        }
    }
}

impl From<EngineError> for KernelError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(entity) => Self::NotFound(entity),
            EngineError::Conflict(msg) => Self::Conflict(msg),
            EngineError::StorageFailure(msg) => Self::StorageFailure(msg),
        }
    }
}

/// Facade over the mutation engine and projector.
pub struct GraphKernel<S: GraphStore> {
    engine: TreeEngine<S>,
}

impl<S: GraphStore + 'static> GraphKernel<S> {
    /// Create a facade over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            engine: TreeEngine::new(store),
        }
    }

    /// Get the underlying engine.
    pub fn engine(&self) -> &TreeEngine<S> {
        &self.engine
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        self.engine.store()
    }

    async fn snapshot(
        &self,
        graph_id: &GraphId,
        operation: &'static str,
        start: Instant,
    ) -> Result<GraphState, KernelError> {
        let tree = self.engine.load_tree(graph_id).await?;
        let state = project(&tree);
        tracing::info!(
            target: "cactus_graph::metrics",
            metric_type = "operation",
            operation,
            graph_id = %graph_id,
            node_count = state.nodes.len(),
            branch_count = state.branches.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "operation_metric"
        );
        Ok(state)
    }

    /// Snapshot of a graph, creating it if it does not exist.
    pub async fn get_or_create_graph(&self, graph_id: &GraphId) -> Result<GraphState, KernelError> {
        let start = Instant::now();
        let lookup: GraphLookup = self.engine.get_or_create_graph(graph_id).await?;
        let was_created = lookup.was_created();
        let state = project(&lookup.into_tree());
        tracing::info!(
            target: "cactus_graph::metrics",
            metric_type = "operation",
            operation = "get_or_create_graph",
            graph_id = %graph_id,
            was_created,
            node_count = state.nodes.len(),
            branch_count = state.branches.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "operation_metric"
        );
        Ok(state)
    }

    /// Create the graph's root branch (idempotent) and return its snapshot.
    pub async fn create_root(
        &self,
        graph_id: &GraphId,
        content: &str,
        author: &str,
    ) -> Result<GraphState, KernelError> {
        let start = Instant::now();
        let graph_id = self.engine.create_root(graph_id, content, author).await?;
        self.snapshot(&graph_id, "create_root", start).await
    }

    /// Append a node to `node`'s branch and return the snapshot.
    pub async fn extend(
        &self,
        node: NodeId,
        content: &str,
        author: &str,
    ) -> Result<GraphState, KernelError> {
        let start = Instant::now();
        let graph_id = self.engine.extend(node, content, author).await?;
        self.snapshot(&graph_id, "extend", start).await
    }

    /// Fork a new branch from `parent` and return the snapshot.
    pub async fn fork(
        &self,
        parent: NodeId,
        label: &str,
        initial_content: &str,
        author: &str,
    ) -> Result<GraphState, KernelError> {
        let start = Instant::now();
        let graph_id = self.engine.fork(parent, label, initial_content, author).await?;
        self.snapshot(&graph_id, "fork", start).await
    }

    /// Delete `node` with everything forked from it and return the snapshot.
    pub async fn delete_node_and_descendants(&self, node: NodeId) -> Result<GraphState, KernelError> {
        let start = Instant::now();
        let graph_id = self.engine.delete_node_and_descendants(node).await?;
        self.snapshot(&graph_id, "delete_node_and_descendants", start).await
    }

    /// Delete the nodes before `node` in its branch and return the snapshot.
    pub async fn delete_extension(&self, node: NodeId) -> Result<GraphState, KernelError> {
        let start = Instant::now();
        let graph_id = self.engine.delete_extension(node).await?;
        self.snapshot(&graph_id, "delete_extension", start).await
    }

    /// Delete the branches forked from `node` and return the snapshot.
    pub async fn delete_children(&self, node: NodeId) -> Result<GraphState, KernelError> {
        let start = Instant::now();
        let graph_id = self.engine.delete_children(node).await?;
        self.snapshot(&graph_id, "delete_children", start).await
    }

    /// Delete a graph.
    pub async fn delete_graph(&self, graph_id: &GraphId) -> Result<(), KernelError> {
        Ok(self.engine.delete_graph(graph_id).await?)
    }

    /// Conversation history leading to `node`.
    pub async fn context_path(&self, node: NodeId) -> Result<Vec<Node>, KernelError> {
        Ok(self.engine.context_path(node).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGraphStore;

    fn kernel() -> GraphKernel<InMemoryGraphStore> {
        GraphKernel::new(Arc::new(InMemoryGraphStore::new()))
    }

    /// Collects the `operation` field of metric events.
    #[derive(Clone, Default)]
    struct MetricOperations(Arc<parking_lot::Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for MetricOperations {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct Operation(Option<String>);

            impl tracing::field::Visit for Operation {
                fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                    if field.name() == "operation" {
                        self.0 = Some(value.to_string());
                    }
                }

                fn record_debug(&mut self, _field: &tracing::field::Field, _value: &dyn std::fmt::Debug) {}
            }

            if event.metadata().target() != "cactus_graph::metrics" {
                return;
            }
            let mut operation = Operation(None);
            event.record(&mut operation);
            if let Some(op) = operation.0 {
                self.0.lock().push(op);
            }
        }
    }

    #[test]
    fn test_error_mapping_is_lossless() {
        let cases = [
            EngineError::NotFound(Entity::Node(NodeId::new(3))),
            EngineError::NotFound(Entity::Graph(GraphId::new("g"))),
            EngineError::Conflict("two roots".into()),
            EngineError::StorageFailure("connection reset".into()),
        ];
        for case in cases {
            let message = case.to_string();
            let mapped = KernelError::from(case);
            assert_eq!(mapped.to_string(), message);
        }
    }

    #[tokio::test]
    async fn test_get_or_create_returns_empty_snapshot() {
        let kernel = kernel();
        let state = kernel.get_or_create_graph(&GraphId::new("fresh")).await.unwrap();

        assert_eq!(state.id, GraphId::new("fresh"));
        assert_eq!(state.name, "Project fresh");
        assert!(state.branches.is_empty());
        assert_eq!(state.next_node_id, 1);
    }

    #[tokio::test]
    async fn test_every_call_emits_operation_metric() {
        use tracing_subscriber::layer::SubscriberExt;

        let operations = MetricOperations::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(operations.clone()),
        );

        let kernel = kernel();
        let gid = GraphId::new("metrics");
        kernel.get_or_create_graph(&gid).await.unwrap();
        kernel.create_root(&gid, "Hello root", "user").await.unwrap();

        assert_eq!(
            *operations.0.lock(),
            vec!["get_or_create_graph".to_string(), "create_root".to_string()]
        );
    }

    #[tokio::test]
    async fn test_mutations_return_post_mutation_state() {
        let kernel = kernel();
        let gid = GraphId::new("g");

        let state = kernel.create_root(&gid, "Hello root", "user").await.unwrap();
        let root = state.root_branch().unwrap().clone();
        let first = root.node_ids[0];

        let state = kernel.extend(first, "Second", "user").await.unwrap();
        assert_eq!(state.branch(root.id).unwrap().node_ids.len(), 2);

        let state = kernel.fork(first, "Exploration", "Fork here", "user").await.unwrap();
        assert_eq!(state.branches_forked_from(first).len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_codes() {
        let kernel = kernel();
        let err = kernel.extend(NodeId::new(1), "x", "user").await.unwrap_err();
        assert_eq!(err.code(), "NODE_NOT_FOUND");

        let err = kernel.delete_graph(&GraphId::new("nope")).await.unwrap_err();
        assert_eq!(err.code(), "GRAPH_NOT_FOUND");
    }
}
