//! Axum routes for the graph service.

use axum::{
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::kernel::KernelError;
use crate::store::GraphStore;
use crate::types::{GraphId, GraphState, Node, NodeId, DEFAULT_AUTHOR};
use crate::CACTUS_GRAPH_SCHEMA_VERSION;

use super::middleware::record_store_health;
use super::state::ServiceState;

// ============================================================================
// Request/Response Types
// ============================================================================

fn default_author() -> String {
    DEFAULT_AUTHOR.to_string()
}

/// Request to create a graph's root branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootRequest {
    /// Content of the first node.
    pub content: String,
    /// Author tag.
    #[serde(default = "default_author")]
    pub author: String,
}

/// Request to append a node to a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendRequest {
    /// Content of the new node.
    pub content: String,
    /// Author tag.
    #[serde(default = "default_author")]
    pub author: String,
}

/// Request to fork a branch from a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRequest {
    /// Label of the new branch.
    pub label: String,
    /// Content of the new branch's first node.
    #[serde(alias = "initial_prompt")]
    pub initial_content: String,
    /// Author tag.
    #[serde(default = "default_author")]
    pub author: String,
}

/// History leading to a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResponse {
    /// The node the path ends at.
    pub node_id: NodeId,
    /// Nodes from the root branch down to `node_id`.
    pub nodes: Vec<Node>,
}

/// Service health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded".
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Snapshot wire format version.
    pub schema_version: String,
    /// Whether the store answered.
    pub store_healthy: bool,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    /// Always "alive".
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Whether the service can take traffic.
    pub ready: bool,
    /// Store reachability.
    pub store: bool,
    /// Failure reason, if any.
    pub details: Option<String>,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: KernelError) -> ApiError {
    let status = match &e {
        KernelError::NotFound(_) => StatusCode::NOT_FOUND,
        KernelError::Conflict(_) => StatusCode::CONFLICT,
        KernelError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(code = e.code(), error = %e, "Request failed");
    } else {
        tracing::warn!(code = e.code(), error = %e, "Request error");
    }
    let mut body = ErrorResponse::new(e.code(), e.to_string());
    if let KernelError::NotFound(entity) = &e {
        body.details = Some(entity.to_string());
    }
    (status, Json(body))
}

/// Snapshot body with its fingerprint as `ETag`.
fn state_response(state: GraphState) -> Response {
    let etag = format!("\"{}\"", state.fingerprint());
    ([(header::ETAG, etag)], Json(state)).into_response()
}

// ============================================================================
// Route Handlers
// ============================================================================

type Shared<S> = State<Arc<ServiceState<S>>>;

/// Fetch a graph's snapshot, creating the graph if needed.
async fn get_graph_handler<S: GraphStore + 'static>(
    State(state): Shared<S>,
    Path(graph_id): Path<String>,
) -> Result<Response, ApiError> {
    let snapshot = state
        .kernel
        .get_or_create_graph(&GraphId::new(graph_id))
        .await
        .map_err(api_error)?;
    Ok(state_response(snapshot))
}

/// Create the root branch of a graph.
async fn create_root_handler<S: GraphStore + 'static>(
    State(state): Shared<S>,
    Path(graph_id): Path<String>,
    Json(request): Json<RootRequest>,
) -> Result<Response, ApiError> {
    let snapshot = state
        .kernel
        .create_root(&GraphId::new(graph_id), &request.content, &request.author)
        .await
        .map_err(api_error)?;
    Ok(state_response(snapshot))
}

/// Delete a graph.
async fn delete_graph_handler<S: GraphStore + 'static>(
    State(state): Shared<S>,
    Path(graph_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .kernel
        .delete_graph(&GraphId::new(graph_id))
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Append a node to the branch of `node_id`.
async fn extend_handler<S: GraphStore + 'static>(
    State(state): Shared<S>,
    Path(node_id): Path<i64>,
    Json(request): Json<ExtendRequest>,
) -> Result<Response, ApiError> {
    let snapshot = state
        .kernel
        .extend(NodeId::new(node_id), &request.content, &request.author)
        .await
        .map_err(api_error)?;
    Ok(state_response(snapshot))
}

/// Fork a new branch from `node_id`.
async fn branch_handler<S: GraphStore + 'static>(
    State(state): Shared<S>,
    Path(node_id): Path<i64>,
    Json(request): Json<BranchRequest>,
) -> Result<Response, ApiError> {
    let snapshot = state
        .kernel
        .fork(
            NodeId::new(node_id),
            &request.label,
            &request.initial_content,
            &request.author,
        )
        .await
        .map_err(api_error)?;
    Ok(state_response(snapshot))
}

/// Delete `node_id` and everything forked from it.
async fn delete_node_handler<S: GraphStore + 'static>(
    State(state): Shared<S>,
    Path(node_id): Path<i64>,
) -> Result<Response, ApiError> {
    let snapshot = state
        .kernel
        .delete_node_and_descendants(NodeId::new(node_id))
        .await
        .map_err(api_error)?;
    Ok(state_response(snapshot))
}

/// Delete the nodes before `node_id` in its branch.
async fn delete_extension_handler<S: GraphStore + 'static>(
    State(state): Shared<S>,
    Path(node_id): Path<i64>,
) -> Result<Response, ApiError> {
    let snapshot = state
        .kernel
        .delete_extension(NodeId::new(node_id))
        .await
        .map_err(api_error)?;
    Ok(state_response(snapshot))
}

/// Delete the branches forked from `node_id`.
async fn delete_children_handler<S: GraphStore + 'static>(
    State(state): Shared<S>,
    Path(node_id): Path<i64>,
) -> Result<Response, ApiError> {
    let snapshot = state
        .kernel
        .delete_children(NodeId::new(node_id))
        .await
        .map_err(api_error)?;
    Ok(state_response(snapshot))
}

/// History leading to `node_id`.
async fn context_handler<S: GraphStore + 'static>(
    State(state): Shared<S>,
    Path(node_id): Path<i64>,
) -> Result<Json<ContextResponse>, ApiError> {
    let node_id = NodeId::new(node_id);
    let nodes = state.kernel.context_path(node_id).await.map_err(api_error)?;
    Ok(Json(ContextResponse { node_id, nodes }))
}

/// Health check endpoint (detailed).
async fn health_handler<S: GraphStore + 'static>(State(state): Shared<S>) -> Json<HealthResponse> {
    let store_healthy = state.store().is_healthy().await;
    record_store_health(store_healthy);

    Json(HealthResponse {
        status: if store_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: CACTUS_GRAPH_SCHEMA_VERSION.to_string(),
        store_healthy,
    })
}

/// Liveness probe endpoint. Does NOT check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 if the store is reachable, 503 otherwise.
async fn readiness_handler<S: GraphStore + 'static>(
    State(state): Shared<S>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let store_healthy = state.store().is_healthy().await;
    record_store_health(store_healthy);

    if store_healthy {
        Ok(Json(ReadinessResponse {
            ready: true,
            store: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                store: false,
                details: Some("Store connection failed".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the graph service.
pub fn create_router<S: GraphStore + 'static>(state: ServiceState<S>) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Graphs
        .route(
            "/api/graphs/:graph_id",
            get(get_graph_handler::<S>).delete(delete_graph_handler::<S>),
        )
        .route("/api/graphs/:graph_id/root", post(create_root_handler::<S>))
        // Node mutations
        .route("/api/nodes/:node_id/extend", post(extend_handler::<S>))
        .route("/api/nodes/:node_id/branch", post(branch_handler::<S>))
        .route("/api/nodes/:node_id/delete", post(delete_node_handler::<S>))
        .route("/api/nodes/:node_id/delete-extension", post(delete_extension_handler::<S>))
        .route("/api/nodes/:node_id/delete-children", post(delete_children_handler::<S>))
        // Reads
        .route("/api/nodes/:node_id/context", get(context_handler::<S>))
        // Health checks
        .route("/health", get(health_handler::<S>))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler::<S>))
        .with_state(state)
}
