//! Graph REST Service
//!
//! Exposes the graph kernel over HTTP for the canvas frontend.
//!
//! ## Endpoints
//!
//! - `GET /api/graphs/:graph_id` - Snapshot (get-or-create)
//! - `POST /api/graphs/:graph_id/root` - Create root branch (idempotent)
//! - `DELETE /api/graphs/:graph_id` - Delete graph
//! - `POST /api/nodes/:node_id/extend` - Append to the node's branch
//! - `POST /api/nodes/:node_id/branch` - Fork a branch
//! - `POST /api/nodes/:node_id/delete` - Delete node and descendants
//! - `POST /api/nodes/:node_id/delete-extension` - Delete preceding nodes
//! - `POST /api/nodes/:node_id/delete-children` - Delete forked branches
//! - `GET /api/nodes/:node_id/context` - History leading to the node
//! - `GET /health`, `/health/live`, `/health/ready` - Probes

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_store_health};
pub use routes::create_router;
pub use state::ServiceState;
