//! Service middleware for metrics and request tracking.
//!
//! ## Metrics Exposed
//!
//! - `request` - request count by path pattern, method, status, with latency
//! - `store_health` - result of readiness checks against the store

use axum::{extract::Request, middleware::Next, response::Response};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

/// Metrics middleware that records request counts and latency.
///
/// Uses tracing events; aggregate them from logs.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "cactus_graph::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

/// Normalize path for metrics to avoid high cardinality.
///
/// Numeric node ids become `:id`; graph ids (free-form) become `:graph`.
fn normalize_path(path: &str) -> String {
    static NODE_ID: OnceLock<regex_lite::Regex> = OnceLock::new();
    static GRAPH_ID: OnceLock<regex_lite::Regex> = OnceLock::new();

    let node_id = NODE_ID.get_or_init(|| {
        regex_lite::Regex::new(r"^/api/nodes/\d+").expect("valid node path regex")
    });
    let graph_id = GRAPH_ID.get_or_init(|| {
        regex_lite::Regex::new(r"^/api/graphs/[^/]+").expect("valid graph path regex")
    });

    let path = node_id.replace(path, "/api/nodes/:id");
    graph_id.replace(&path, "/api/graphs/:graph").to_string()
}

/// Record the outcome of a store health check.
pub fn record_store_health(healthy: bool) {
    let status = if healthy { "healthy" } else { "unhealthy" };
    info!(
        target: "cactus_graph::metrics",
        metric_type = "store_health",
        status = status,
        "store_health_metric"
    );
}
