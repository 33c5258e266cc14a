//! # cactus-graph
//!
//! Branching conversation trees for an exploratory chat canvas.
//!
//! A graph holds branches; a branch is an ordered sequence of nodes and may
//! fork from a node in another branch. Exactly one branch per graph (the
//! root) has no fork point.
//!
//! ## Architecture
//!
//! ```text
//! GraphKernel ─→ TreeEngine ─→ GraphStore (Postgres or Memory)
//!      │              │
//!      │          GraphTree (arena, removal planning)
//!      ↓
//!  project() ─→ GraphState (render-ready snapshot)
//! ```
//!
//! ## Guarantees
//!
//! - Every mutation reaches the store as one atomic [`store::ChangeSet`]
//! - Deletion cascades remove dependents before the entities they hang off
//! - Same stored state → byte-identical [`GraphState`] and fingerprint

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod tree;
pub mod store;
pub mod engine;
pub mod projector;
pub mod kernel;
pub mod canonical;

#[cfg(feature = "service")]
pub mod service;

/// Version of the persisted schema and snapshot wire format.
pub const CACTUS_GRAPH_SCHEMA_VERSION: &str = "1";

// Re-exports
pub use types::{
    Branch, BranchId, Camera, Graph, GraphId, GraphState, NewNode, Node, NodeDraft, NodeId,
    SerializableBranch, SerializableNode, DEFAULT_AUTHOR, FIRST_SEQUENCE, ROOT_BRANCH_LABEL,
};
pub use tree::{GraphRecords, GraphTree, Removal, TreeError};
pub use store::{Applied, ChangeSet, GraphStore, InMemoryGraphStore};
#[cfg(feature = "postgres")]
pub use store::PostgresGraphStore;
pub use engine::{EngineError, Entity, GraphLookup, TreeEngine};
pub use projector::{project, project_with, Layout, BRANCH_COLOR, NEXT_COLOR_INDEX};
pub use kernel::{GraphKernel, KernelError};
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes};
