//! Entity model and snapshot types.

pub mod graph;
pub mod branch;
pub mod node;
pub mod state;

pub use graph::{Graph, GraphId};
pub use branch::{Branch, BranchId, ROOT_BRANCH_LABEL};
pub use node::{NewNode, Node, NodeDraft, NodeId, DEFAULT_AUTHOR, FIRST_SEQUENCE};
pub use state::{Camera, GraphState, SerializableBranch, SerializableNode};
