//! Graph aggregate: the root of a conversation tree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-supplied identifier of a graph.
///
/// Graph ids are opaque strings chosen by the client (the frontend uses
/// short project keys), so unlike branch and node ids they are never
/// assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(String);

impl GraphId {
    /// Create a graph id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GraphId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for GraphId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A conversation graph.
///
/// Owns its branches; the branches and nodes themselves are held by the
/// store and assembled into a [`crate::tree::GraphTree`] on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    /// Unique identifier.
    pub id: GraphId,
    /// Display name.
    pub name: String,
}

impl Graph {
    /// Create a graph with an explicit name.
    pub fn new(id: GraphId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Create a graph with the default display name (`Project {id}`).
    pub fn with_default_name(id: GraphId) -> Self {
        let name = format!("Project {}", id);
        Self { id, name }
    }
}
