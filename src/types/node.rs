//! Node types: single units of content within a branch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::branch::BranchId;

/// Sequence number of the first node in any branch.
pub const FIRST_SEQUENCE: i64 = 1;

/// Author tag used when the caller does not supply one.
pub const DEFAULT_AUTHOR: &str = "user";

/// Store-assigned identifier of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(i64);

impl NodeId {
    /// Wrap a raw id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for NodeId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A node record as persisted.
///
/// Within a branch, `sequence` is unique and strictly increasing in
/// creation order. The node holding the maximum sequence is the branch head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier.
    pub id: NodeId,
    /// Owning branch.
    pub branch_id: BranchId,
    /// Position within the owning branch.
    pub sequence: i64,
    /// Content text, supplied by the caller.
    pub content: String,
    /// Author tag (e.g. "user", "assistant").
    pub author: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Node payload appended after a branch head.
///
/// The store assigns the sequence while it holds the branch, so concurrent
/// appends never pick the same position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDraft {
    /// Content text.
    pub content: String,
    /// Author tag.
    pub author: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl NodeDraft {
    /// Build a draft stamped with the current time.
    pub fn now(content: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            author: author.into(),
            created_at: Utc::now(),
        }
    }

    /// Place the draft at a sequence.
    pub fn at(self, sequence: i64) -> NewNode {
        NewNode {
            sequence,
            content: self.content,
            author: self.author,
            created_at: self.created_at,
        }
    }
}

/// A node that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNode {
    /// Position within the target branch.
    pub sequence: i64,
    /// Content text.
    pub content: String,
    /// Author tag.
    pub author: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl NewNode {
    /// Build a node stamped with the current time.
    pub fn now(sequence: i64, content: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            sequence,
            content: content.into(),
            author: author.into(),
            created_at: Utc::now(),
        }
    }

    /// Attach the store-assigned ids.
    pub fn into_node(self, id: NodeId, branch_id: BranchId) -> Node {
        Node {
            id,
            branch_id,
            sequence: self.sequence,
            content: self.content,
            author: self.author,
            created_at: self.created_at,
        }
    }
}
