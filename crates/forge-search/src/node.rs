//! Search tree nodes
//!
//! A node is one evaluated candidate program: the code, where it started,
//! where it ended, and what it earned. A node whose `end_state` is `None`
//! is a dead branch (the program raised a semantic error or its world
//! faulted) and is never selected for expansion - the end state does not
//! exist, so nothing can start from it.

use chrono::{DateTime, Utc};
use forge_world::{TelemetryDelta, WorldSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Stable identity of one search node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provenance of a candidate: which model proposed it and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub model: Option<String>,
    pub tokens: Option<u64>,
    pub rationale: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Default for NodeMeta {
    fn default() -> Self {
        Self {
            model: None,
            tokens: None,
            rationale: None,
            created_at: Utc::now(),
        }
    }
}

/// One evaluated candidate in the search tree.
#[derive(Debug, Clone)]
pub struct SearchNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    /// Group that evaluated this node.
    pub group: usize,
    /// The candidate program as evaluated.
    pub code: String,
    /// World state the evaluation started from.
    pub start_state: Arc<WorldSnapshot>,
    /// World state after the evaluation window; `None` for dead branches.
    pub end_state: Option<Arc<WorldSnapshot>>,
    /// Holdout-corrected flow change.
    pub delta: TelemetryDelta,
    /// Scalar reward of this node alone.
    pub value: f64,
    /// Captured program output.
    pub outcome_text: String,
    /// Semantic error or transport fault, when the branch died.
    pub failure: Option<String>,
    pub meta: NodeMeta,
}

impl SearchNode {
    #[inline]
    #[must_use]
    pub fn is_dead_end(&self) -> bool {
        self.end_state.is_none()
    }
}

/// Flat, serializable form of a node for persistence. Snapshots are
/// stored by value; shared ownership is a runtime concern only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub group: usize,
    pub code: String,
    pub start_state: WorldSnapshot,
    pub end_state: Option<WorldSnapshot>,
    pub delta: TelemetryDelta,
    pub value: f64,
    pub outcome_text: String,
    pub failure: Option<String>,
    pub meta: NodeMeta,
}

impl From<&SearchNode> for NodeRecord {
    fn from(node: &SearchNode) -> Self {
        Self {
            id: node.id,
            parent: node.parent,
            group: node.group,
            code: node.code.clone(),
            start_state: (*node.start_state).clone(),
            end_state: node.end_state.as_deref().cloned(),
            delta: node.delta.clone(),
            value: node.value,
            outcome_text: node.outcome_text.clone(),
            failure: node.failure.clone(),
            meta: node.meta.clone(),
        }
    }
}
