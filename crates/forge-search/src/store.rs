//! Node persistence
//!
//! The search tree outlives a run through a [`NodeStore`]. The store is
//! append-only and idempotent on node id, so a retried persist after a
//! transient failure cannot duplicate a node. Lineage queries walk parent
//! links so generators can see how a line of work has been trending.

use crate::error::SearchError;
use crate::node::{NodeId, NodeRecord, SearchNode};
use dashmap::DashMap;

/// Append-only storage for evaluated nodes.
#[async_trait::async_trait]
pub trait NodeStore: Send + Sync {
    /// Persist one node. Re-persisting the same id is a no-op.
    async fn create(&self, node: &SearchNode) -> Result<(), SearchError>;

    /// Fetch one node by id.
    async fn get(&self, id: NodeId) -> Result<Option<NodeRecord>, SearchError>;

    /// Rewards from the root to `id`, in lineage order.
    async fn lineage_rewards(&self, id: NodeId) -> Result<Vec<f64>, SearchError>;

    /// Number of stored nodes.
    async fn len(&self) -> Result<usize, SearchError>;
}

/// In-process store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: DashMap<NodeId, NodeRecord>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored records, in no particular order.
    #[must_use]
    pub fn records(&self) -> Vec<NodeRecord> {
        self.nodes.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[async_trait::async_trait]
impl NodeStore for MemoryStore {
    async fn create(&self, node: &SearchNode) -> Result<(), SearchError> {
        self.nodes.entry(node.id).or_insert_with(|| NodeRecord::from(node));
        Ok(())
    }

    async fn get(&self, id: NodeId) -> Result<Option<NodeRecord>, SearchError> {
        Ok(self.nodes.get(&id).map(|r| r.clone()))
    }

    async fn lineage_rewards(&self, id: NodeId) -> Result<Vec<f64>, SearchError> {
        let mut rewards = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| SearchError::UnknownNode(current.to_string()))?;
            rewards.push(node.value);
            cursor = node.parent;
        }
        rewards.reverse();
        Ok(rewards)
    }

    async fn len(&self) -> Result<usize, SearchError> {
        Ok(self.nodes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeMeta;
    use forge_world::{TelemetryDelta, WorldSnapshot};
    use std::sync::Arc;

    fn node(parent: Option<NodeId>, value: f64) -> SearchNode {
        SearchNode {
            id: NodeId::new(),
            parent,
            group: 0,
            code: "noop".into(),
            start_state: Arc::new(WorldSnapshot::empty()),
            end_state: Some(Arc::new(WorldSnapshot::empty())),
            delta: TelemetryDelta::default(),
            value,
            outcome_text: String::new(),
            failure: None,
            meta: NodeMeta::default(),
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_on_id() {
        let store = MemoryStore::new();
        let mut n = node(None, 1.0);
        store.create(&n).await.unwrap();
        n.value = 99.0;
        store.create(&n).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.get(n.id).await.unwrap().unwrap().value, 1.0);
    }

    #[tokio::test]
    async fn lineage_rewards_run_root_to_leaf() {
        let store = MemoryStore::new();
        let root = node(None, 1.0);
        let mid = node(Some(root.id), 2.0);
        let leaf = node(Some(mid.id), 3.0);
        for n in [&root, &mid, &leaf] {
            store.create(n).await.unwrap();
        }
        assert_eq!(
            store.lineage_rewards(leaf.id).await.unwrap(),
            vec![1.0, 2.0, 3.0]
        );
    }

    #[tokio::test]
    async fn missing_parents_are_an_error() {
        let store = MemoryStore::new();
        let orphan = node(Some(NodeId::new()), 1.0);
        store.create(&orphan).await.unwrap();
        assert!(matches!(
            store.lineage_rewards(orphan.id).await,
            Err(SearchError::UnknownNode(_))
        ));
    }
}
