//! In-memory prompt store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::traits::PromptStore;
use crate::types::{ActionOutcome, PromptNode, ResultUpdate};

/// Prompt store backed by a `HashMap` protected by `RwLock`.
///
/// Clones share the same map, so a test can keep a handle and inspect
/// what the engine wrote.
#[derive(Clone, Default)]
pub struct InMemoryPromptStore {
    nodes: Arc<RwLock<HashMap<String, PromptNode>>>,
}

impl InMemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node.
    pub async fn insert(&self, node: PromptNode) {
        self.nodes.write().await.insert(node.id.clone(), node);
    }

    /// Snapshot of a node, deleted or not.
    pub async fn get(&self, node_id: &str) -> Option<PromptNode> {
        self.nodes.read().await.get(node_id).cloned()
    }

    /// Snapshot of every node under `parent_id`, sorted by position.
    pub async fn children_of(&self, parent_id: &str) -> Vec<PromptNode> {
        let mut children: Vec<PromptNode> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        crate::hierarchy::sort_siblings(&mut children);
        children
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }
}

#[async_trait]
impl PromptStore for InMemoryPromptStore {
    async fn get_node(&self, node_id: &str) -> Result<Option<PromptNode>, StoreError> {
        Ok(self.nodes.read().await.get(node_id).cloned())
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<PromptNode>, StoreError> {
        Ok(self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.parent_id.as_deref() == Some(parent_id) && !n.is_deleted)
            .cloned()
            .collect())
    }

    async fn save_result(&self, node_id: &str, update: ResultUpdate) -> Result<(), StoreError> {
        let mut guard = self.nodes.write().await;
        let node = guard.get_mut(node_id).ok_or_else(|| StoreError::NotFound {
            id: node_id.to_string(),
        })?;
        node.output_response = Some(update.output_response);
        node.extracted_json = update.extracted_json;
        Ok(())
    }

    async fn save_action_outcome(
        &self,
        node_id: &str,
        outcome: ActionOutcome,
    ) -> Result<(), StoreError> {
        let mut guard = self.nodes.write().await;
        let node = guard.get_mut(node_id).ok_or_else(|| StoreError::NotFound {
            id: node_id.to_string(),
        })?;
        node.last_action_result = Some(outcome);
        Ok(())
    }

    async fn create_node(&self, mut node: PromptNode) -> Result<PromptNode, StoreError> {
        if node.id.is_empty() {
            node.id = Uuid::new_v4().to_string();
        }
        let mut guard = self.nodes.write().await;
        if guard.contains_key(&node.id) {
            return Err(StoreError::Store {
                message: format!("node {} already exists", node.id),
            });
        }
        guard.insert(node.id.clone(), node.clone());
        Ok(node)
    }
}
