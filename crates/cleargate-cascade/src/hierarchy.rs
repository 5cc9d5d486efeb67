//! Level-order materialization of a prompt tree.

use std::collections::HashSet;

use crate::engine::CascadeError;
use crate::traits::PromptStore;
use crate::types::PromptNode;

/// Load the tree under `root_id` as a list of levels.
///
/// Level 0 holds only the root; level `k+1` holds the non-deleted children
/// of every level-`k` node, parents in level order and siblings by
/// `position` (ties broken by id). Loading stops at the first empty level.
///
/// Any read failure fails the whole load. A node reachable twice (a cycle
/// in `parent_id` data) is visited once.
pub async fn load_hierarchy(
    store: &dyn PromptStore,
    root_id: &str,
) -> Result<Vec<Vec<PromptNode>>, CascadeError> {
    let fetch_err = |message: String| CascadeError::HierarchyFetch {
        node_id: root_id.to_string(),
        message,
    };

    let root = store
        .get_node(root_id)
        .await
        .map_err(|e| fetch_err(e.to_string()))?
        .filter(|n| !n.is_deleted)
        .ok_or_else(|| fetch_err(format!("root node {root_id} not found")))?;

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(root.id.clone());
    let mut levels = vec![vec![root]];

    loop {
        let Some(current) = levels.last() else { break };
        let mut next = Vec::new();
        for parent in current {
            let mut children = store
                .list_children(&parent.id)
                .await
                .map_err(|e| fetch_err(format!("listing children of {}: {e}", parent.id)))?;
            children.retain(|c| !c.is_deleted);
            sort_siblings(&mut children);
            for child in children {
                if seen.insert(child.id.clone()) {
                    next.push(child);
                } else {
                    tracing::warn!(node_id = %child.id, "node reached twice while loading hierarchy, skipping");
                }
            }
        }
        if next.is_empty() {
            break;
        }
        levels.push(next);
    }

    tracing::debug!(
        root_id,
        levels = levels.len(),
        nodes = levels.iter().map(Vec::len).sum::<usize>(),
        "hierarchy loaded"
    );
    Ok(levels)
}

/// Order siblings by position, then id.
pub(crate) fn sort_siblings(nodes: &mut [PromptNode]) {
    nodes.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::InMemoryPromptStore;
    use crate::errors::StoreError;
    use crate::types::{ActionOutcome, ResultUpdate};
    use async_trait::async_trait;

    fn ids(level: &[PromptNode]) -> Vec<&str> {
        level.iter().map(|n| n.id.as_str()).collect()
    }

    #[tokio::test]
    async fn levels_are_position_ordered() {
        let store = InMemoryPromptStore::new();
        store.insert(PromptNode::new("root", "Root")).await;
        store.insert(PromptNode::new("b", "B").with_parent("root", 2)).await;
        store.insert(PromptNode::new("a", "A").with_parent("root", 1)).await;
        store.insert(PromptNode::new("b1", "B1").with_parent("b", 0)).await;
        store.insert(PromptNode::new("a1", "A1").with_parent("a", 5)).await;
        store.insert(PromptNode::new("a0", "A0").with_parent("a", 0)).await;

        let levels = load_hierarchy(&store, "root").await.unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(ids(&levels[0]), vec!["root"]);
        assert_eq!(ids(&levels[1]), vec!["a", "b"]);
        // Parents in level order, then siblings by position.
        assert_eq!(ids(&levels[2]), vec!["a0", "a1", "b1"]);
    }

    #[tokio::test]
    async fn deleted_nodes_are_dropped_with_their_subtree() {
        let store = InMemoryPromptStore::new();
        store.insert(PromptNode::new("root", "Root")).await;
        let mut gone = PromptNode::new("gone", "Gone").with_parent("root", 0);
        gone.is_deleted = true;
        store.insert(gone).await;
        store.insert(PromptNode::new("orphan", "Orphan").with_parent("gone", 0)).await;

        let levels = load_hierarchy(&store, "root").await.unwrap();
        assert_eq!(levels.len(), 1);
    }

    #[tokio::test]
    async fn excluded_nodes_stay_in_the_hierarchy() {
        let store = InMemoryPromptStore::new();
        store.insert(PromptNode::new("root", "Root")).await;
        store
            .insert(PromptNode::new("x", "X").with_parent("root", 0).excluded())
            .await;
        let levels = load_hierarchy(&store, "root").await.unwrap();
        assert!(levels[1][0].exclude_from_cascade);
    }

    #[tokio::test]
    async fn missing_root_is_hierarchy_fetch_error() {
        let store = InMemoryPromptStore::new();
        let err = load_hierarchy(&store, "nope").await.unwrap_err();
        assert!(matches!(err, CascadeError::HierarchyFetch { .. }));
        assert!(err.is_fatal());
    }

    /// Fails `list_children` for one parent.
    struct FlakyStore {
        inner: InMemoryPromptStore,
        broken_parent: &'static str,
    }

    #[async_trait]
    impl PromptStore for FlakyStore {
        async fn get_node(&self, node_id: &str) -> Result<Option<PromptNode>, StoreError> {
            self.inner.get_node(node_id).await
        }
        async fn list_children(&self, parent_id: &str) -> Result<Vec<PromptNode>, StoreError> {
            if parent_id == self.broken_parent {
                return Err(StoreError::Store {
                    message: "connection reset".into(),
                });
            }
            self.inner.list_children(parent_id).await
        }
        async fn save_result(&self, node_id: &str, update: ResultUpdate) -> Result<(), StoreError> {
            self.inner.save_result(node_id, update).await
        }
        async fn save_action_outcome(
            &self,
            node_id: &str,
            outcome: ActionOutcome,
        ) -> Result<(), StoreError> {
            self.inner.save_action_outcome(node_id, outcome).await
        }
        async fn create_node(&self, node: PromptNode) -> Result<PromptNode, StoreError> {
            self.inner.create_node(node).await
        }
    }

    #[tokio::test]
    async fn mid_traversal_failure_fails_whole_load() {
        let inner = InMemoryPromptStore::new();
        inner.insert(PromptNode::new("root", "Root")).await;
        inner.insert(PromptNode::new("a", "A").with_parent("root", 0)).await;
        inner.insert(PromptNode::new("a1", "A1").with_parent("a", 0)).await;
        let store = FlakyStore {
            inner,
            broken_parent: "a",
        };
        let err = load_hierarchy(&store, "root").await.unwrap_err();
        match err {
            CascadeError::HierarchyFetch { node_id, message } => {
                assert_eq!(node_id, "root");
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn parent_cycle_terminates() {
        let store = InMemoryPromptStore::new();
        // "root" claims "a" as its parent and "a" is a child of "root".
        store.insert(PromptNode::new("root", "Root").with_parent("a", 0)).await;
        store.insert(PromptNode::new("a", "A").with_parent("root", 0)).await;
        let levels = load_hierarchy(&store, "root").await.unwrap();
        assert_eq!(levels.len(), 2);
    }
}
