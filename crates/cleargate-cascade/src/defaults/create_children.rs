//! Built-in `create_children` post-action.
//!
//! Creates one child node per array element under the target parent
//! (default: the originating node), positioned after existing children.
//!
//! Element shapes:
//! - string: becomes the child's user text; the first line names it
//! - object: `name`/`title` name the child, `content`/`prompt`/`message`
//!   become its user text (else the object itself, as JSON), and a
//!   `variables` object of strings is copied onto the child
//! - anything else: its JSON text becomes the user text
//!
//! Creation is not atomic. If the store fails partway, the nodes already
//! created are kept and returned in a failed [`ActionResult`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::ActionError;
use crate::traits::{ActionExecutor, ActionResult, PromptStore};
use crate::types::{CallerIdentity, PostActionConfig, PromptNode};

/// Action id handled by [`CreateChildrenAction`].
pub const CREATE_CHILDREN: &str = "create_children";

const MAX_DERIVED_NAME_CHARS: usize = 80;

pub struct CreateChildrenAction {
    store: Arc<dyn PromptStore>,
}

impl CreateChildrenAction {
    pub fn new(store: Arc<dyn PromptStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActionExecutor for CreateChildrenAction {
    async fn execute(
        &self,
        node: &PromptNode,
        data: &Value,
        action_id: &str,
        config: &PostActionConfig,
        caller: &CallerIdentity,
    ) -> Result<ActionResult, ActionError> {
        if action_id != CREATE_CHILDREN {
            return Err(ActionError::UnknownAction {
                action_id: action_id.to_string(),
            });
        }
        let items = data.as_array().ok_or_else(|| ActionError::InvalidInput {
            message: "create_children expects an array".into(),
        })?;

        let target_parent_id = config
            .target_parent_id
            .clone()
            .unwrap_or_else(|| node.id.clone());
        let next_position = self
            .store
            .list_children(&target_parent_id)
            .await?
            .iter()
            .map(|c| c.position + 1)
            .max()
            .unwrap_or(0);

        let mut children = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let child = child_from_item(item, i, &target_parent_id, next_position + i as i64, config);
            match self.store.create_node(child).await {
                Ok(created) => children.push(created),
                // Nodes already written stay written; report them with the failure.
                Err(e) => {
                    tracing::warn!(
                        node_id = %node.id,
                        target_parent_id = %target_parent_id,
                        created = children.len(),
                        requested = items.len(),
                        error = %e,
                        "child creation stopped partway"
                    );
                    return Ok(ActionResult {
                        success: false,
                        created_count: children.len() as u32,
                        target_parent_id: Some(target_parent_id),
                        message: Some(format!(
                            "created {} of {} child nodes",
                            children.len(),
                            items.len()
                        )),
                        children,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        tracing::debug!(
            node_id = %node.id,
            target_parent_id = %target_parent_id,
            created = children.len(),
            user_id = %caller.user_id,
            "created child nodes"
        );
        Ok(ActionResult {
            success: true,
            created_count: children.len() as u32,
            target_parent_id: Some(target_parent_id),
            message: Some(format!("created {} child nodes", children.len())),
            children,
            error: None,
        })
    }
}

fn child_from_item(
    item: &Value,
    index: usize,
    parent_id: &str,
    position: i64,
    config: &PostActionConfig,
) -> PromptNode {
    let fallback_name = format!("Item {}", index + 1);
    let mut child = match item {
        Value::String(text) => {
            PromptNode::new(Uuid::new_v4().to_string(), derive_name(text, &fallback_name))
                .with_user_prompt(text.clone())
        }
        Value::Object(obj) => {
            let name = first_string(obj, &["name", "title"]).unwrap_or(&fallback_name);
            let text = first_string(obj, &["content", "prompt", "message"])
                .map(str::to_string)
                .unwrap_or_else(|| item.to_string());
            let mut child =
                PromptNode::new(Uuid::new_v4().to_string(), name).with_user_prompt(text);
            if let Some(Value::Object(vars)) = obj.get("variables") {
                for (key, value) in vars {
                    if let Some(value) = value.as_str() {
                        child.variables.insert(key.clone(), value.to_string());
                    }
                }
            }
            child
        }
        other => PromptNode::new(Uuid::new_v4().to_string(), fallback_name)
            .with_user_prompt(other.to_string()),
    };
    child.parent_id = Some(parent_id.to_string());
    child.position = position;

    if let Some(template) = &config.child_template {
        child.node_type = template.node_type;
        child.post_action = template.post_action.clone();
        child.post_action_config = template
            .post_action_config
            .as_deref()
            .cloned()
            .unwrap_or_default();
        child.auto_run_children = template.auto_run_children;
    }
    child
}

fn first_string<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
}

fn derive_name(text: &str, fallback: &str) -> String {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty());
    match line {
        Some(line) => line.chars().take(MAX_DERIVED_NAME_CHARS).collect(),
        None => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::InMemoryPromptStore;
    use crate::test_support::LimitedCreateStore;
    use crate::types::{ChildTemplate, NodeType};
    use serde_json::json;

    fn action(store: &InMemoryPromptStore) -> CreateChildrenAction {
        CreateChildrenAction::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn creates_children_after_existing_ones() {
        let store = InMemoryPromptStore::new();
        let parent = PromptNode::new("p", "Parent");
        store.insert(parent.clone()).await;
        store
            .insert(PromptNode::new("old", "Old").with_parent("p", 4))
            .await;

        let data = json!([
            "Write the intro\nwith detail",
            {"title": "Body", "prompt": "Write the body", "variables": {"tone": "dry", "n": 3}},
            {"misc": true},
            7
        ]);
        let result = action(&store)
            .execute(
                &parent,
                &data,
                CREATE_CHILDREN,
                &PostActionConfig::default(),
                &CallerIdentity::default(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.created_count, 4);
        assert_eq!(result.target_parent_id.as_deref(), Some("p"));

        let c = &result.children;
        assert_eq!(c[0].name, "Write the intro");
        assert_eq!(c[0].user_prompt, "Write the intro\nwith detail");
        assert_eq!(c[0].position, 5);
        assert_eq!(c[1].name, "Body");
        assert_eq!(c[1].user_prompt, "Write the body");
        assert_eq!(c[1].variables.get("tone").map(String::as_str), Some("dry"));
        assert!(!c[1].variables.contains_key("n"));
        assert_eq!(c[2].name, "Item 3");
        assert_eq!(c[2].user_prompt, r#"{"misc":true}"#);
        assert_eq!(c[3].user_prompt, "7");
        assert_eq!(c[3].position, 8);

        assert_eq!(store.children_of("p").await.len(), 5);
    }

    #[tokio::test]
    async fn template_shapes_children() {
        let store = InMemoryPromptStore::new();
        let parent = PromptNode::new("p", "Parent");
        store.insert(parent.clone()).await;
        let config = PostActionConfig {
            target_parent_id: Some("elsewhere".into()),
            child_template: Some(ChildTemplate {
                node_type: NodeType::Action,
                post_action: Some(CREATE_CHILDREN.into()),
                post_action_config: Some(Box::new(PostActionConfig {
                    json_path: Some("items".into()),
                    ..PostActionConfig::default()
                })),
                auto_run_children: true,
            }),
            ..PostActionConfig::default()
        };

        let result = action(&store)
            .execute(
                &parent,
                &json!(["one"]),
                CREATE_CHILDREN,
                &config,
                &CallerIdentity::default(),
            )
            .await
            .unwrap();
        let child = &result.children[0];
        assert_eq!(child.parent_id.as_deref(), Some("elsewhere"));
        assert!(child.has_post_action());
        assert!(child.auto_run_children);
        assert_eq!(child.post_action_config.json_path.as_deref(), Some("items"));
    }

    #[tokio::test]
    async fn rejects_unknown_action_and_non_arrays() {
        let store = InMemoryPromptStore::new();
        let parent = PromptNode::new("p", "Parent");
        let caller = CallerIdentity::default();
        let config = PostActionConfig::default();

        let err = action(&store)
            .execute(&parent, &json!([]), "send_email", &config, &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::UnknownAction { .. }));

        let err = action(&store)
            .execute(&parent, &json!({"a": 1}), CREATE_CHILDREN, &config, &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn store_failure_keeps_children_already_created() {
        let inner = InMemoryPromptStore::new();
        let parent = PromptNode::new("p", "Parent");
        inner.insert(parent.clone()).await;
        let store = LimitedCreateStore::new(inner.clone(), 2);

        let result = CreateChildrenAction::new(Arc::new(store))
            .execute(
                &parent,
                &json!(["one", "two", "three"]),
                CREATE_CHILDREN,
                &PostActionConfig::default(),
                &CallerIdentity::default(),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.created_count, 2);
        assert_eq!(result.children.len(), 2);
        assert_eq!(result.target_parent_id.as_deref(), Some("p"));
        assert!(result.error.unwrap().contains("node quota reached"));
        assert_eq!(inner.children_of("p").await.len(), 2);
    }
}
