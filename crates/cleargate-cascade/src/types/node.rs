//! Prompt tree nodes, post-action configuration, and result records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::generation::TokenUsage;

// ---------------------------------------------------------------------------
// PromptNode
// ---------------------------------------------------------------------------

/// Behavioural kind of a prompt node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum NodeType {
    #[default]
    Normal,
    /// Output is interpreted as structured data driving a post-action.
    Action,
}

/// A single prompt in the tree.
///
/// Children are discovered through `parent_id`; nodes never hold references
/// to each other. The engine writes only the result fields
/// (`output_response`, `extracted_json`, `last_action_result`) and never
/// deletes nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct PromptNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub name: String,
    /// Admin-facing instruction text.
    #[serde(default)]
    pub admin_prompt: String,
    /// User-facing message text. Sent in preference to `admin_prompt`.
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub exclude_from_cascade: bool,
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_action: Option<String>,
    #[serde(default)]
    pub post_action_config: PostActionConfig,
    #[serde(default)]
    pub auto_run_children: bool,
    /// Node-scoped stored variables. Win over context-level variables.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_result: Option<ActionOutcome>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl PromptNode {
    /// A normal node with the given id and name and every other field defaulted.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            position: 0,
            name: name.into(),
            admin_prompt: String::new(),
            user_prompt: String::new(),
            note: String::new(),
            exclude_from_cascade: false,
            node_type: NodeType::Normal,
            post_action: None,
            post_action_config: PostActionConfig::default(),
            auto_run_children: false,
            variables: BTreeMap::new(),
            output_response: None,
            extracted_json: None,
            last_action_result: None,
            is_deleted: false,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>, position: i64) -> Self {
        self.parent_id = Some(parent_id.into());
        self.position = position;
        self
    }

    pub fn with_user_prompt(mut self, text: impl Into<String>) -> Self {
        self.user_prompt = text.into();
        self
    }

    pub fn with_admin_prompt(mut self, text: impl Into<String>) -> Self {
        self.admin_prompt = text.into();
        self
    }

    pub fn excluded(mut self) -> Self {
        self.exclude_from_cascade = true;
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Turn this node into an action node running `action_id` after generation.
    pub fn with_post_action(
        mut self,
        action_id: impl Into<String>,
        config: PostActionConfig,
        auto_run_children: bool,
    ) -> Self {
        self.node_type = NodeType::Action;
        self.post_action = Some(action_id.into());
        self.post_action_config = config;
        self.auto_run_children = auto_run_children;
        self
    }

    /// Action node with a configured post-action.
    pub fn has_post_action(&self) -> bool {
        self.node_type == NodeType::Action
            && self.post_action.as_deref().is_some_and(|a| !a.trim().is_empty())
    }

    /// The message sent to the generation service: user text, else admin
    /// text, else `fallback`. Never empty.
    pub fn outbound_message(&self, fallback: &str) -> String {
        if !self.user_prompt.trim().is_empty() {
            self.user_prompt.clone()
        } else if !self.admin_prompt.trim().is_empty() {
            self.admin_prompt.clone()
        } else if !fallback.trim().is_empty() {
            fallback.to_string()
        } else {
            "Execute this prompt".to_string()
        }
    }

    /// Name used in history and diagnostics; falls back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

// ---------------------------------------------------------------------------
// Post-action configuration
// ---------------------------------------------------------------------------

/// Options for a node's post-action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct PostActionConfig {
    /// Dotted path to the array inside the extracted JSON, e.g. `data.items`
    /// or `sections[0].children`. Empty means the document root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    /// Skip the human preview for this node.
    #[serde(default)]
    pub skip_preview: bool,
    /// Parent for created children. Defaults to the originating node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_parent_id: Option<String>,
    /// Shape of the nodes an action creates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_template: Option<ChildTemplate>,
    /// Action-specific options not covered above.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Behaviour stamped onto nodes created by an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct ChildTemplate {
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_action_config: Option<Box<PostActionConfig>>,
    #[serde(default)]
    pub auto_run_children: bool,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Terminal status of a post-action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ActionStatus {
    Success,
    Failed,
    Cancelled,
}

/// Outcome of a post-action, recorded on the originating node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct ActionOutcome {
    pub status: ActionStatus,
    #[serde(default)]
    pub created_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Array paths present in the extracted data, reported when the
    /// configured path did not resolve to an array.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_paths: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failed,
            created_count: 0,
            target_parent_id: None,
            message: None,
            error: Some(error.into()),
            available_paths: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Cancelled,
            created_count: 0,
            target_parent_id: None,
            message: Some(message.into()),
            error: None,
            available_paths: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// The result fields the engine owns on a node. Stores apply exactly these
/// fields and leave everything else untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct ResultUpdate {
    pub output_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}
