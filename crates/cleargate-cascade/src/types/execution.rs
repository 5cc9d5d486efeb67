//! Run identity, history, progress, and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node::ActionOutcome;
use crate::engine::CascadeError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Unique identifier for one cascade run. Always a UUID v4.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The user a run is executed on behalf of.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct CallerIdentity {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl CallerIdentity {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Lifecycle state of a cascade run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum RunStatus {
    #[default]
    Idle,
    LoadingHierarchy,
    Running,
    Paused,
    Completed,
    Cancelled,
    /// The operator chose `stop` after a node exhausted its retries.
    Stopped,
    /// Unconditionally fatal error (hierarchy fetch, quota exhaustion).
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Stopped | Self::Failed
        )
    }
}

/// Operator decision after a node exhausted its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum RecoveryDecision {
    /// Abort the cascade, keeping results produced so far.
    Stop,
    /// Record a `[SKIPPED: …]` history entry and move on.
    Skip,
    /// Reset the retry budget and try the node again.
    Retry,
}

/// One completed (or operator-skipped) node in the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct HistoryEntry {
    pub level: u32,
    pub node_id: String,
    pub node_name: String,
    pub response_text: String,
    #[serde(default)]
    pub skipped: bool,
}

/// Point-in-time view of a run's progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct CascadeProgress {
    pub status: RunStatus,
    pub total_levels: u32,
    /// Runnable nodes. Excluded nodes and the context root are not counted.
    pub total_prompts: u32,
    pub current_level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    /// Nodes that reached a terminal outcome, whatever it was.
    pub completed_prompts: u32,
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct CascadeSummary {
    pub completed: u32,
    /// Nodes the operator skipped after exhausted retries.
    pub skipped: u32,
    /// Nodes flagged out of the cascade.
    pub excluded: u32,
    /// Times a node exhausted its retry budget and went to the operator.
    pub failed: u32,
    pub action_failures: u32,
    pub child_nodes_executed: u32,
    pub depth_limit_hits: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Result of running one batch of action-created children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct ChildCascadeReport {
    pub parent_node_id: String,
    pub depth: u32,
    pub executed: u32,
    pub skipped: u32,
    pub failed: u32,
    /// This batch, or a batch below it, hit the depth bound.
    pub depth_limit_reached: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<ChildCascadeReport>,
}

impl ChildCascadeReport {
    pub fn new(parent_node_id: impl Into<String>, depth: u32) -> Self {
        Self {
            parent_node_id: parent_node_id.into(),
            depth,
            ..Default::default()
        }
    }

    /// Nodes executed in this batch and every nested batch.
    pub fn total_executed(&self) -> u32 {
        self.executed + self.nested.iter().map(Self::total_executed).sum::<u32>()
    }

    /// Deepest depth at which children actually ran.
    pub fn deepest_executed(&self) -> u32 {
        let own = if self.executed > 0 { self.depth } else { 0 };
        self.nested
            .iter()
            .map(Self::deepest_executed)
            .fold(own, u32::max)
    }
}

/// Final report of a cascade run. Produced for every terminal state so
/// partial results are never lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct CascadeReport {
    pub run_id: String,
    pub root_node_id: String,
    pub status: RunStatus,
    pub history: Vec<HistoryEntry>,
    pub summary: CascadeSummary,
    /// Nodes marked skipped without a generation call.
    pub excluded_node_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_cascades: Vec<ChildCascadeReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CascadeError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of running a single node outside a cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct NodeRunReport {
    pub run_id: String,
    pub node_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_cascade: Option<ChildCascadeReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CascadeError>,
}
