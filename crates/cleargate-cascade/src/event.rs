//! The single event type for every observable cascade state transition.
//!
//! Each event carries a per-run monotonic `seq` so observers can order
//! events that arrive through different channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::CascadeError;
use crate::types::{
    ActionOutcome, CascadeSummary, ChildCascadeReport, RecoveryDecision, TokenUsage,
};

/// Envelope shared by all events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct CascadeEvent {
    pub seq: u64,
    pub schema_version: u16,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: CascadeEventKind,
}

/// Why a node was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `exclude_from_cascade` is set. No generation call is made.
    Excluded,
    /// The operator chose `skip` after retries were exhausted.
    Operator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case", tag = "event_type")]
#[non_exhaustive]
pub enum CascadeEventKind {
    CascadeStarted {
        root_node_id: String,
        total_levels: u32,
        total_prompts: u32,
    },
    CascadePaused,
    CascadeResumed,
    NodeStarted {
        node_id: String,
        node_name: String,
        level: u32,
        /// 0 for nodes of the loaded hierarchy, N for action-created children.
        depth: u32,
        attempt: u32,
    },
    /// Advisory streaming progress.
    GenerationProgress {
        node_id: String,
        received_chars: usize,
    },
    NodeRetrying {
        node_id: String,
        attempt: u32,
        error: String,
        backoff_ms: u64,
    },
    RateLimited {
        node_id: String,
        wait_ms: u64,
        wait_count: u32,
    },
    RecoveryRequested {
        node_id: String,
        error: String,
    },
    RecoveryDecided {
        node_id: String,
        decision: RecoveryDecision,
    },
    NodeCompleted {
        node_id: String,
        node_name: String,
        level: u32,
        depth: u32,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    NodeSkipped {
        node_id: String,
        node_name: String,
        level: u32,
        reason: SkipReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    NodeFailed {
        node_id: String,
        error: CascadeError,
    },
    ActionPreviewRequested {
        node_id: String,
        action_id: String,
        item_count: usize,
    },
    ActionCompleted {
        node_id: String,
        action_id: String,
        outcome: ActionOutcome,
        /// Why the action did not complete, when it did not.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CascadeError>,
    },
    ChildCascadeStarted {
        parent_node_id: String,
        depth: u32,
        child_count: usize,
    },
    ChildCascadeCompleted {
        report: ChildCascadeReport,
    },
    DepthLimitReached {
        parent_node_id: String,
        depth: u32,
        max_depth: u32,
    },
    CascadeCompleted {
        summary: CascadeSummary,
        duration_ms: u64,
    },
    CascadeCancelled {
        summary: CascadeSummary,
    },
    CascadeStopped {
        node_id: String,
        summary: CascadeSummary,
    },
    CascadeFailed {
        error: CascadeError,
        summary: CascadeSummary,
    },
}

impl CascadeEventKind {
    /// Events that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CascadeCompleted { .. }
                | Self::CascadeCancelled { .. }
                | Self::CascadeStopped { .. }
                | Self::CascadeFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_flattens_kind_tag() {
        let event = CascadeEvent {
            seq: 3,
            schema_version: crate::types::CASCADE_EVENT_SCHEMA_VERSION,
            run_id: "run-1".into(),
            timestamp: Utc::now(),
            kind: CascadeEventKind::RateLimited {
                node_id: "n1".into(),
                wait_ms: 2_000,
                wait_count: 1,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "rate_limited");
        assert_eq!(json["wait_ms"], 2_000);
        assert_eq!(json["seq"], 3);

        let back: CascadeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn terminal_kinds() {
        assert!(CascadeEventKind::CascadeCancelled {
            summary: CascadeSummary::default()
        }
        .is_terminal());
        assert!(!CascadeEventKind::CascadePaused.is_terminal());
    }
}
