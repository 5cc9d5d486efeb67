//! Cascade error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every way a cascade, or a node within it, can fail.
///
/// Only [`HierarchyFetch`](Self::HierarchyFetch) and
/// [`QuotaExhausted`](Self::QuotaExhausted) end a run unconditionally.
/// Action and depth errors are recorded on the node and the run continues.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case", tag = "kind")]
#[non_exhaustive]
pub enum CascadeError {
    /// The tree could not be read. Nothing ran.
    #[error("failed to load hierarchy under {node_id}: {message}")]
    HierarchyFetch { node_id: String, message: String },
    /// Rate-limit waits for one node exceeded the configured cap.
    #[error("rate limit persisted on node {node_id} after {waits} waits")]
    RateLimit { node_id: String, waits: u32 },
    /// Generation failed on every attempt of the retry budget.
    #[error("generation failed on node {node_id} after {attempts} attempts: {message}")]
    Generation {
        node_id: String,
        attempts: u32,
        message: String,
    },
    /// The service reported exhausted quota. Always fatal.
    #[error("generation quota exhausted on node {node_id}: {message}")]
    QuotaExhausted { node_id: String, message: String },
    #[error("could not extract structured data from node {node_id}: {message}")]
    ActionParse { node_id: String, message: String },
    #[error("extracted data on node {node_id} failed validation: {message}")]
    ActionValidation {
        node_id: String,
        message: String,
        available_paths: Vec<String>,
    },
    /// The action executor failed or reported failure.
    #[error("post-action {action_id} failed on node {node_id}: {message}")]
    ActionExecution {
        node_id: String,
        action_id: String,
        message: String,
    },
    #[error("action on node {node_id} was cancelled by the user")]
    ActionCancelledByUser { node_id: String },
    #[error("child cascade under {node_id} reached depth limit {max_depth}")]
    DepthLimitReached { node_id: String, max_depth: u32 },
    /// The operator chose to stop after node retries were exhausted.
    #[error("cascade stopped by operator at node {node_id}")]
    Stopped { node_id: String },
    /// A collaborator could not complete a write the run depends on.
    #[error("prompt store error: {message}")]
    Store { message: String },
    #[error("build error: {message}")]
    Build { message: String },
    /// The run task panicked or was aborted before producing a report.
    #[error("cascade task ended abnormally: {message}")]
    Aborted { message: String },
}

impl From<crate::errors::StoreError> for CascadeError {
    fn from(e: crate::errors::StoreError) -> Self {
        Self::Store {
            message: e.to_string(),
        }
    }
}

impl CascadeError {
    /// Whether this error ends the run regardless of operator input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HierarchyFetch { .. } | Self::QuotaExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_hierarchy_and_quota_are_fatal() {
        assert!(CascadeError::HierarchyFetch {
            node_id: "r".into(),
            message: "gone".into()
        }
        .is_fatal());
        assert!(CascadeError::QuotaExhausted {
            node_id: "n".into(),
            message: "empty".into()
        }
        .is_fatal());
        assert!(!CascadeError::DepthLimitReached {
            node_id: "n".into(),
            max_depth: 3
        }
        .is_fatal());
        assert!(!CascadeError::RateLimit {
            node_id: "n".into(),
            waits: 12
        }
        .is_fatal());
    }

    #[test]
    fn serializes_with_kind_tag() {
        let err = CascadeError::Stopped {
            node_id: "n1".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "stopped");
        assert_eq!(json["node_id"], "n1");
    }
}
