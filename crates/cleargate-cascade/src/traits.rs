//! Collaborator interfaces for the cascade engine.
//!
//! The engine orchestrates; it does not store trees, run models, execute
//! side effects, or talk to humans. Each of those is a trait here, and every
//! trait has a default or no-op implementation in `defaults/` or below.
//! Adding a method to any trait requires a default implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::*;
use super::event::CascadeEvent;
use super::types::*;

// ---------------------------------------------------------------------------
// PromptStore
// ---------------------------------------------------------------------------

/// Persistence for the prompt tree.
///
/// Writes are field-scoped: [`save_result()`](Self::save_result) and
/// [`save_action_outcome()`](Self::save_action_outcome) must touch only the
/// fields they carry, so concurrent edits to other fields survive a run.
#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn get_node(&self, node_id: &str) -> Result<Option<PromptNode>, StoreError>;

    /// Direct, non-deleted children of `parent_id`, in any order.
    async fn list_children(&self, parent_id: &str) -> Result<Vec<PromptNode>, StoreError>;

    async fn save_result(&self, node_id: &str, update: ResultUpdate) -> Result<(), StoreError>;

    async fn save_action_outcome(
        &self,
        node_id: &str,
        outcome: ActionOutcome,
    ) -> Result<(), StoreError>;

    /// Insert a new node and return it as stored.
    async fn create_node(&self, node: PromptNode) -> Result<PromptNode, StoreError>;
}

// ---------------------------------------------------------------------------
// GenerationClient
// ---------------------------------------------------------------------------

/// Stream of decoded generation events for one call.
pub type GenerationStream = Pin<Box<dyn Stream<Item = GenerationEvent> + Send>>;

/// The remote generation service.
///
/// Implementations decode their wire payloads into [`GenerationEvent`]
/// (see [`GenerationEvent::decode`]) and end every stream with exactly one
/// terminal event. A stream that ends without one is treated as a transient
/// failure.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Open a streaming generation call.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationStream, ClientError>;

    /// Ask the service to stop server-side generation for `response_id`.
    /// Default: no-op.
    async fn cancel(&self, _response_id: &str) -> Result<(), ClientError> {
        Ok(())
    }

    /// Client name for diagnostics.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// ActionExecutor
// ---------------------------------------------------------------------------

/// Result of one post-action execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ActionResult {
    pub success: bool,
    pub created_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_parent_id: Option<String>,
    /// Nodes created by the action, as stored.
    #[serde(default)]
    pub children: Vec<PromptNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Interprets a node's structured output and performs a side effect.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute `action_id` for `node`. `data` is the validated value at the
    /// configured JSON path (an array).
    async fn execute(
        &self,
        node: &PromptNode,
        data: &Value,
        action_id: &str,
        config: &PostActionConfig,
        caller: &CallerIdentity,
    ) -> Result<ActionResult, ActionError>;
}

// ---------------------------------------------------------------------------
// TracingRecorder
// ---------------------------------------------------------------------------

/// What a successful attempt reports to its span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SpanOutcome {
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

/// Structured summary of a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorEvidence {
    pub code: String,
    pub message: String,
    pub attempt: u32,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Observability records: one trace per top-level cascade, one span per
/// generation attempt.
///
/// Best-effort: the engine logs any error returned here and carries on.
/// A recorder can never abort a run.
#[async_trait]
pub trait TracingRecorder: Send + Sync {
    async fn start_trace(&self, run_id: &str, root_node_id: &str) -> Result<String, TracingError>;

    /// `attempt` is 1-based and counts rate-limit retries. `previous_span_id`
    /// links retries of the same node.
    async fn create_span(
        &self,
        trace_id: &str,
        node_id: &str,
        attempt: u32,
        previous_span_id: Option<&str>,
    ) -> Result<String, TracingError>;

    async fn complete_span(&self, span_id: &str, outcome: &SpanOutcome)
        -> Result<(), TracingError>;

    async fn fail_span(&self, span_id: &str, evidence: &ErrorEvidence) -> Result<(), TracingError>;

    async fn complete_trace(&self, trace_id: &str, status: RunStatus) -> Result<(), TracingError>;
}

// ---------------------------------------------------------------------------
// Human prompts
// ---------------------------------------------------------------------------

/// Asks a human what to do after a node exhausted its retries.
///
/// May wait indefinitely; the engine never times it out. An error is
/// treated as [`RecoveryDecision::Stop`].
#[async_trait]
pub trait RecoveryPrompt: Send + Sync {
    async fn ask_recovery_decision(
        &self,
        run_id: &str,
        node: &PromptNode,
        error_message: &str,
    ) -> Result<RecoveryDecision, PromptError>;
}

/// Asks a human to confirm a post-action before the tree is mutated.
///
/// May wait indefinitely. An error is treated as a rejection.
#[async_trait]
pub trait ActionPreview: Send + Sync {
    async fn confirm_action(
        &self,
        run_id: &str,
        node: &PromptNode,
        data: &Value,
        config: &PostActionConfig,
    ) -> Result<bool, PromptError>;
}

// ---------------------------------------------------------------------------
// CascadeObserver
// ---------------------------------------------------------------------------

/// Receives every state transition of a run as it happens.
///
/// Called inline on the orchestrator task; implementations must not block.
pub trait CascadeObserver: Send + Sync {
    fn on_event(&self, event: &CascadeEvent);
}

// ---------------------------------------------------------------------------
// No-op implementations (useful for tests)
// ---------------------------------------------------------------------------

/// Tracing recorder that discards everything.
pub struct NoopTracing;

#[async_trait]
impl TracingRecorder for NoopTracing {
    async fn start_trace(&self, run_id: &str, _root_node_id: &str) -> Result<String, TracingError> {
        Ok(run_id.to_string())
    }

    async fn create_span(
        &self,
        trace_id: &str,
        node_id: &str,
        attempt: u32,
        _previous_span_id: Option<&str>,
    ) -> Result<String, TracingError> {
        Ok(format!("{trace_id}:{node_id}:{attempt}"))
    }

    async fn complete_span(
        &self,
        _span_id: &str,
        _outcome: &SpanOutcome,
    ) -> Result<(), TracingError> {
        Ok(())
    }

    async fn fail_span(
        &self,
        _span_id: &str,
        _evidence: &ErrorEvidence,
    ) -> Result<(), TracingError> {
        Ok(())
    }

    async fn complete_trace(&self, _trace_id: &str, _status: RunStatus) -> Result<(), TracingError> {
        Ok(())
    }
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl CascadeObserver for NoopObserver {
    fn on_event(&self, _event: &CascadeEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_tracing_returns_ids() {
        let noop = NoopTracing;
        let trace = noop.start_trace("run-1", "root").await.unwrap();
        assert_eq!(trace, "run-1");
        let span = noop.create_span(&trace, "n1", 2, None).await.unwrap();
        assert_eq!(span, "run-1:n1:2");
        noop.complete_span(&span, &SpanOutcome::default())
            .await
            .unwrap();
        noop.complete_trace(&trace, RunStatus::Completed)
            .await
            .unwrap();
    }
}
