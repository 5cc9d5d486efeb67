//! Error types for all collaborator trait operations.

use thiserror::Error;

/// Errors from [`PromptStore`](super::traits::PromptStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("prompt node not found: {id}")]
    NotFound { id: String },
    #[error("prompt store error: {message}")]
    Store { message: String },
}

/// Errors from [`GenerationClient`](super::traits::GenerationClient) that
/// prevent a stream from being opened at all.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("generation transport error: {message}")]
    Transport { message: String },
    #[error("generation request rejected: {message}")]
    Rejected { message: String },
}

/// Errors from [`ActionExecutor`](super::traits::ActionExecutor).
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown post-action: {action_id}")]
    UnknownAction { action_id: String },
    #[error("invalid action input: {message}")]
    InvalidInput { message: String },
    #[error("action store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from [`TracingRecorder`](super::traits::TracingRecorder).
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("tracing backend error: {message}")]
    Backend { message: String },
}

/// Errors from [`RecoveryPrompt`](super::traits::RecoveryPrompt) and
/// [`ActionPreview`](super::traits::ActionPreview).
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("human prompt closed without an answer")]
    Closed,
    #[error("human prompt already pending for run={run_id} node={node_id}")]
    AlreadyPending { run_id: String, node_id: String },
    #[error("no human prompt pending for run={run_id} node={node_id}")]
    NotPending { run_id: String, node_id: String },
}
