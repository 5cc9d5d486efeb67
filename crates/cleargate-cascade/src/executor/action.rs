//! Post-action integration: extract, validate, preview, execute, record.
//!
//! Nothing here fails the run. Every failure becomes an [`ActionOutcome`]
//! on the originating node and the cascade moves on.

use chrono::Utc;
use serde_json::Value;

use super::{RunContext, RunState};
use crate::engine::CascadeError;
use crate::event::CascadeEventKind;
use crate::extract::{resolve_array, ExtractError};
use crate::types::*;

pub(super) struct ActionRun {
    pub outcome: ActionOutcome,
    /// Nodes the action created, as stored.
    pub children: Vec<PromptNode>,
    pub error: Option<CascadeError>,
}

impl ActionRun {
    fn failed(outcome: ActionOutcome, error: CascadeError) -> Self {
        Self {
            outcome,
            children: Vec::new(),
            error: Some(error),
        }
    }
}

/// Run `node`'s post-action over its extracted output.
pub(super) async fn run_post_action(
    ctx: &RunContext,
    state: &mut RunState,
    node: &PromptNode,
    extracted: Option<Result<Value, ExtractError>>,
) -> ActionRun {
    let action_id = node.post_action.clone().unwrap_or_default();
    let run = attempt_action(ctx, node, &action_id, extracted).await;

    if let Some(error) = &run.error {
        tracing::warn!(node_id = %node.id, action_id = %action_id, error = %error, "post-action did not complete");
    }
    if run.outcome.status == ActionStatus::Failed {
        state.summary.action_failures += 1;
    }
    if let Err(e) = ctx
        .collab
        .store
        .save_action_outcome(&node.id, run.outcome.clone())
        .await
    {
        tracing::warn!(node_id = %node.id, error = %e, "failed to persist action outcome");
    }
    ctx.events.emit(CascadeEventKind::ActionCompleted {
        node_id: node.id.clone(),
        action_id,
        outcome: run.outcome.clone(),
        error: run.error.clone(),
    });
    run
}

async fn attempt_action(
    ctx: &RunContext,
    node: &PromptNode,
    action_id: &str,
    extracted: Option<Result<Value, ExtractError>>,
) -> ActionRun {
    let config = &node.post_action_config;

    let document = match extracted.unwrap_or(Err(ExtractError::NoJson)) {
        Ok(document) => document,
        Err(e) => {
            return ActionRun::failed(
                ActionOutcome::failed(e.to_string()),
                CascadeError::ActionParse {
                    node_id: node.id.clone(),
                    message: e.to_string(),
                },
            )
        }
    };

    let path = config.json_path.as_deref().unwrap_or_default();
    let data = match resolve_array(&document, path) {
        Ok(data) => data,
        Err(e) => {
            let mut outcome = ActionOutcome::failed(e.to_string());
            outcome.available_paths = e.available_paths().to_vec();
            let error = CascadeError::ActionValidation {
                node_id: node.id.clone(),
                message: e.to_string(),
                available_paths: outcome.available_paths.clone(),
            };
            return ActionRun::failed(outcome, error);
        }
    };

    if !(ctx.config.skip_action_previews || config.skip_preview)
        && !confirm(ctx, node, action_id, data).await
    {
        return ActionRun::failed(
            ActionOutcome::cancelled("action cancelled by user"),
            CascadeError::ActionCancelledByUser {
                node_id: node.id.clone(),
            },
        );
    }

    match ctx
        .collab
        .actions
        .execute(node, data, action_id, config, &ctx.caller)
        .await
    {
        Ok(result) if result.success => ActionRun {
            outcome: ActionOutcome {
                status: ActionStatus::Success,
                created_count: result.created_count,
                target_parent_id: result
                    .target_parent_id
                    .or_else(|| config.target_parent_id.clone())
                    .or_else(|| Some(node.id.clone())),
                message: result.message,
                error: None,
                available_paths: Vec::new(),
                timestamp: Utc::now(),
            },
            children: result.children,
            error: None,
        },
        Ok(result) => {
            let message = result
                .error
                .unwrap_or_else(|| format!("action {action_id} reported failure"));
            let error = execution_error(node, action_id, &message);
            let mut outcome = ActionOutcome::failed(message);
            outcome.created_count = result.created_count;
            outcome.target_parent_id = result.target_parent_id;
            outcome.message = result.message;
            // Nodes created before the failure are real; they still run.
            ActionRun {
                outcome,
                children: result.children,
                error: Some(error),
            }
        }
        Err(e) => {
            let message = e.to_string();
            ActionRun::failed(
                ActionOutcome::failed(message.clone()),
                execution_error(node, action_id, &message),
            )
        }
    }
}

fn execution_error(node: &PromptNode, action_id: &str, message: &str) -> CascadeError {
    CascadeError::ActionExecution {
        node_id: node.id.clone(),
        action_id: action_id.to_string(),
        message: message.to_string(),
    }
}

/// Ask for confirmation. Errors and cancellation count as rejection.
async fn confirm(ctx: &RunContext, node: &PromptNode, action_id: &str, data: &Value) -> bool {
    ctx.events.emit(CascadeEventKind::ActionPreviewRequested {
        node_id: node.id.clone(),
        action_id: action_id.to_string(),
        item_count: data.as_array().map(Vec::len).unwrap_or(0),
    });
    let answer = tokio::select! {
        biased;
        _ = ctx.control.cancelled() => return false,
        answer = ctx.collab.preview.confirm_action(&ctx.run_id, node, data, &node.post_action_config) => answer,
    };
    answer.unwrap_or_else(|e| {
        tracing::warn!(node_id = %node.id, error = %e, "action preview failed, treating as rejected");
        false
    })
}
