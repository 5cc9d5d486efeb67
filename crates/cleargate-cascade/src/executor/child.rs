//! Child cascade driver.
//!
//! Runs the nodes a post-action created, depth first: each child's own
//! action may create grandchildren, which run before the next child.
//! Children inherit their parent's resolved variables and never touch the
//! outer run's history.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use super::action::run_post_action;
use super::node::{
    generate_node, record_excluded, record_operator_skip, record_success, GenerationOutcome,
    NodePlace,
};
use super::{checkpoint, Halt, RunContext, RunState};
use crate::event::CascadeEventKind;
use crate::extract::ExtractError;
use crate::hierarchy::sort_siblings;
use crate::types::*;
use crate::variables::{inherit_variables, Variables};

/// What happened after a node's generation succeeded.
#[derive(Default)]
pub(super) struct FollowUp {
    pub action: Option<ActionOutcome>,
    pub child_report: Option<ChildCascadeReport>,
    pub halt: Option<Halt>,
}

/// Run `node`'s post-action and, if it auto-runs children, drive them.
pub(super) async fn follow_up(
    ctx: &RunContext,
    state: &mut RunState,
    node: &PromptNode,
    place: NodePlace,
    variables: &Variables,
    extracted: Option<Result<Value, ExtractError>>,
) -> FollowUp {
    if !node.has_post_action() {
        return FollowUp::default();
    }
    let run = run_post_action(ctx, state, node, extracted).await;
    let mut follow_up = FollowUp {
        action: Some(run.outcome),
        ..FollowUp::default()
    };
    if node.auto_run_children && !run.children.is_empty() {
        let batch = run_children(
            ctx,
            state,
            node,
            place.level,
            variables,
            run.children,
            place.depth + 1,
        )
        .await;
        follow_up.child_report = Some(batch.report);
        follow_up.halt = batch.halt;
    }
    follow_up
}

pub(super) struct ChildBatch {
    pub report: ChildCascadeReport,
    pub halt: Option<Halt>,
}

/// Execute one batch of action-created children at `depth`.
///
/// A batch deeper than `max_child_depth` does not run; it is reported with
/// `depth_limit_reached` and the rest of the run carries on.
pub(super) fn run_children<'a>(
    ctx: &'a RunContext,
    state: &'a mut RunState,
    parent: &'a PromptNode,
    parent_level: u32,
    parent_vars: &'a Variables,
    mut children: Vec<PromptNode>,
    depth: u32,
) -> BoxFuture<'a, ChildBatch> {
    async move {
        let mut report = ChildCascadeReport::new(&parent.id, depth);
        let max_depth = ctx.config.max_child_depth;

        if depth > max_depth {
            tracing::warn!(
                parent_node_id = %parent.id,
                depth,
                max_depth,
                "child cascade depth limit reached"
            );
            state.summary.depth_limit_hits += 1;
            report.depth_limit_reached = true;
            ctx.events.emit(CascadeEventKind::DepthLimitReached {
                parent_node_id: parent.id.clone(),
                depth,
                max_depth,
            });
            return ChildBatch { report, halt: None };
        }

        sort_siblings(&mut children);
        ctx.events.emit(CascadeEventKind::ChildCascadeStarted {
            parent_node_id: parent.id.clone(),
            depth,
            child_count: children.len(),
        });

        let place = NodePlace {
            level: parent_level + 1,
            depth,
        };
        let mut halt = None;
        for child in &children {
            if let Err(h) = checkpoint(ctx).await {
                halt = Some(h);
                break;
            }
            if child.exclude_from_cascade {
                record_excluded(ctx, state, child, place.level);
                continue;
            }

            let build = |_: &RunState| {
                inherit_variables(parent_vars, child, parent.display_name(), Utc::now())
            };
            match generate_node(ctx, state, child, place, &build).await {
                GenerationOutcome::Completed {
                    output,
                    duration_ms,
                    variables: vars,
                } => {
                    let extracted =
                        record_success(ctx, state, child, place, &output, duration_ms).await;
                    report.executed += 1;
                    state.summary.child_nodes_executed += 1;

                    let next = follow_up(ctx, state, child, place, &vars, extracted).await;
                    if let Some(nested) = next.child_report {
                        report.depth_limit_reached |= nested.depth_limit_reached;
                        report.nested.push(nested);
                    }
                    if next.halt.is_some() {
                        halt = next.halt;
                        break;
                    }
                }
                GenerationOutcome::Skipped { reason } => {
                    record_operator_skip(ctx, state, child, place, &reason);
                    report.skipped += 1;
                }
                GenerationOutcome::Halted(h) => {
                    if !matches!(h, Halt::Cancelled) {
                        report.failed += 1;
                    }
                    halt = Some(h);
                    break;
                }
            }
        }

        tracing::debug!(
            parent_node_id = %parent.id,
            depth,
            executed = report.executed,
            skipped = report.skipped,
            "child cascade finished"
        );
        ctx.events.emit(CascadeEventKind::ChildCascadeCompleted {
            report: report.clone(),
        });
        ChildBatch { report, halt }
    }
    .boxed()
}
