//! Core execution loop: level order, then position order, one node at a time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::child::follow_up;
use super::node::{
    generate_node, record_excluded, record_operator_skip, record_success, GenerationOutcome,
    NodePlace,
};
use super::{checkpoint, Halt, RunContext, RunState};
use crate::engine::CascadeError;
use crate::event::CascadeEventKind;
use crate::hierarchy::load_hierarchy;
use crate::types::*;
use crate::variables::{NodeReference, VariableInputs};

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

pub(crate) async fn execute_cascade(mut ctx: RunContext, root_node_id: &str) -> CascadeReport {
    let started_at = Utc::now();
    let clock = Instant::now();
    let mut state = RunState::default();

    ctx.trace_id = start_trace(&ctx, root_node_id).await;
    ctx.control
        .update_progress(|p| p.status = RunStatus::LoadingHierarchy);
    tracing::info!(run_id = %ctx.run_id, root_node_id, "cascade starting");

    let levels = match load_hierarchy(ctx.collab.store.as_ref(), root_node_id).await {
        Ok(levels) => levels,
        Err(error) => {
            tracing::error!(run_id = %ctx.run_id, error = %error, "hierarchy load failed");
            let halt = Some(Halt::Fatal(error));
            return finish(&ctx, state, root_node_id, halt, started_at, clock).await;
        }
    };

    // Level 0 is the root. It frames the run (names, stored result as a
    // reference) but is never generated.
    let total_levels = levels.len() as u32;
    let total_prompts = levels
        .iter()
        .skip(1)
        .flatten()
        .filter(|n| !n.exclude_from_cascade)
        .count() as u32;
    let names: HashMap<&str, &str> = levels
        .iter()
        .flatten()
        .map(|n| (n.id.as_str(), n.display_name()))
        .collect();
    let top_level_name = levels
        .first()
        .and_then(|level| level.first())
        .map(|root| root.display_name().to_string())
        .unwrap_or_default();
    if let Some(root) = levels.first().and_then(|level| level.first()) {
        if let Some(response) = &root.output_response {
            state.references.push(NodeReference::new(
                root,
                response,
                root.extracted_json.clone(),
            ));
        }
    }

    ctx.control.update_progress(|p| {
        p.status = RunStatus::Running;
        p.total_levels = total_levels;
        p.total_prompts = total_prompts;
    });
    ctx.events.emit(CascadeEventKind::CascadeStarted {
        root_node_id: root_node_id.to_string(),
        total_levels,
        total_prompts,
    });

    // Excluded nodes are marked skipped up front; they never reach the client.
    for (level, nodes) in levels.iter().enumerate().skip(1) {
        for node in nodes.iter().filter(|n| n.exclude_from_cascade) {
            record_excluded(&ctx, &mut state, node, level as u32);
        }
    }

    let mut halt = None;
    'levels: for (level_idx, nodes) in levels.iter().enumerate().skip(1) {
        let level = level_idx as u32;
        for node in nodes.iter().filter(|n| !n.exclude_from_cascade) {
            if let Err(h) = checkpoint(&ctx).await {
                halt = Some(h);
                break 'levels;
            }
            ctx.control.update_progress(|p| {
                p.current_level = level;
                p.current_node_id = Some(node.id.clone());
            });

            let place = NodePlace { level, depth: 0 };
            let parent_name = node
                .parent_id
                .as_deref()
                .and_then(|id| names.get(id).copied());
            let build = |state: &RunState| {
                VariableInputs {
                    history: &state.history,
                    references: &state.references,
                    caller: &ctx.caller,
                    top_level_name: &top_level_name,
                    parent_name,
                    level,
                    prompt_count: total_prompts,
                    now: Utc::now(),
                }
                .build(node)
            };

            let outcome = generate_node(&ctx, &mut state, node, place, &build).await;
            let node_halt = match outcome {
                GenerationOutcome::Completed {
                    output,
                    duration_ms,
                    variables,
                } => {
                    let extracted =
                        record_success(&ctx, &mut state, node, place, &output, duration_ms).await;
                    state.summary.completed += 1;
                    state.history.push(HistoryEntry {
                        level,
                        node_id: node.id.clone(),
                        node_name: node.display_name().to_string(),
                        response_text: output.response_text.clone(),
                        skipped: false,
                    });
                    let json = extracted.as_ref().and_then(|r| r.as_ref().ok().cloned());
                    state
                        .references
                        .push(NodeReference::new(node, &output.response_text, json));

                    let next = follow_up(&ctx, &mut state, node, place, &variables, extracted).await;
                    if let Some(report) = next.child_report {
                        state.child_cascades.push(report);
                    }
                    next.halt
                }
                GenerationOutcome::Skipped { reason } => {
                    let response_text =
                        record_operator_skip(&ctx, &mut state, node, place, &reason);
                    state.history.push(HistoryEntry {
                        level,
                        node_id: node.id.clone(),
                        node_name: node.display_name().to_string(),
                        response_text,
                        skipped: true,
                    });
                    None
                }
                GenerationOutcome::Halted(h) => Some(h),
            };

            if !matches!(node_halt, Some(Halt::Cancelled)) {
                ctx.control.update_progress(|p| p.completed_prompts += 1);
            }
            if node_halt.is_some() {
                halt = node_halt;
                break 'levels;
            }
        }
    }

    finish(&ctx, state, root_node_id, halt, started_at, clock).await
}

// ---------------------------------------------------------------------------
// Single node
// ---------------------------------------------------------------------------

/// Run one node on its own: empty history, same attempt loop, same
/// post-action and child handling.
pub(crate) async fn execute_single(mut ctx: RunContext, node_id: &str) -> NodeRunReport {
    let started_at = Utc::now();
    let clock = Instant::now();
    let mut state = RunState::default();
    ctx.trace_id = start_trace(&ctx, node_id).await;

    let node = match ctx.collab.store.get_node(node_id).await {
        Ok(Some(node)) if !node.is_deleted => node,
        Ok(_) => {
            let error = CascadeError::HierarchyFetch {
                node_id: node_id.to_string(),
                message: format!("node {node_id} not found"),
            };
            let report = finish(&ctx, state, node_id, Some(Halt::Fatal(error)), started_at, clock).await;
            return node_report(report, node_id, None, None, None);
        }
        Err(e) => {
            let report = finish(
                &ctx,
                state,
                node_id,
                Some(Halt::Fatal(CascadeError::from(e))),
                started_at,
                clock,
            )
            .await;
            return node_report(report, node_id, None, None, None);
        }
    };

    let (parent_name, top_level_name) = ancestry_names(&ctx, &node).await;
    ctx.control.update_progress(|p| {
        p.status = RunStatus::Running;
        p.total_levels = 1;
        p.total_prompts = 1;
        p.current_node_id = Some(node.id.clone());
    });
    ctx.events.emit(CascadeEventKind::CascadeStarted {
        root_node_id: node.id.clone(),
        total_levels: 1,
        total_prompts: 1,
    });

    if let Err(h) = checkpoint(&ctx).await {
        let report = finish(&ctx, state, node_id, Some(h), started_at, clock).await;
        return node_report(report, node_id, None, None, None);
    }

    let place = NodePlace { level: 0, depth: 0 };
    let build = |_: &RunState| {
        VariableInputs {
            history: &[],
            references: &[],
            caller: &ctx.caller,
            top_level_name: &top_level_name,
            parent_name: parent_name.as_deref(),
            level: 0,
            prompt_count: 1,
            now: Utc::now(),
        }
        .build(&node)
    };

    let mut response_text = None;
    let mut skipped = false;
    let mut action = None;
    let mut child_cascade = None;
    let halt = match generate_node(&ctx, &mut state, &node, place, &build).await {
        GenerationOutcome::Completed {
            output,
            duration_ms,
            variables,
        } => {
            let extracted =
                record_success(&ctx, &mut state, &node, place, &output, duration_ms).await;
            state.summary.completed += 1;
            response_text = Some(output.response_text);
            let next = follow_up(&ctx, &mut state, &node, place, &variables, extracted).await;
            action = next.action;
            child_cascade = next.child_report;
            next.halt
        }
        GenerationOutcome::Skipped { reason } => {
            skipped = true;
            response_text = Some(record_operator_skip(
                &ctx, &mut state, &node, place, &reason,
            ));
            None
        }
        GenerationOutcome::Halted(h) => Some(h),
    };
    if !matches!(halt, Some(Halt::Cancelled)) {
        ctx.control.update_progress(|p| p.completed_prompts = 1);
    }
    if let Some(report) = &child_cascade {
        state.child_cascades.push(report.clone());
    }

    let report = finish(&ctx, state, node_id, halt, started_at, clock).await;
    let mut node_run = node_report(report, node_id, response_text, action, child_cascade);
    node_run.skipped = skipped;
    node_run
}

fn node_report(
    report: CascadeReport,
    node_id: &str,
    response_text: Option<String>,
    action: Option<ActionOutcome>,
    child_cascade: Option<ChildCascadeReport>,
) -> NodeRunReport {
    NodeRunReport {
        run_id: report.run_id,
        node_id: node_id.to_string(),
        status: report.status,
        skipped: false,
        response_text,
        action,
        child_cascade,
        error: report.error,
    }
}

/// Parent and top-level names for a node run on its own. Best-effort.
async fn ancestry_names(ctx: &RunContext, node: &PromptNode) -> (Option<String>, String) {
    let mut parent_name = None;
    let mut top = node.display_name().to_string();
    let mut seen = vec![node.id.clone()];
    let mut next = node.parent_id.clone();

    while let Some(id) = next.take() {
        if seen.contains(&id) {
            break;
        }
        match ctx.collab.store.get_node(&id).await {
            Ok(Some(ancestor)) => {
                if parent_name.is_none() {
                    parent_name = Some(ancestor.display_name().to_string());
                }
                top = ancestor.display_name().to_string();
                seen.push(id);
                next = ancestor.parent_id;
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(node_id = %node.id, error = %e, "failed to resolve ancestors");
                break;
            }
        }
    }
    (parent_name, top)
}

// ---------------------------------------------------------------------------
// Start / finish
// ---------------------------------------------------------------------------

async fn start_trace(ctx: &RunContext, root_node_id: &str) -> Option<String> {
    match ctx
        .collab
        .tracing
        .start_trace(&ctx.run_id, root_node_id)
        .await
    {
        Ok(trace_id) => Some(trace_id),
        Err(e) => {
            tracing::warn!(run_id = %ctx.run_id, error = %e, "failed to start trace");
            None
        }
    }
}

/// Close out a run. Every terminal state keeps the history produced so far.
async fn finish(
    ctx: &RunContext,
    state: RunState,
    root_node_id: &str,
    halt: Option<Halt>,
    started_at: DateTime<Utc>,
    clock: Instant,
) -> CascadeReport {
    let summary = state.summary.clone();
    let duration_ms = clock.elapsed().as_millis() as u64;
    let (status, error, event) = match halt {
        None => (
            RunStatus::Completed,
            None,
            CascadeEventKind::CascadeCompleted {
                summary,
                duration_ms,
            },
        ),
        Some(Halt::Cancelled) => (
            RunStatus::Cancelled,
            None,
            CascadeEventKind::CascadeCancelled { summary },
        ),
        Some(Halt::Stopped { node_id, error }) => (
            RunStatus::Stopped,
            Some(error),
            CascadeEventKind::CascadeStopped { node_id, summary },
        ),
        Some(Halt::Fatal(error)) => (
            RunStatus::Failed,
            Some(error.clone()),
            CascadeEventKind::CascadeFailed { error, summary },
        ),
    };

    ctx.control.update_progress(|p| {
        p.status = status;
        p.current_node_id = None;
    });
    if let Some(trace_id) = &ctx.trace_id {
        if let Err(e) = ctx.collab.tracing.complete_trace(trace_id, status).await {
            tracing::warn!(run_id = %ctx.run_id, error = %e, "failed to complete trace");
        }
    }
    ctx.events.emit(event);
    tracing::info!(
        run_id = %ctx.run_id,
        status = ?status,
        completed = state.summary.completed,
        skipped = state.summary.skipped,
        excluded = state.summary.excluded,
        duration_ms,
        "cascade finished"
    );

    CascadeReport {
        run_id: ctx.run_id.clone(),
        root_node_id: root_node_id.to_string(),
        status,
        history: state.history,
        summary: state.summary,
        excluded_node_ids: state.excluded_node_ids,
        child_cascades: state.child_cascades,
        error,
        started_at,
        finished_at: Utc::now(),
    }
}
