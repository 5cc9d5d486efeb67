//! Single-node generation: the attempt loop, tracing spans, and result
//! persistence.

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::time::Instant;

use super::attempt::{AttemptStep, AttemptTracker};
use super::{Halt, RunContext, RunState};
use crate::engine::CascadeError;
use crate::event::{CascadeEventKind, SkipReason};
use crate::extract::{extract_json, ExtractError};
use crate::traits::{ErrorEvidence, SpanOutcome};
use crate::types::*;
use crate::variables::Variables;

/// Where a node sits in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct NodePlace {
    pub level: u32,
    /// 0 for loaded nodes, N for the Nth generation of action-created children.
    pub depth: u32,
}

/// Builds the variable mapping for one attempt from the current run state.
pub(super) type BuildVariables<'a> = dyn Fn(&RunState) -> Variables + Send + Sync + 'a;

pub(super) enum GenerationOutcome {
    Completed {
        output: GenerationOutput,
        duration_ms: u64,
        /// Mapping sent with the successful attempt.
        variables: Variables,
    },
    /// Operator chose `skip`.
    Skipped { reason: String },
    Halted(Halt),
}

enum CallResult {
    Done(Result<GenerationOutput, GenerationFailure>),
    Cancelled,
}

// ---------------------------------------------------------------------------
// Attempt loop
// ---------------------------------------------------------------------------

/// Generate `node` until it succeeds, is skipped, or halts the run.
///
/// `build_variables` runs before every attempt, including operator retries.
pub(super) async fn generate_node(
    ctx: &RunContext,
    state: &mut RunState,
    node: &PromptNode,
    place: NodePlace,
    build_variables: &BuildVariables<'_>,
) -> GenerationOutcome {
    let message = node.outbound_message(&ctx.config.fallback_message);
    let mut tracker = AttemptTracker::new(
        &node.id,
        ctx.config.retry.clone(),
        ctx.config.max_rate_limit_waits,
        ctx.config.rate_limit_fallback_ms,
    );
    let mut previous_span: Option<String> = None;
    let started = Instant::now();

    loop {
        let attempt = tracker.begin_call();
        ctx.events.emit(CascadeEventKind::NodeStarted {
            node_id: node.id.clone(),
            node_name: node.display_name().to_string(),
            level: place.level,
            depth: place.depth,
            attempt,
        });
        let span_id = open_span(ctx, &node.id, attempt, previous_span.as_deref()).await;

        let variables = build_variables(&*state);
        let request = GenerationRequest {
            run_id: ctx.run_id.clone(),
            node_id: node.id.clone(),
            message: message.clone(),
            variables: variables.clone(),
            threading: ThreadingOptions {
                generation_context_id: ctx.generation_context_id.clone(),
                previous_response_id: state.previous_response_id.clone(),
            },
            attempt,
        };

        let call_start = Instant::now();
        let result = match call_once(ctx, &node.id, request).await {
            CallResult::Done(result) => result,
            CallResult::Cancelled => {
                let evidence = ErrorEvidence {
                    code: "cancelled".into(),
                    message: "cascade cancelled during generation".into(),
                    attempt,
                    latency_ms: elapsed_ms(call_start),
                    retry_after_ms: None,
                };
                fail_span(ctx, span_id.as_deref(), &evidence).await;
                return GenerationOutcome::Halted(Halt::Cancelled);
            }
        };
        let latency_ms = elapsed_ms(call_start);

        let mut failure = match result {
            Ok(output) => {
                let outcome = SpanOutcome {
                    latency_ms,
                    usage: output.usage,
                    model: output.model.clone(),
                    response_id: output.response_id.clone(),
                };
                complete_span(ctx, span_id.as_deref(), &outcome).await;
                if output.response_id.is_some() {
                    state.previous_response_id = output.response_id.clone();
                }
                return GenerationOutcome::Completed {
                    output,
                    duration_ms: elapsed_ms(started),
                    variables,
                };
            }
            Err(failure) => failure,
        };

        failure
            .node_name
            .get_or_insert_with(|| node.display_name().to_string());
        let evidence = ErrorEvidence {
            code: failure.code.clone(),
            message: failure.message.clone(),
            attempt,
            latency_ms,
            retry_after_ms: failure.retry_after_ms,
        };
        fail_span(ctx, span_id.as_deref(), &evidence).await;
        if span_id.is_some() {
            previous_span = span_id;
        }

        match tracker.on_failure(&failure) {
            AttemptStep::RateLimitWait {
                wait_ms,
                wait_count,
            } => {
                tracing::warn!(
                    node_id = %node.id,
                    wait_ms,
                    wait_count,
                    "generation rate limited, waiting"
                );
                ctx.events.emit(CascadeEventKind::RateLimited {
                    node_id: node.id.clone(),
                    wait_ms,
                    wait_count,
                });
                if !sleep_or_cancel(ctx, wait_ms).await {
                    return GenerationOutcome::Halted(Halt::Cancelled);
                }
            }
            AttemptStep::Backoff {
                attempt: failed_attempt,
                backoff_ms,
            } => {
                tracing::warn!(
                    node_id = %node.id,
                    attempt = failed_attempt,
                    backoff_ms,
                    error = %failure,
                    "generation failed, retrying"
                );
                ctx.events.emit(CascadeEventKind::NodeRetrying {
                    node_id: node.id.clone(),
                    attempt: failed_attempt,
                    error: failure.to_string(),
                    backoff_ms,
                });
                if !sleep_or_cancel(ctx, backoff_ms).await {
                    return GenerationOutcome::Halted(Halt::Cancelled);
                }
            }
            AttemptStep::Fatal(error) => {
                tracing::error!(node_id = %node.id, error = %error, "fatal generation failure");
                ctx.events.emit(CascadeEventKind::NodeFailed {
                    node_id: node.id.clone(),
                    error: error.clone(),
                });
                return GenerationOutcome::Halted(Halt::Fatal(error));
            }
            AttemptStep::Exhausted(error) => {
                tracing::warn!(
                    node_id = %node.id,
                    calls = tracker.calls(),
                    failures = tracker.failures(),
                    rate_limit_waits = tracker.rate_limit_waits(),
                    error = %error,
                    "retries exhausted"
                );
                state.summary.failed += 1;
                ctx.events.emit(CascadeEventKind::NodeFailed {
                    node_id: node.id.clone(),
                    error: error.clone(),
                });
                match ask_recovery(ctx, node, &error).await {
                    Some(RecoveryDecision::Retry) => tracker.reset(),
                    Some(RecoveryDecision::Skip) => {
                        return GenerationOutcome::Skipped {
                            reason: error.to_string(),
                        }
                    }
                    Some(RecoveryDecision::Stop) => {
                        return GenerationOutcome::Halted(Halt::Stopped {
                            node_id: node.id.clone(),
                            error,
                        })
                    }
                    None => return GenerationOutcome::Halted(Halt::Cancelled),
                }
            }
        }
    }
}

/// One generation call, consumed to its terminal event. Cancellation
/// abandons the stream and asks the service to stop.
async fn call_once(ctx: &RunContext, node_id: &str, request: GenerationRequest) -> CallResult {
    let opened = tokio::select! {
        biased;
        _ = ctx.control.cancelled() => return CallResult::Cancelled,
        opened = ctx.collab.client.generate(request) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            return CallResult::Done(Err(GenerationFailure::new("client_error", e.to_string())))
        }
    };

    let mut response_id: Option<String> = None;
    let mut received_chars = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.control.cancelled() => {
                abort_remote(ctx, response_id.as_deref()).await;
                return CallResult::Cancelled;
            }
            next = stream.next() => next,
        };
        match next {
            Some(GenerationEvent::Started { response_id: id }) => {
                if id.is_some() {
                    response_id = id;
                }
            }
            Some(GenerationEvent::Progress { delta }) => {
                received_chars += delta.chars().count();
                ctx.events.emit(CascadeEventKind::GenerationProgress {
                    node_id: node_id.to_string(),
                    received_chars,
                });
            }
            Some(GenerationEvent::Completed { mut output }) => {
                if output.response_id.is_none() {
                    output.response_id = response_id;
                }
                return CallResult::Done(Ok(output));
            }
            Some(GenerationEvent::RateLimited {
                retry_after_ms,
                message,
            }) => {
                let mut failure = GenerationFailure::rate_limited(retry_after_ms);
                if !message.is_empty() {
                    failure.message = message;
                }
                return CallResult::Done(Err(failure));
            }
            Some(GenerationEvent::Error { failure }) => return CallResult::Done(Err(failure)),
            None => {
                return CallResult::Done(Err(GenerationFailure::new(
                    "stream_ended",
                    "generation stream ended without a result",
                )))
            }
        }
    }
}

async fn abort_remote(ctx: &RunContext, response_id: Option<&str>) {
    let Some(response_id) = response_id else {
        return;
    };
    if let Err(e) = ctx.collab.client.cancel(response_id).await {
        tracing::warn!(response_id, error = %e, "failed to cancel in-flight generation");
    }
}

/// Sleep unless the run is cancelled first. Returns false on cancel.
async fn sleep_or_cancel(ctx: &RunContext, ms: u64) -> bool {
    tokio::select! {
        biased;
        _ = ctx.control.cancelled() => false,
        _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
    }
}

/// Ask the operator. `None` means the run was cancelled while waiting.
async fn ask_recovery(
    ctx: &RunContext,
    node: &PromptNode,
    error: &CascadeError,
) -> Option<RecoveryDecision> {
    let message = error.to_string();
    ctx.events.emit(CascadeEventKind::RecoveryRequested {
        node_id: node.id.clone(),
        error: message.clone(),
    });
    let answer = tokio::select! {
        biased;
        _ = ctx.control.cancelled() => return None,
        answer = ctx.collab.recovery.ask_recovery_decision(&ctx.run_id, node, &message) => answer,
    };
    let decision = answer.unwrap_or_else(|e| {
        tracing::warn!(node_id = %node.id, error = %e, "recovery prompt failed, stopping");
        RecoveryDecision::Stop
    });
    ctx.events.emit(CascadeEventKind::RecoveryDecided {
        node_id: node.id.clone(),
        decision,
    });
    Some(decision)
}

// ---------------------------------------------------------------------------
// Outcome recording
// ---------------------------------------------------------------------------

/// Persist a successful generation and emit `NodeCompleted`.
///
/// For nodes with a post-action the structured data is extracted here so it
/// is stored with the result; the extraction result is returned for the
/// action step.
pub(super) async fn record_success(
    ctx: &RunContext,
    state: &mut RunState,
    node: &PromptNode,
    place: NodePlace,
    output: &GenerationOutput,
    duration_ms: u64,
) -> Option<Result<Value, ExtractError>> {
    let extracted = node
        .has_post_action()
        .then(|| extract_json(&output.response_text));

    let update = ResultUpdate {
        output_response: output.response_text.clone(),
        extracted_json: extracted.as_ref().and_then(|r| r.as_ref().ok().cloned()),
        model: output.model.clone(),
        usage: output.usage,
        response_id: output.response_id.clone(),
    };
    if let Err(e) = ctx.collab.store.save_result(&node.id, update).await {
        tracing::warn!(node_id = %node.id, error = %e, "failed to persist node result");
    }

    if let Some(usage) = output.usage {
        state.summary.input_tokens += usage.input_tokens;
        state.summary.output_tokens += usage.output_tokens;
    }
    ctx.events.emit(CascadeEventKind::NodeCompleted {
        node_id: node.id.clone(),
        node_name: node.display_name().to_string(),
        level: place.level,
        depth: place.depth,
        duration_ms,
        usage: output.usage,
    });
    extracted
}

/// Bookkeeping for an operator skip. Returns the synthetic response text.
pub(super) fn record_operator_skip(
    ctx: &RunContext,
    state: &mut RunState,
    node: &PromptNode,
    place: NodePlace,
    reason: &str,
) -> String {
    state.summary.skipped += 1;
    ctx.events.emit(CascadeEventKind::NodeSkipped {
        node_id: node.id.clone(),
        node_name: node.display_name().to_string(),
        level: place.level,
        reason: SkipReason::Operator,
        message: Some(reason.to_string()),
    });
    format!("{SKIPPED_RESPONSE_PREFIX} {reason}]")
}

/// Bookkeeping for a node flagged out of the cascade.
pub(super) fn record_excluded(
    ctx: &RunContext,
    state: &mut RunState,
    node: &PromptNode,
    level: u32,
) {
    state.summary.excluded += 1;
    state.excluded_node_ids.push(node.id.clone());
    ctx.events.emit(CascadeEventKind::NodeSkipped {
        node_id: node.id.clone(),
        node_name: node.display_name().to_string(),
        level,
        reason: SkipReason::Excluded,
        message: None,
    });
}

// ---------------------------------------------------------------------------
// Best-effort tracing
// ---------------------------------------------------------------------------

async fn open_span(
    ctx: &RunContext,
    node_id: &str,
    attempt: u32,
    previous_span_id: Option<&str>,
) -> Option<String> {
    let trace_id = ctx.trace_id.as_deref()?;
    match ctx
        .collab
        .tracing
        .create_span(trace_id, node_id, attempt, previous_span_id)
        .await
    {
        Ok(span_id) => Some(span_id),
        Err(e) => {
            tracing::warn!(node_id, attempt, error = %e, "failed to create span");
            None
        }
    }
}

async fn complete_span(ctx: &RunContext, span_id: Option<&str>, outcome: &SpanOutcome) {
    let Some(span_id) = span_id else { return };
    if let Err(e) = ctx.collab.tracing.complete_span(span_id, outcome).await {
        tracing::warn!(span_id, error = %e, "failed to complete span");
    }
}

async fn fail_span(ctx: &RunContext, span_id: Option<&str>, evidence: &ErrorEvidence) {
    let Some(span_id) = span_id else { return };
    if let Err(e) = ctx.collab.tracing.fail_span(span_id, evidence).await {
        tracing::warn!(span_id, error = %e, "failed to record span failure");
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
