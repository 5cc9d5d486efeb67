//! Cascade executor: the orchestrator and its per-node machinery.
//!
//! A run executes nodes strictly one at a time in level order, then
//! position order. Every state transition is emitted as a
//! [`CascadeEvent`] with a monotonic sequence number, to the run's
//! broadcast channel and to the configured observer.

mod action;
pub(crate) mod attempt;
mod child;
mod node;
pub(crate) mod run;


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::control::RunControl;
use crate::engine::CascadeError;
use crate::event::{CascadeEvent, CascadeEventKind};
use crate::traits::{
    ActionExecutor, ActionPreview, CascadeObserver, GenerationClient, PromptStore, RecoveryPrompt,
    TracingRecorder,
};
use crate::types::*;
use crate::variables::NodeReference;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Executor configuration. Every field has a serde default, so a partial
/// document (or `{}`) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    /// Normal retry budget and backoff.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Rate-limit waits per node before escalating. Default: 12.
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
    /// Wait used when the service signals a rate limit without a duration.
    /// Default: 30 000.
    #[serde(default = "default_rate_limit_fallback_ms")]
    pub rate_limit_fallback_ms: u64,
    /// Sleep between pause checks. Default: 250.
    #[serde(default = "default_pause_poll_interval_ms")]
    pub pause_poll_interval_ms: u64,
    /// Deepest child batch that runs. Default: 99.
    #[serde(default = "default_max_child_depth")]
    pub max_child_depth: u32,
    /// Sent when a node has neither user nor admin text.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
    /// Suppress action previews for every node.
    #[serde(default)]
    pub skip_action_previews: bool,
    /// Capacity of each run's event broadcast channel. Default: 256.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_rate_limit_waits() -> u32 {
    12
}
fn default_rate_limit_fallback_ms() -> u64 {
    30_000
}
fn default_pause_poll_interval_ms() -> u64 {
    250
}
fn default_max_child_depth() -> u32 {
    99
}
fn default_fallback_message() -> String {
    "Execute this prompt".to_string()
}
fn default_event_capacity() -> usize {
    256
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
            rate_limit_fallback_ms: default_rate_limit_fallback_ms(),
            pause_poll_interval_ms: default_pause_poll_interval_ms(),
            max_child_depth: default_max_child_depth(),
            fallback_message: default_fallback_message(),
            skip_action_previews: false,
            event_capacity: default_event_capacity(),
        }
    }
}

/// Handle to a spawned cascade run.
pub struct CascadeHandle {
    pub run_id: String,
    /// Pause, resume, cancel, and progress for this run.
    pub control: RunControl,
    /// Live events. Subscribed before the run starts, so nothing is missed
    /// unless the receiver lags.
    pub events: broadcast::Receiver<CascadeEvent>,
    pub join: JoinHandle<CascadeReport>,
}

impl CascadeHandle {
    /// Wait for the run to finish.
    pub async fn report(self) -> Result<CascadeReport, CascadeError> {
        self.join.await.map_err(|e| CascadeError::Aborted {
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for CascadeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeHandle")
            .field("run_id", &self.run_id)
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Internal run plumbing
// ---------------------------------------------------------------------------

/// Collaborators shared by every run of one executor.
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub store: Arc<dyn PromptStore>,
    pub client: Arc<dyn GenerationClient>,
    pub actions: Arc<dyn ActionExecutor>,
    pub tracing: Arc<dyn TracingRecorder>,
    pub recovery: Arc<dyn RecoveryPrompt>,
    pub preview: Arc<dyn ActionPreview>,
    pub observer: Arc<dyn CascadeObserver>,
}

/// Emits events with per-run sequence numbers.
#[derive(Clone)]
pub(crate) struct EventEmitter {
    run_id: String,
    seq: Arc<AtomicU64>,
    tx: broadcast::Sender<CascadeEvent>,
    observer: Arc<dyn CascadeObserver>,
}

impl EventEmitter {
    pub(crate) fn new(
        run_id: impl Into<String>,
        tx: broadcast::Sender<CascadeEvent>,
        observer: Arc<dyn CascadeObserver>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            seq: Arc::new(AtomicU64::new(0)),
            tx,
            observer,
        }
    }

    pub(crate) fn emit(&self, kind: CascadeEventKind) {
        let event = CascadeEvent {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            schema_version: CASCADE_EVENT_SCHEMA_VERSION,
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
            kind,
        };
        self.observer.on_event(&event);
        // No subscribers is normal.
        let _ = self.tx.send(event);
    }
}

/// Immutable context for one run.
pub(crate) struct RunContext {
    pub run_id: String,
    pub generation_context_id: Option<String>,
    pub caller: CallerIdentity,
    pub config: Arc<ExecutorConfig>,
    pub collab: Collaborators,
    pub control: RunControl,
    pub events: EventEmitter,
    pub trace_id: Option<String>,
}

/// Mutable state accumulated over one run.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    pub history: Vec<HistoryEntry>,
    pub references: Vec<NodeReference>,
    pub summary: CascadeSummary,
    pub excluded_node_ids: Vec<String>,
    pub child_cascades: Vec<ChildCascadeReport>,
    /// Threads each call onto the previous successful response.
    pub previous_response_id: Option<String>,
}

/// Why a run stops before exhausting its levels.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Halt {
    Cancelled,
    Stopped { node_id: String, error: CascadeError },
    Fatal(CascadeError),
}

/// Cancellation and pause checkpoint, taken before every node.
pub(crate) async fn checkpoint(ctx: &RunContext) -> Result<(), Halt> {
    if ctx.control.is_cancelled() {
        return Err(Halt::Cancelled);
    }
    if !ctx.control.is_paused() {
        return Ok(());
    }

    let previous = ctx.control.progress().status;
    ctx.control.update_progress(|p| p.status = RunStatus::Paused);
    ctx.events.emit(CascadeEventKind::CascadePaused);
    tracing::debug!(run_id = %ctx.run_id, "cascade paused");

    let poll = Duration::from_millis(ctx.config.pause_poll_interval_ms.max(1));
    while ctx.control.is_paused() {
        tokio::time::sleep(poll).await;
        if ctx.control.is_cancelled() {
            return Err(Halt::Cancelled);
        }
    }

    ctx.control.update_progress(|p| p.status = previous);
    ctx.events.emit(CascadeEventKind::CascadeResumed);
    tracing::debug!(run_id = %ctx.run_id, "cascade resumed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs cascades against one set of collaborators.
pub(crate) struct Executor {
    config: Arc<ExecutorConfig>,
    collab: Collaborators,
}

impl Executor {
    pub(crate) fn new(config: ExecutorConfig, collab: Collaborators) -> Self {
        Self {
            config: Arc::new(config),
            collab,
        }
    }

    pub(crate) fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn context(
        &self,
        generation_context_id: Option<String>,
        caller: CallerIdentity,
        control: RunControl,
    ) -> (RunContext, broadcast::Receiver<CascadeEvent>) {
        let run_id = ExecutionId::new().to_string();
        let (tx, rx) = broadcast::channel(self.config.event_capacity.max(1));
        let events = EventEmitter::new(
            run_id.clone(),
            tx,
            Arc::clone(&self.collab.observer),
        );
        let ctx = RunContext {
            run_id,
            generation_context_id,
            caller,
            config: Arc::clone(&self.config),
            collab: self.collab.clone(),
            control,
            events,
            trace_id: None,
        };
        (ctx, rx)
    }

    /// Start a cascade on a background task.
    pub(crate) fn spawn_cascade(
        &self,
        root_node_id: &str,
        generation_context_id: Option<String>,
        caller: CallerIdentity,
    ) -> CascadeHandle {
        let control = RunControl::new();
        let (ctx, events) = self.context(generation_context_id, caller, control.clone());
        let run_id = ctx.run_id.clone();
        let root = root_node_id.to_string();
        let join = tokio::spawn(async move { run::execute_cascade(ctx, &root).await });
        CascadeHandle {
            run_id,
            control,
            events,
            join,
        }
    }

    /// Run a cascade to completion on the current task.
    pub(crate) async fn execute_cascade(
        &self,
        root_node_id: &str,
        generation_context_id: Option<String>,
        caller: CallerIdentity,
        control: RunControl,
    ) -> CascadeReport {
        let (ctx, _events) = self.context(generation_context_id, caller, control);
        run::execute_cascade(ctx, root_node_id).await
    }

    /// Run a single node, its post-action, and any auto-run children.
    pub(crate) async fn run_node(
        &self,
        node_id: &str,
        generation_context_id: Option<String>,
        caller: CallerIdentity,
        control: RunControl,
    ) -> NodeRunReport {
        let (ctx, _events) = self.context(generation_context_id, caller, control);
        run::execute_single(ctx, node_id).await
    }
}
