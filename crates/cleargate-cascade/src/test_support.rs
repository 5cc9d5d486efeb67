//! Scripted collaborators for testing cascades without a model service.
//!
//! ```ignore
//! let client = ScriptedGenerationClient::new();
//! client.reply("n1", "first answer");
//! client.push("n2", Script::RateLimit(Some(2_000)));
//! let engine = CascadeEngine::builder()
//!     .store(store.clone())
//!     .client(client.clone())
//!     .build()?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;

use crate::defaults::InMemoryPromptStore;
use crate::errors::{ClientError, PromptError, StoreError};
use crate::event::{CascadeEvent, CascadeEventKind};
use crate::traits::{
    ActionPreview, CascadeObserver, GenerationClient, GenerationStream, PromptStore,
    RecoveryPrompt,
};
use crate::types::*;

// ---------------------------------------------------------------------------
// ScriptedGenerationClient
// ---------------------------------------------------------------------------

/// What one generation call does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream `text` in one progress chunk, then complete.
    Reply(String),
    ReplyWith(GenerationOutput),
    Fail(GenerationFailure),
    /// Terminal rate-limit event with an optional wait.
    RateLimit(Option<u64>),
    /// Start, then never finish.
    Hang { response_id: String },
    /// Exactly these events.
    Events(Vec<GenerationEvent>),
    /// Refuse to open the stream.
    ClientError(String),
}

#[derive(Default)]
struct ClientState {
    scripts: HashMap<String, VecDeque<Script>>,
    default_reply: Option<String>,
    calls: Vec<GenerationRequest>,
    cancelled: Vec<String>,
}

/// Generation client driven by per-node scripts.
///
/// Each call pops the next script queued for its node. With nothing
/// queued it replies with the default reply if one is set, else
/// `"output of {node_id}"`.
#[derive(Clone, Default)]
pub struct ScriptedGenerationClient {
    state: Arc<Mutex<ClientState>>,
}

impl ScriptedGenerationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, node_id: &str, script: Script) -> &Self {
        self.state
            .lock()
            .scripts
            .entry(node_id.to_string())
            .or_default()
            .push_back(script);
        self
    }

    pub fn reply(&self, node_id: &str, text: &str) -> &Self {
        self.push(node_id, Script::Reply(text.to_string()))
    }

    pub fn fail(&self, node_id: &str, code: &str) -> &Self {
        self.push(
            node_id,
            Script::Fail(GenerationFailure::new(code, format!("{code} from script"))),
        )
    }

    /// Reply for nodes with no queued script, including nodes created
    /// during the run.
    pub fn set_default_reply(&self, text: &str) -> &Self {
        self.state.lock().default_reply = Some(text.to_string());
        self
    }

    /// Every request received, in order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.state.lock().calls.clone()
    }

    /// Node ids of every request, in order.
    pub fn call_order(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .map(|r| r.node_id.clone())
            .collect()
    }

    /// Response ids passed to [`GenerationClient::cancel`].
    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().cancelled.clone()
    }
}

fn reply_events(output: GenerationOutput) -> Vec<GenerationEvent> {
    vec![
        GenerationEvent::Started {
            response_id: output.response_id.clone(),
        },
        GenerationEvent::Progress {
            delta: output.response_text.clone(),
        },
        GenerationEvent::Completed { output },
    ]
}

#[async_trait]
impl GenerationClient for ScriptedGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationStream, ClientError> {
        let (script, call_no) = {
            let mut state = self.state.lock();
            state.calls.push(request.clone());
            let script = state
                .scripts
                .get_mut(&request.node_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    Script::Reply(
                        state
                            .default_reply
                            .clone()
                            .unwrap_or_else(|| format!("output of {}", request.node_id)),
                    )
                });
            (script, state.calls.len())
        };

        let events = match script {
            Script::Reply(text) => {
                let mut output = GenerationOutput::text(text);
                output.response_id = Some(format!("resp-{call_no}"));
                output.usage = Some(TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                    total_tokens: 15,
                });
                reply_events(output)
            }
            Script::ReplyWith(output) => reply_events(output),
            Script::Fail(failure) => vec![GenerationEvent::Error { failure }],
            Script::RateLimit(retry_after_ms) => vec![GenerationEvent::RateLimited {
                retry_after_ms,
                message: String::new(),
            }],
            Script::Hang { response_id } => {
                let started = stream::iter(vec![GenerationEvent::Started {
                    response_id: Some(response_id),
                }]);
                return Ok(started.chain(stream::pending()).boxed());
            }
            Script::Events(events) => events,
            Script::ClientError(message) => return Err(ClientError::Transport { message }),
        };
        Ok(stream::iter(events).boxed())
    }

    async fn cancel(&self, response_id: &str) -> Result<(), ClientError> {
        self.state.lock().cancelled.push(response_id.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Human prompt doubles
// ---------------------------------------------------------------------------

/// Recovery prompt answering from a queue (then `stop`) and recording
/// every question.
#[derive(Clone, Default)]
pub struct RecordingRecovery {
    decisions: Arc<Mutex<VecDeque<RecoveryDecision>>>,
    asked: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingRecovery {
    pub fn new(decisions: impl IntoIterator<Item = RecoveryDecision>) -> Self {
        Self {
            decisions: Arc::new(Mutex::new(decisions.into_iter().collect())),
            asked: Arc::default(),
        }
    }

    /// `(node_id, error_message)` for every question asked.
    pub fn asked(&self) -> Vec<(String, String)> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl RecoveryPrompt for RecordingRecovery {
    async fn ask_recovery_decision(
        &self,
        _run_id: &str,
        node: &PromptNode,
        error_message: &str,
    ) -> Result<RecoveryDecision, PromptError> {
        self.asked
            .lock()
            .push((node.id.clone(), error_message.to_string()));
        Ok(self
            .decisions
            .lock()
            .pop_front()
            .unwrap_or(RecoveryDecision::Stop))
    }
}

/// Action preview with a fixed answer that records what it was shown.
#[derive(Clone)]
pub struct RecordingPreview {
    answer: bool,
    shown: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RecordingPreview {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            shown: Arc::default(),
        }
    }

    /// `(node_id, data)` for every preview shown.
    pub fn shown(&self) -> Vec<(String, Value)> {
        self.shown.lock().clone()
    }
}

#[async_trait]
impl ActionPreview for RecordingPreview {
    async fn confirm_action(
        &self,
        _run_id: &str,
        node: &PromptNode,
        data: &Value,
        _config: &PostActionConfig,
    ) -> Result<bool, PromptError> {
        self.shown.lock().push((node.id.clone(), data.clone()));
        Ok(self.answer)
    }
}

// ---------------------------------------------------------------------------
// CollectingObserver
// ---------------------------------------------------------------------------

/// Observer that keeps every event.
#[derive(Clone, Default)]
pub struct CollectingObserver {
    events: Arc<Mutex<Vec<CascadeEvent>>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CascadeEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<CascadeEventKind> {
        self.events.lock().iter().map(|e| e.kind.clone()).collect()
    }
}

impl CascadeObserver for CollectingObserver {
    fn on_event(&self, event: &CascadeEvent) {
        self.events.lock().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// LimitedCreateStore
// ---------------------------------------------------------------------------

/// In-memory store that refuses `create_node` once `allowed` nodes have
/// been created through it. Everything else passes through.
#[derive(Clone)]
pub struct LimitedCreateStore {
    inner: InMemoryPromptStore,
    remaining: Arc<Mutex<usize>>,
}

impl LimitedCreateStore {
    pub fn new(inner: InMemoryPromptStore, allowed: usize) -> Self {
        Self {
            inner,
            remaining: Arc::new(Mutex::new(allowed)),
        }
    }
}

#[async_trait]
impl PromptStore for LimitedCreateStore {
    async fn get_node(&self, node_id: &str) -> Result<Option<PromptNode>, StoreError> {
        self.inner.get_node(node_id).await
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<PromptNode>, StoreError> {
        self.inner.list_children(parent_id).await
    }

    async fn save_result(&self, node_id: &str, update: ResultUpdate) -> Result<(), StoreError> {
        self.inner.save_result(node_id, update).await
    }

    async fn save_action_outcome(
        &self,
        node_id: &str,
        outcome: ActionOutcome,
    ) -> Result<(), StoreError> {
        self.inner.save_action_outcome(node_id, outcome).await
    }

    async fn create_node(&self, node: PromptNode) -> Result<PromptNode, StoreError> {
        {
            let mut remaining = self.remaining.lock();
            if *remaining == 0 {
                return Err(StoreError::Store {
                    message: "node quota reached".into(),
                });
            }
            *remaining -= 1;
        }
        self.inner.create_node(node).await
    }
}
