//! Cascade engine: level-ordered execution of prompt trees.
//!
//! A cascade walks a tree of prompt nodes breadth first below the chosen
//! root, sending each node's message to a generation service with the accumulated results of
//! everything before it available as template variables. Failures are
//! retried with backoff, rate limits are waited out, and exhausted nodes
//! are handed to a human who chooses to stop, skip, or retry. Nodes with a
//! post-action turn their structured output into side effects, typically
//! new child nodes that run immediately as a nested cascade.
//!
//! The engine owns no storage, model client, or UI. Those are collaborator
//! traits in [`traits`], with ready-made implementations in [`defaults`].
#[cfg(feature = "schemars")]
pub mod schema;

pub mod control;
pub mod defaults;
pub mod engine;
pub mod errors;
pub mod event;
pub mod executor;
pub mod extract;
pub mod hierarchy;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod traits;
pub mod types;
pub mod variables;

// Re-export public types at the crate level.

// control
pub use control::RunControl;

// defaults
pub use defaults::{
    AutoConfirm, BroadcastObserver, CreateChildrenAction, FixedRecovery, HumanPromptRegistry,
    InMemoryPromptStore, LogTracingRecorder, PromptRequest,
};

// engine
pub use engine::{CascadeEngine, CascadeEngineBuilder, CascadeError};

// errors
pub use errors::{ActionError, ClientError, PromptError, StoreError, TracingError};

// event
pub use event::{CascadeEvent, CascadeEventKind, SkipReason};

// executor
pub use executor::{CascadeHandle, ExecutorConfig};

// extract
pub use extract::{extract_json, ExtractError};

// hierarchy
pub use hierarchy::load_hierarchy;

// traits
pub use traits::{
    ActionExecutor, ActionPreview, ActionResult, CascadeObserver, ErrorEvidence, GenerationClient,
    GenerationStream, NoopObserver, NoopTracing, PromptStore, RecoveryPrompt, SpanOutcome,
    TracingRecorder,
};

// types
pub use types::{
    ActionOutcome, ActionStatus, CallerIdentity, CascadeProgress, CascadeReport, CascadeSummary,
    ChildCascadeReport, ChildTemplate, ExecutionId, GenerationEvent, GenerationFailure,
    GenerationOutput, GenerationRequest, HistoryEntry, NodeRunReport, NodeType, PostActionConfig,
    PromptNode, RecoveryDecision, ResultUpdate, RetryPolicy, RunStatus, ThreadingOptions,
    TokenUsage, CASCADE_EVENT_SCHEMA_VERSION, SKIPPED_RESPONSE_PREFIX,
};

// variables
pub use variables::{NodeReference, Variables};
