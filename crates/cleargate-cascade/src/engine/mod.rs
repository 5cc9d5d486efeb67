//! Engine façade: the single entry point for running prompt cascades.
//!
//! ```rust,ignore
//! let store = InMemoryPromptStore::new();
//! let engine = CascadeEngine::builder()
//!     .store(store.clone())
//!     .client(MyGenerationClient::new())
//!     .build()?;
//!
//! let handle = engine.spawn_cascade("root", Some("conv-1"), caller);
//! handle.control.pause();
//! let report = handle.report().await?;
//! ```

mod builder;
pub mod error;

pub use builder::CascadeEngineBuilder;
pub use error::CascadeError;

use std::sync::Arc;

use crate::control::RunControl;
use crate::executor::{CascadeHandle, Executor, ExecutorConfig};
use crate::traits::PromptStore;
use crate::types::{CallerIdentity, CascadeReport, NodeRunReport};

/// The assembled cascade runtime. Cheap to clone.
#[derive(Clone)]
pub struct CascadeEngine {
    pub(super) executor: Arc<Executor>,
    pub(super) store: Arc<dyn PromptStore>,
}

impl CascadeEngine {
    pub fn builder() -> CascadeEngineBuilder {
        CascadeEngineBuilder::new()
    }

    /// Run the tree under `root_node_id` and wait for it to finish.
    ///
    /// The root itself is context for its descendants and is not generated;
    /// use [`run_node`](Self::run_node) to generate a single node.
    ///
    /// Never fails outright: hierarchy errors, operator stops, and fatal
    /// generation errors are reported in [`CascadeReport::status`] and
    /// [`CascadeReport::error`] alongside whatever history was produced.
    pub async fn execute_cascade(
        &self,
        root_node_id: &str,
        generation_context_id: Option<&str>,
        caller: CallerIdentity,
    ) -> CascadeReport {
        self.execute_cascade_with(root_node_id, generation_context_id, caller, RunControl::new())
            .await
    }

    /// As [`execute_cascade`](Self::execute_cascade), controlled through a
    /// caller-held [`RunControl`].
    pub async fn execute_cascade_with(
        &self,
        root_node_id: &str,
        generation_context_id: Option<&str>,
        caller: CallerIdentity,
        control: RunControl,
    ) -> CascadeReport {
        self.executor
            .execute_cascade(
                root_node_id,
                generation_context_id.map(str::to_string),
                caller,
                control,
            )
            .await
    }

    /// Start a cascade on a background task and return immediately.
    pub fn spawn_cascade(
        &self,
        root_node_id: &str,
        generation_context_id: Option<&str>,
        caller: CallerIdentity,
    ) -> CascadeHandle {
        self.executor.spawn_cascade(
            root_node_id,
            generation_context_id.map(str::to_string),
            caller,
        )
    }

    /// Run a single node outside a cascade, including its post-action and
    /// any auto-run children.
    pub async fn run_node(
        &self,
        node_id: &str,
        generation_context_id: Option<&str>,
        caller: CallerIdentity,
    ) -> NodeRunReport {
        self.executor
            .run_node(
                node_id,
                generation_context_id.map(str::to_string),
                caller,
                RunControl::new(),
            )
            .await
    }

    pub fn config(&self) -> &ExecutorConfig {
        self.executor.config()
    }

    pub fn store(&self) -> &Arc<dyn PromptStore> {
        &self.store
    }
}

impl std::fmt::Debug for CascadeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeEngine")
            .field("config", self.config())
            .finish_non_exhaustive()
    }
}
