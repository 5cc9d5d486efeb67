//! Engine builder: collaborators in, [`CascadeEngine`] out.

use std::sync::Arc;

use super::error::CascadeError;
use super::CascadeEngine;
use crate::defaults::{AutoConfirm, CreateChildrenAction, FixedRecovery};
use crate::executor::{Collaborators, Executor, ExecutorConfig};
use crate::traits::{
    ActionExecutor, ActionPreview, CascadeObserver, GenerationClient, NoopObserver, NoopTracing,
    PromptStore, RecoveryPrompt, TracingRecorder,
};
use crate::types::RecoveryDecision;

/// Builder for [`CascadeEngine`].
///
/// The prompt store and generation client are required. Everything else
/// has a default applied in [`build()`](CascadeEngineBuilder::build).
pub struct CascadeEngineBuilder {
    store: Option<Arc<dyn PromptStore>>,
    client: Option<Arc<dyn GenerationClient>>,
    actions: Option<Arc<dyn ActionExecutor>>,
    tracing: Option<Arc<dyn TracingRecorder>>,
    recovery: Option<Arc<dyn RecoveryPrompt>>,
    preview: Option<Arc<dyn ActionPreview>>,
    observer: Option<Arc<dyn CascadeObserver>>,
    config: ExecutorConfig,
}

impl CascadeEngineBuilder {
    pub(super) fn new() -> Self {
        Self {
            store: None,
            client: None,
            actions: None,
            tracing: None,
            recovery: None,
            preview: None,
            observer: None,
            config: ExecutorConfig::default(),
        }
    }

    /// Set the prompt store. Required.
    pub fn store(mut self, store: impl PromptStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the generation client. Required.
    pub fn client(mut self, client: impl GenerationClient + 'static) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Set the action executor. Default: [`CreateChildrenAction`] over the store.
    pub fn actions(mut self, actions: impl ActionExecutor + 'static) -> Self {
        self.actions = Some(Arc::new(actions));
        self
    }

    /// Set the tracing recorder. Default: [`NoopTracing`].
    pub fn tracing(mut self, recorder: impl TracingRecorder + 'static) -> Self {
        self.tracing = Some(Arc::new(recorder));
        self
    }

    /// Set the recovery prompt. Default: [`FixedRecovery`] answering `stop`.
    pub fn recovery(mut self, prompt: impl RecoveryPrompt + 'static) -> Self {
        self.recovery = Some(Arc::new(prompt));
        self
    }

    /// Set the action preview prompt. Default: [`AutoConfirm`].
    pub fn preview(mut self, prompt: impl ActionPreview + 'static) -> Self {
        self.preview = Some(Arc::new(prompt));
        self
    }

    /// Set the event observer. Default: [`NoopObserver`].
    pub fn observer(mut self, observer: impl CascadeObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Set the executor configuration.
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the engine.
    pub fn build(self) -> Result<CascadeEngine, CascadeError> {
        let store = self.store.ok_or_else(|| CascadeError::Build {
            message: "a prompt store is required".into(),
        })?;
        let client = self.client.ok_or_else(|| CascadeError::Build {
            message: "a generation client is required".into(),
        })?;

        let actions = self
            .actions
            .unwrap_or_else(|| Arc::new(CreateChildrenAction::new(Arc::clone(&store))));
        let recorder = self.tracing.unwrap_or_else(|| Arc::new(NoopTracing));
        let recovery = self
            .recovery
            .unwrap_or_else(|| Arc::new(FixedRecovery(RecoveryDecision::Stop)));
        let preview = self.preview.unwrap_or_else(|| Arc::new(AutoConfirm));
        let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));

        let collab = Collaborators {
            store: Arc::clone(&store),
            client,
            actions,
            tracing: recorder,
            recovery,
            preview,
            observer,
        };
        tracing::debug!(config = ?self.config, "cascade engine built");

        Ok(CascadeEngine {
            executor: Arc::new(Executor::new(self.config, collab)),
            store,
        })
    }
}

impl Default for CascadeEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::InMemoryPromptStore;
    use crate::test_support::ScriptedGenerationClient;

    #[test]
    fn store_and_client_are_required() {
        let err = CascadeEngineBuilder::new().build().unwrap_err();
        assert!(matches!(err, CascadeError::Build { .. }));

        let err = CascadeEngineBuilder::new()
            .store(InMemoryPromptStore::new())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("generation client"));
    }

    #[test]
    fn builds_with_defaults() {
        let engine = CascadeEngine::builder()
            .store(InMemoryPromptStore::new())
            .client(ScriptedGenerationClient::new())
            .build()
            .unwrap();
        assert_eq!(engine.config().max_child_depth, 99);
    }

    #[test]
    fn config_override_is_applied() {
        let engine = CascadeEngine::builder()
            .store(InMemoryPromptStore::new())
            .client(ScriptedGenerationClient::new())
            .config(ExecutorConfig {
                max_child_depth: 2,
                ..ExecutorConfig::default()
            })
            .build()
            .unwrap();
        assert_eq!(engine.config().max_child_depth, 2);
    }
}
