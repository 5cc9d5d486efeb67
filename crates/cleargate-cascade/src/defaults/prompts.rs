//! Human prompt implementations.
//!
//! [`FixedRecovery`] and [`AutoConfirm`] answer without a human.
//! [`HumanPromptRegistry`] parks each question on a oneshot channel keyed by
//! `(run_id, node_id)`, announces it on a broadcast channel, and resolves it
//! when a caller answers through [`decide_recovery`] or [`answer_preview`].
//!
//! [`decide_recovery`]: HumanPromptRegistry::decide_recovery
//! [`answer_preview`]: HumanPromptRegistry::answer_preview

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

use crate::errors::PromptError;
use crate::traits::{ActionPreview, RecoveryPrompt};
use crate::types::{PostActionConfig, PromptNode, RecoveryDecision};

/// Recovery prompt that always gives the same answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedRecovery(pub RecoveryDecision);

#[async_trait]
impl RecoveryPrompt for FixedRecovery {
    async fn ask_recovery_decision(
        &self,
        run_id: &str,
        node: &PromptNode,
        error_message: &str,
    ) -> Result<RecoveryDecision, PromptError> {
        tracing::debug!(%run_id, node_id = %node.id, error = %error_message, decision = ?self.0, "fixed recovery decision");
        Ok(self.0)
    }
}

/// Action preview that confirms everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl ActionPreview for AutoConfirm {
    async fn confirm_action(
        &self,
        _run_id: &str,
        _node: &PromptNode,
        _data: &Value,
        _config: &PostActionConfig,
    ) -> Result<bool, PromptError> {
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// HumanPromptRegistry
// ---------------------------------------------------------------------------

/// A question waiting for a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptRequest {
    Recovery {
        run_id: String,
        node_id: String,
        node_name: String,
        error_message: String,
    },
    Preview {
        run_id: String,
        node_id: String,
        node_name: String,
        data: Value,
        config: PostActionConfig,
    },
}

type PromptKey = (String, String);

struct Inner {
    recovery: Mutex<HashMap<PromptKey, oneshot::Sender<RecoveryDecision>>>,
    preview: Mutex<HashMap<PromptKey, oneshot::Sender<bool>>>,
    requests: broadcast::Sender<PromptRequest>,
}

/// Routes recovery and preview questions to whoever answers them.
///
/// Clones share the same registry. Hand one clone to the engine builder
/// (as both `recovery` and `preview`) and keep another to answer with.
#[derive(Clone)]
pub struct HumanPromptRegistry {
    inner: Arc<Inner>,
}

impl HumanPromptRegistry {
    pub fn new(capacity: usize) -> Self {
        let (requests, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                recovery: Mutex::new(HashMap::new()),
                preview: Mutex::new(HashMap::new()),
                requests,
            }),
        }
    }

    /// Receive every question asked from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PromptRequest> {
        self.inner.requests.subscribe()
    }

    /// Answer the pending recovery question for `(run_id, node_id)`.
    pub fn decide_recovery(
        &self,
        run_id: &str,
        node_id: &str,
        decision: RecoveryDecision,
    ) -> Result<(), PromptError> {
        let sender = take(&self.inner.recovery, run_id, node_id)?;
        sender.send(decision).map_err(|_| PromptError::Closed)
    }

    /// Answer the pending preview question for `(run_id, node_id)`.
    pub fn answer_preview(
        &self,
        run_id: &str,
        node_id: &str,
        confirmed: bool,
    ) -> Result<(), PromptError> {
        let sender = take(&self.inner.preview, run_id, node_id)?;
        sender.send(confirmed).map_err(|_| PromptError::Closed)
    }

    /// Drop every question pending for `run_id`. Waiting callers get
    /// [`PromptError::Closed`].
    pub fn cancel_run(&self, run_id: &str) {
        self.inner.recovery.lock().retain(|(r, _), _| r != run_id);
        self.inner.preview.lock().retain(|(r, _), _| r != run_id);
    }

    /// `(run_id, node_id)` pairs with an unanswered recovery question.
    pub fn pending_recoveries(&self) -> Vec<(String, String)> {
        pending(&self.inner.recovery)
    }

    /// `(run_id, node_id)` pairs with an unanswered preview question.
    pub fn pending_previews(&self) -> Vec<(String, String)> {
        pending(&self.inner.preview)
    }

    fn announce(&self, request: PromptRequest) {
        // No subscribers is fine: answers may come from elsewhere.
        let _ = self.inner.requests.send(request);
    }
}

impl Default for HumanPromptRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

impl std::fmt::Debug for HumanPromptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HumanPromptRegistry")
            .field("pending_recoveries", &self.inner.recovery.lock().len())
            .field("pending_previews", &self.inner.preview.lock().len())
            .finish()
    }
}

/// Removes a question's entry when the asking call ends, whether it was
/// answered, closed, or dropped mid-wait by a cancelled run.
struct PendingEntry<'a, T> {
    map: &'a Mutex<HashMap<PromptKey, oneshot::Sender<T>>>,
    key: PromptKey,
}

impl<T> Drop for PendingEntry<'_, T> {
    fn drop(&mut self) {
        self.map.lock().remove(&self.key);
    }
}

/// Register a waiter. A stale entry whose receiver is gone is replaced.
fn register<'a, T>(
    map: &'a Mutex<HashMap<PromptKey, oneshot::Sender<T>>>,
    run_id: &str,
    node_id: &str,
) -> Result<(PendingEntry<'a, T>, oneshot::Receiver<T>), PromptError> {
    let key = (run_id.to_string(), node_id.to_string());
    let mut guard = map.lock();
    if guard.get(&key).is_some_and(|tx| !tx.is_closed()) {
        return Err(PromptError::AlreadyPending {
            run_id: key.0,
            node_id: key.1,
        });
    }
    let (tx, rx) = oneshot::channel();
    guard.insert(key.clone(), tx);
    Ok((PendingEntry { map, key }, rx))
}

fn take<T>(
    map: &Mutex<HashMap<PromptKey, oneshot::Sender<T>>>,
    run_id: &str,
    node_id: &str,
) -> Result<oneshot::Sender<T>, PromptError> {
    map.lock()
        .remove(&(run_id.to_string(), node_id.to_string()))
        .ok_or_else(|| PromptError::NotPending {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
        })
}

fn pending<T>(map: &Mutex<HashMap<PromptKey, oneshot::Sender<T>>>) -> Vec<PromptKey> {
    let mut keys: Vec<PromptKey> = map
        .lock()
        .iter()
        .filter(|(_, tx)| !tx.is_closed())
        .map(|(k, _)| k.clone())
        .collect();
    keys.sort();
    keys
}

#[async_trait]
impl RecoveryPrompt for HumanPromptRegistry {
    async fn ask_recovery_decision(
        &self,
        run_id: &str,
        node: &PromptNode,
        error_message: &str,
    ) -> Result<RecoveryDecision, PromptError> {
        let (_entry, rx) = register(&self.inner.recovery, run_id, &node.id)?;
        self.announce(PromptRequest::Recovery {
            run_id: run_id.to_string(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            error_message: error_message.to_string(),
        });
        tracing::info!(%run_id, node_id = %node.id, "waiting for recovery decision");
        rx.await.map_err(|_| PromptError::Closed)
    }
}

#[async_trait]
impl ActionPreview for HumanPromptRegistry {
    async fn confirm_action(
        &self,
        run_id: &str,
        node: &PromptNode,
        data: &Value,
        config: &PostActionConfig,
    ) -> Result<bool, PromptError> {
        let (_entry, rx) = register(&self.inner.preview, run_id, &node.id)?;
        self.announce(PromptRequest::Preview {
            run_id: run_id.to_string(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            data: data.clone(),
            config: config.clone(),
        });
        tracing::info!(%run_id, node_id = %node.id, "waiting for action preview");
        rx.await.map_err(|_| PromptError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn recovery_round_trip_through_registry() {
        let registry = HumanPromptRegistry::default();
        let mut requests = registry.subscribe();
        let node = PromptNode::new("n1", "Node one");

        let asker = registry.clone();
        let ask = tokio::spawn(async move {
            asker
                .ask_recovery_decision("run-1", &node, "server error")
                .await
        });

        let request = requests.recv().await.unwrap();
        assert!(matches!(
            request,
            PromptRequest::Recovery { ref node_id, ref error_message, .. }
                if node_id == "n1" && error_message == "server error"
        ));
        assert_eq!(
            registry.pending_recoveries(),
            vec![("run-1".to_string(), "n1".to_string())]
        );

        registry
            .decide_recovery("run-1", "n1", RecoveryDecision::Retry)
            .unwrap();
        assert_eq!(ask.await.unwrap().unwrap(), RecoveryDecision::Retry);
        assert!(registry.pending_recoveries().is_empty());
    }

    #[tokio::test]
    async fn preview_answer_and_unknown_key() {
        let registry = HumanPromptRegistry::default();
        let mut requests = registry.subscribe();
        let node = PromptNode::new("n1", "Node one");

        let err = registry.answer_preview("run-1", "n1", true).unwrap_err();
        assert!(matches!(err, PromptError::NotPending { .. }));

        let asker = registry.clone();
        let ask = tokio::spawn(async move {
            asker
                .confirm_action("run-1", &node, &json!([1, 2]), &PostActionConfig::default())
                .await
        });
        let request = requests.recv().await.unwrap();
        assert!(matches!(request, PromptRequest::Preview { ref data, .. } if data == &json!([1, 2])));

        registry.answer_preview("run-1", "n1", false).unwrap();
        assert!(!ask.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn cancel_run_closes_waiters() {
        let registry = HumanPromptRegistry::default();
        let mut requests = registry.subscribe();
        let node = PromptNode::new("n1", "Node one");

        let asker = registry.clone();
        let ask =
            tokio::spawn(async move { asker.ask_recovery_decision("run-1", &node, "x").await });
        requests.recv().await.unwrap();

        registry.cancel_run("run-1");
        assert!(matches!(ask.await.unwrap(), Err(PromptError::Closed)));
    }

    #[tokio::test]
    async fn second_question_for_same_node_is_rejected() {
        let registry = HumanPromptRegistry::default();
        let mut requests = registry.subscribe();
        let node = PromptNode::new("n1", "Node one");

        let asker = registry.clone();
        let first_node = node.clone();
        let _first =
            tokio::spawn(async move { asker.ask_recovery_decision("run-1", &first_node, "x").await });
        requests.recv().await.unwrap();

        let err = registry
            .ask_recovery_decision("run-1", &node, "y")
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::AlreadyPending { .. }));
    }

    #[tokio::test]
    async fn abandoned_question_leaves_no_entry() {
        let registry = HumanPromptRegistry::default();
        let mut requests = registry.subscribe();
        let node = PromptNode::new("n1", "Node one");

        for round in 0..3 {
            let asker = registry.clone();
            let asked = node.clone();
            let ask = tokio::spawn(async move {
                asker.ask_recovery_decision("run-1", &asked, "x").await
            });
            requests.recv().await.unwrap();
            assert_eq!(registry.inner.recovery.lock().len(), 1, "round {round}");

            // A cancelled run drops the waiting future.
            ask.abort();
            assert!(ask.await.unwrap_err().is_cancelled());
            assert!(registry.inner.recovery.lock().is_empty(), "round {round}");
        }

        assert!(registry.pending_recoveries().is_empty());
        let err = registry
            .decide_recovery("run-1", "n1", RecoveryDecision::Stop)
            .unwrap_err();
        assert!(matches!(err, PromptError::NotPending { .. }));
    }

    #[tokio::test]
    async fn answered_questions_leave_no_entry() {
        let registry = HumanPromptRegistry::default();
        let mut requests = registry.subscribe();
        let node = PromptNode::new("n1", "Node one");

        let asker = registry.clone();
        let ask = tokio::spawn(async move {
            asker
                .confirm_action("run-1", &node, &json!([]), &PostActionConfig::default())
                .await
        });
        requests.recv().await.unwrap();
        registry.answer_preview("run-1", "n1", true).unwrap();
        assert!(ask.await.unwrap().unwrap());
        assert!(registry.inner.preview.lock().is_empty());
    }

    #[tokio::test]
    async fn fixed_answers() {
        let node = PromptNode::new("n1", "Node one");
        let decision = FixedRecovery(RecoveryDecision::Skip)
            .ask_recovery_decision("run-1", &node, "x")
            .await
            .unwrap();
        assert_eq!(decision, RecoveryDecision::Skip);
        assert!(AutoConfirm
            .confirm_action("run-1", &node, &json!([]), &PostActionConfig::default())
            .await
            .unwrap());
    }
}
