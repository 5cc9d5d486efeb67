//! Caller-facing run control: pause, resume, cancel, and live progress.
//!
//! A [`RunControl`] is created per run and shared between the caller and the
//! orchestrator. The orchestrator only reads the flags at its checkpoints;
//! it never consults ambient global state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::types::CascadeProgress;

struct Inner {
    paused: AtomicBool,
    cancel_tx: watch::Sender<bool>,
    progress: RwLock<CascadeProgress>,
}

/// Cloneable handle over one run's control flags and progress.
#[derive(Clone)]
pub struct RunControl {
    inner: Arc<Inner>,
}

impl RunControl {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                paused: AtomicBool::new(false),
                cancel_tx,
                progress: RwLock::new(CascadeProgress::default()),
            }),
        }
    }

    /// Request a pause. Takes effect at the next node checkpoint.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    /// Request cancellation. Honoured at the next checkpoint, including
    /// while paused, and aborts an in-flight generation stream.
    pub fn cancel(&self) {
        self.inner.cancel_tx.send_replace(true);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel_tx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancel_tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Snapshot of the run's progress.
    pub fn progress(&self) -> CascadeProgress {
        self.inner.progress.read().clone()
    }

    pub(crate) fn update_progress(&self, f: impl FnOnce(&mut CascadeProgress)) {
        f(&mut self.inner.progress.write());
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("paused", &self.is_paused())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunStatus;
    use std::time::Duration;

    #[test]
    fn flags_toggle() {
        let control = RunControl::new();
        assert!(!control.is_paused());
        control.pause();
        assert!(control.is_paused());
        control.resume();
        assert!(!control.is_paused());

        assert!(!control.is_cancelled());
        control.cancel();
        assert!(control.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let control = RunControl::new();
        let caller = control.clone();
        caller.cancel();
        assert!(control.is_cancelled());

        control.update_progress(|p| {
            p.status = RunStatus::Running;
            p.completed_prompts = 2;
        });
        assert_eq!(caller.progress().completed_prompts, 2);
        assert_eq!(caller.progress().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let control = RunControl::new();
        let waiter = control.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;
        control.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_cancelled() {
        let control = RunControl::new();
        control.cancel();
        tokio::time::timeout(Duration::from_millis(100), control.cancelled())
            .await
            .expect("already cancelled");
    }
}
