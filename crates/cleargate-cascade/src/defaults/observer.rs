//! Observer that fans events out over a broadcast channel.

use tokio::sync::broadcast;

use crate::event::CascadeEvent;
use crate::traits::CascadeObserver;

/// Re-publishes every event to any number of subscribers.
///
/// Unlike the per-run receiver on a handle, one `BroadcastObserver` sees
/// every run of the engine it is installed on.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<CascadeEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CascadeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new(256)
    }
}

impl CascadeObserver for BroadcastObserver {
    fn on_event(&self, event: &CascadeEvent) {
        // Lagging or absent subscribers are not the orchestrator's problem.
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CascadeEventKind;

    fn event(seq: u64) -> CascadeEvent {
        CascadeEvent {
            seq,
            schema_version: 1,
            run_id: "run-1".into(),
            timestamp: chrono::Utc::now(),
            kind: CascadeEventKind::CascadePaused,
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let observer = BroadcastObserver::default();
        let mut a = observer.subscribe();
        let mut b = observer.subscribe();
        assert_eq!(observer.subscriber_count(), 2);

        observer.on_event(&event(1));
        observer.on_event(&event(2));

        assert_eq!(a.recv().await.unwrap().seq, 1);
        assert_eq!(a.recv().await.unwrap().seq, 2);
        assert_eq!(b.recv().await.unwrap().seq, 1);
    }

    #[test]
    fn no_subscribers_is_fine() {
        BroadcastObserver::new(0).on_event(&event(1));
    }
}
