//! Domain Event Bus (spec §4.7): an in-process publish/subscribe hub built
//! on `tokio::sync::broadcast`, the same primitive the teacher uses to fan
//! pipeline output out to websocket subscribers in `factory/server.rs` and
//! `factory/ws.rs`. Here the payload is a typed `DomainEvent` instead of a
//! pre-serialized string, and handlers run in-process rather than over a
//! socket.

use kagan_common::DomainEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

const CHANNEL_CAPACITY: usize = 1024;

type Handler = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
    handlers: Arc<std::sync::Mutex<Vec<Handler>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            handlers: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Subscribers each get their own receiver; a lagging subscriber drops
    /// the oldest events rather than blocking publishers.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// In-process handlers run synchronously on publish but are isolated
    /// from each other: a panic in one handler does not stop the others or
    /// the publisher, matching the "isolated handler failures" requirement.
    pub fn add_handler<F>(&self, handler: F)
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        self.handlers.lock().unwrap().push(Arc::new(handler));
    }

    /// Never blocks the caller: broadcasting to zero receivers is not an
    /// error, and handler panics are caught so one bad handler cannot take
    /// down the publisher (which is usually inside a storage transaction's
    /// post-commit hook).
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.tx.send(event.clone());
        let handlers = self.handlers.lock().unwrap().clone();
        for handler in handlers {
            let event = event.clone();
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&event))).is_err()
            {
                warn!(kind = event.kind(), "domain event handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kagan_common::new_id;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn handler_receives_published_event() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.add_handler(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(DomainEvent::CoreHostRunning {
            event_id: new_id(),
            occurred_at: chrono::Utc::now(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_other_handlers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.add_handler(|_event| panic!("boom"));
        bus.add_handler(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(DomainEvent::CoreHostRunning {
            event_id: new_id(),
            occurred_at: chrono::Utc::now(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscriber_receives_broadcast_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(DomainEvent::CoreHostRunning {
            event_id: new_id(),
            occurred_at: chrono::Utc::now(),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind(), "CoreHostRunning");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_error() {
        let bus = EventBus::new();
        bus.publish(DomainEvent::CoreHostRunning {
            event_id: new_id(),
            occurred_at: chrono::Utc::now(),
        });
    }
}
