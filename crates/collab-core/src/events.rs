//! Engine event infrastructure.
//!
//! `EngineEvent` carries the observable engine happenings (connection
//! transitions, document syncs, presence and conflict activity) and
//! `EventBus` fans them out to subscribers. Subscriptions follow the
//! disposer pattern: hold the `Subscription` to keep receiving events,
//! drop it to unsubscribe.

use crate::conflict::ConflictType;
use crate::supervisor::ConnectionState;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted by the engine for hosts and monitoring.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Connection state machine transitioned.
    ConnectionChanged {
        #[serde(skip)]
        state: ConnectionState,
    },
    /// A remote update changed a document's visible content.
    DocumentSynced { path: String },
    /// A remote user's presence appeared, moved, or cleared.
    PresenceChanged { user_id: String, cleared: bool },
    /// A conflict reached a terminal resolution.
    ConflictResolved {
        path: String,
        #[serde(skip)]
        conflict_type: ConflictType,
    },
    /// The offline queue finished a replay pass.
    QueueReplayed { applied: usize, remaining: usize },
    /// The vault tree changed from a remote metadata update.
    VaultTreeChanged { path: String, removed: bool },
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Fan-out bus for engine events. Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(EngineEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns a `Subscription` that unsubscribes on
    /// drop; requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(EngineEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(cb_id, _)| *cb_id != id);
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: EngineEvent) {
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        for (_, callback) in callbacks.iter() {
            callback(event.clone());
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_publish_reaches_subscriber() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_cb = Arc::clone(&seen);
        let _sub = bus.subscribe(move |event| {
            if let EngineEvent::DocumentSynced { path } = event {
                seen_cb.lock().unwrap().push(path);
            }
        });

        bus.publish(EngineEvent::DocumentSynced { path: "a.md".into() });

        assert_eq!(seen.lock().unwrap().as_slice(), &["a.md".to_string()]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = Arc::new(EventBus::new());

        let sub = bus.subscribe(|_| {});
        assert_eq!(bus.subscriber_count(), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_multiple_subscribers_all_notified() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(Mutex::new(0usize));

        let c1 = Arc::clone(&count);
        let _s1 = bus.subscribe(move |_| *c1.lock().unwrap() += 1);
        let c2 = Arc::clone(&count);
        let _s2 = bus.subscribe(move |_| *c2.lock().unwrap() += 1);

        bus.publish(EngineEvent::QueueReplayed {
            applied: 1,
            remaining: 0,
        });

        assert_eq!(*count.lock().unwrap(), 2);
    }
}
