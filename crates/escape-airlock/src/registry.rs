// ABOUTME: Correlation registries for outstanding pokes and subscriptions
// ABOUTME: Maps request ids to completion senders and subscription handlers

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Outcome delivered to a waiting poke: `Err` carries the ship's error text.
pub type PokeOutcome = Result<(), String>;

/// Receives the events of one subscription.
///
/// Called from the channel's stream consumer, one event at a time and in the
/// order the ship sent them. Implementations should return quickly.
pub trait SubscriptionHandler: Send + Sync {
    fn on_fact(&self, id: u64, json: Value);

    fn on_error(&self, id: u64, err: String) {
        tracing::warn!(id, %err, "subscription rejected");
    }

    fn on_quit(&self, id: u64) {
        tracing::debug!(id, "subscription quit");
    }
}

/// Subscription events as messages, for handlers backed by a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Fact { id: u64, json: Value },
    Error { id: u64, err: String },
    Quit { id: u64 },
}

impl SubscriptionHandler for mpsc::UnboundedSender<SubscriptionEvent> {
    fn on_fact(&self, id: u64, json: Value) {
        // Receiver gone means the subscriber stopped listening
        let _ = self.send(SubscriptionEvent::Fact { id, json });
    }

    fn on_error(&self, id: u64, err: String) {
        let _ = self.send(SubscriptionEvent::Error { id, err });
    }

    fn on_quit(&self, id: u64) {
        let _ = self.send(SubscriptionEvent::Quit { id });
    }
}

/// Pokes waiting for their ack or err frame.
#[derive(Default)]
pub struct PokeRegistry {
    pending: HashMap<u64, oneshot::Sender<PokeOutcome>>,
}

impl PokeRegistry {
    pub fn insert(&mut self, id: u64, done: oneshot::Sender<PokeOutcome>) {
        self.pending.insert(id, done);
    }

    /// Complete the poke `id`. Returns false if nothing was waiting on it.
    pub fn resolve(&mut self, id: u64, outcome: PokeOutcome) -> bool {
        match self.pending.remove(&id) {
            Some(done) => {
                if done.send(outcome).is_err() {
                    tracing::debug!(id, "poke caller stopped waiting");
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every pending sender; waiting callers observe a closed channel.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// A live subscription.
#[derive(Clone)]
pub struct PendingSubscription {
    pub ship: String,
    pub app: String,
    pub path: String,
    pub handler: Arc<dyn SubscriptionHandler>,
}

impl std::fmt::Debug for PendingSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSubscription")
            .field("ship", &self.ship)
            .field("app", &self.app)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Subscriptions that can still receive facts.
#[derive(Default)]
pub struct SubscriptionRegistry {
    active: HashMap<u64, PendingSubscription>,
}

impl SubscriptionRegistry {
    pub fn insert(&mut self, id: u64, subscription: PendingSubscription) {
        self.active.insert(id, subscription);
    }

    /// Handler for `id`, cloned so it can be called without holding the registry.
    pub fn handler(&self, id: u64) -> Option<Arc<dyn SubscriptionHandler>> {
        self.active.get(&id).map(|s| Arc::clone(&s.handler))
    }

    pub fn remove(&mut self, id: u64) -> Option<PendingSubscription> {
        self.active.remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.active.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.active.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poke_resolved_once() {
        let mut registry = PokeRegistry::default();
        let (tx, mut rx) = oneshot::channel();
        registry.insert(7, tx);
        assert!(registry.contains(7));

        assert!(registry.resolve(7, Ok(())));
        assert!(!registry.contains(7));
        assert_eq!(rx.try_recv().unwrap(), Ok(()));

        // Second frame for the same id finds nothing
        assert!(!registry.resolve(7, Err("late".into())));
    }

    #[test]
    fn test_poke_resolve_with_dropped_receiver() {
        let mut registry = PokeRegistry::default();
        let (tx, rx) = oneshot::channel();
        registry.insert(1, tx);
        drop(rx);
        assert!(registry.resolve(1, Ok(())));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_poke_clear_closes_waiters() {
        let mut registry = PokeRegistry::default();
        let (tx, mut rx) = oneshot::channel();
        registry.insert(3, tx);
        registry.clear();
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_channel_handler_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = SubscriptionRegistry::default();
        registry.insert(
            2,
            PendingSubscription {
                ship: "zod".into(),
                app: "graph-store".into(),
                path: "/updates".into(),
                handler: Arc::new(tx),
            },
        );

        let handler = registry.handler(2).unwrap();
        handler.on_fact(2, serde_json::json!({"a": 1}));
        handler.on_quit(2);

        assert_eq!(
            rx.try_recv().unwrap(),
            SubscriptionEvent::Fact {
                id: 2,
                json: serde_json::json!({"a": 1})
            }
        );
        assert_eq!(rx.try_recv().unwrap(), SubscriptionEvent::Quit { id: 2 });
    }

    #[test]
    fn test_subscription_ids_sorted() {
        let (tx, _rx) = mpsc::unbounded_channel::<SubscriptionEvent>();
        let handler: Arc<dyn SubscriptionHandler> = Arc::new(tx);
        let mut registry = SubscriptionRegistry::default();
        for id in [9, 3, 5] {
            registry.insert(
                id,
                PendingSubscription {
                    ship: "zod".into(),
                    app: "app".into(),
                    path: "/".into(),
                    handler: Arc::clone(&handler),
                },
            );
        }
        assert_eq!(registry.ids(), vec![3, 5, 9]);
        assert!(registry.remove(5).is_some());
        assert!(registry.remove(5).is_none());
        assert_eq!(registry.len(), 2);
    }
}
