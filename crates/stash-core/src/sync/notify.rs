//! In-process change notifications.
//!
//! Consumers register explicitly and receive a [`ChangeEvent`] after every
//! completed sync cycle. Subscriptions live until [`ChangeNotifier::unsubscribe`]
//! is called; a dropped receiver is pruned on the next publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Keys touched by one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Keys whose local value changed because of remote state.
    pub updated_keys: Vec<String>,
    /// Keys pushed to the server during the cycle.
    pub pushed_keys: Vec<String>,
    /// Watermark after the cycle.
    pub last_synced_at: i64,
}

impl ChangeEvent {
    pub fn is_empty(&self) -> bool {
        self.updated_keys.is_empty() && self.pushed_keys.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Receiving end handed to a subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event; `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Next already-delivered event, if any.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Observer registry the scheduler publishes into.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionId, UnboundedSender<ChangeEvent>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, sender);
        Subscription { id, receiver }
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&self, event: &ChangeEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|_, sender| sender.send(event.clone()).is_ok());
    }
}
