//! Subscriber registry.
//!
//! Each downstream connection owns the receiving half of a bounded queue.
//! A send that fails, because the queue is full or the connection is gone,
//! removes the subscriber on the spot. Dropping its sender closes the queue,
//! so the connection task winds down after draining what was already queued.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier of one subscriber connection.
pub type SubscriberId = Uuid;

/// Delivery counts for one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// Live subscriber set.
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Arc<str>>>>,
    buffer: usize,
}

impl SubscriberRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Add a subscriber and hand back its queue.
    pub fn register(&self) -> (SubscriberId, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.subscribers.write().insert(id, tx);
        debug!(subscriber = %id, "Subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "Subscriber unregistered");
        }
        removed
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Queue a payload for one subscriber, dropping it on failure.
    pub fn send_to(&self, id: SubscriberId, payload: Arc<str>) -> bool {
        let result = match self.subscribers.read().get(&id) {
            Some(tx) => tx.try_send(payload),
            None => return false,
        };
        if let Err(e) = result {
            warn!(subscriber = %id, error = %e, "Subscriber send failed, removing");
            self.unregister(id);
            return false;
        }
        true
    }

    /// Queue a payload for every subscriber, dropping the ones that fail.
    pub fn broadcast(&self, payload: Arc<str>) -> Delivery {
        let mut failed = Vec::new();
        let mut delivered = 0;
        {
            let subscribers = self.subscribers.read();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!(subscriber = %id, error = %e, "Subscriber send failed, removing");
                        failed.push(*id);
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &failed {
                subscribers.remove(id);
            }
        }

        Delivery {
            delivered,
            dropped: failed.len(),
        }
    }
}
