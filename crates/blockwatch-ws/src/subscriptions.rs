//! WebSocket subscription routing.
//!
//! Maps `eth_subscription` notifications to the channels handed out by
//! `subscribe_heads`, and fails every subscription when the socket dies.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use blockwatch_core::{BlockHeader, WatchError};

/// Notifications kept for a subscription id nobody has claimed yet.
const MAX_UNCLAIMED: usize = 16;

/// Unclaimed ids kept at once; the oldest is evicted first.
const MAX_UNCLAIMED_IDS: usize = 8;

/// A unique subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct SubscriptionEntry {
    headers: mpsc::UnboundedSender<BlockHeader>,
    errors: mpsc::UnboundedSender<WatchError>,
}

impl SubscriptionEntry {
    fn forward(&self, id: &SubscriptionId, message: &Value) {
        match BlockHeader::from_json(message) {
            Some(header) => {
                let _ = self.headers.send(header);
            }
            None => {
                tracing::warn!(subscription = %id, "notification is not a block header, dropping");
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<SubscriptionId, SubscriptionEntry>,
    // The node may push a notification before the eth_subscribe response
    // has reached the caller that registers the id. Late notifications for
    // removed ids land here too, hence the bound.
    unclaimed: VecDeque<(SubscriptionId, Vec<Value>)>,
    // Set once the socket is gone.
    closed: Option<String>,
}

impl Inner {
    fn take_unclaimed(&mut self, id: &SubscriptionId) -> Option<Vec<Value>> {
        let pos = self.unclaimed.iter().position(|(u, _)| *u == *id)?;
        self.unclaimed.remove(pos).map(|(_, early)| early)
    }

    fn stash(&mut self, id: &SubscriptionId, message: Value) {
        if let Some((_, early)) = self.unclaimed.iter_mut().find(|(u, _)| *u == *id) {
            if early.len() < MAX_UNCLAIMED {
                early.push(message);
            }
            return;
        }
        if self.unclaimed.len() >= MAX_UNCLAIMED_IDS {
            if let Some((evicted, _)) = self.unclaimed.pop_front() {
                tracing::debug!(subscription = %evicted, "dropping unclaimed notifications");
            }
        }
        self.unclaimed.push_back((id.clone(), vec![message]));
    }
}

/// Routes notifications for the live subscriptions on one connection.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    inner: Arc<Mutex<Inner>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription and return its (headers, errors) receivers.
    pub fn register(
        &self,
        id: SubscriptionId,
    ) -> (
        mpsc::UnboundedReceiver<BlockHeader>,
        mpsc::UnboundedReceiver<WatchError>,
    ) {
        let (htx, hrx) = mpsc::unbounded_channel();
        let (etx, erx) = mpsc::unbounded_channel();
        let entry = SubscriptionEntry {
            headers: htx,
            errors: etx,
        };

        let mut inner = self.inner.lock().unwrap();
        if let Some(early) = inner.take_unclaimed(&id) {
            for message in &early {
                entry.forward(&id, message);
            }
        }
        if let Some(reason) = &inner.closed {
            // The socket died between the eth_subscribe response and now.
            let _ = entry.errors.send(WatchError::WebSocket(reason.clone()));
            return (hrx, erx);
        }
        inner.entries.insert(id, entry);
        (hrx, erx)
    }

    /// Forward an incoming notification to the matching subscription.
    pub fn dispatch(&self, id: &SubscriptionId, message: Value) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get(id) {
            entry.forward(id, &message);
            return;
        }
        inner.stash(id, message);
    }

    /// Remove a subscription (e.g. after `eth_unsubscribe`).
    pub fn remove(&self, id: &SubscriptionId) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.remove(id);
        inner.take_unclaimed(id);
    }

    /// Send `reason` to every subscription and drop them all.
    ///
    /// Dropping the entries also closes each header channel. Later
    /// registrations fail the same way.
    pub fn fail_all(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = Some(reason.to_string());
        for (id, entry) in inner.entries.drain() {
            tracing::debug!(subscription = %id, reason, "failing subscription");
            let _ = entry.errors.send(WatchError::WebSocket(reason.to_string()));
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Returns `true` if there are no live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
