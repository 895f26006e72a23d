//! Shared receiver registry
//!
//! Every consumer listening on the same endpoint shares one
//! [`TransportReceiver`]. The receiver is started by the first
//! subscription and torn down when its last subscription goes away.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use super::{ReceiverStats, SkeletonSink, TransportReceiver};
use crate::error::TransportError;

/// Handle returned by [`ReceiverRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Endpoint to receiver map, owned by the application
#[derive(Debug, Default)]
pub struct ReceiverRegistry {
    receivers: HashMap<SocketAddr, TransportReceiver>,
    subscriptions: HashMap<SubscriptionId, SocketAddr>,
    next_id: u64,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `sink` to the receiver for `endpoint`, starting one if needed.
    ///
    /// On start failure nothing is registered and the error is returned.
    pub fn subscribe(
        &mut self,
        endpoint: SocketAddr,
        sink: Arc<dyn SkeletonSink>,
    ) -> Result<SubscriptionId, TransportError> {
        if !self.receivers.contains_key(&endpoint) {
            let receiver = TransportReceiver::start(endpoint)?;
            self.receivers.insert(endpoint, receiver);
        }

        self.next_id += 1;
        let id = SubscriptionId(self.next_id);

        if let Some(receiver) = self.receivers.get(&endpoint) {
            receiver.add_subscriber(id, sink);
        }
        self.subscriptions.insert(id, endpoint);

        tracing::debug!("{} subscribed to {}", id, endpoint);
        Ok(id)
    }

    /// Detach a subscription. Stops and drops the receiver when it was the
    /// last one. Returns false for an unknown id.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(endpoint) = self.subscriptions.remove(&id) else {
            return false;
        };

        let now_empty = match self.receivers.get(&endpoint) {
            Some(receiver) => {
                receiver.remove_subscriber(id);
                receiver.subscriber_count() == 0
            }
            None => false,
        };

        if now_empty {
            if let Some(mut receiver) = self.receivers.remove(&endpoint) {
                receiver.stop();
            }
        }

        tracing::debug!("{} unsubscribed from {}", id, endpoint);
        true
    }

    /// Shut everything down.
    ///
    /// Every subscriber is detached first so none is called during teardown,
    /// then every receiver is stopped. Safe to call more than once.
    pub fn stop_all(&mut self) {
        for receiver in self.receivers.values() {
            receiver.clear_subscribers();
        }
        self.subscriptions.clear();

        for (_, mut receiver) in self.receivers.drain() {
            receiver.stop();
        }
    }

    /// Number of live receivers
    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    /// Subscribers on `endpoint` (0 when it has no receiver)
    pub fn subscriber_count(&self, endpoint: SocketAddr) -> usize {
        self.receivers
            .get(&endpoint)
            .map(|r| r.subscriber_count())
            .unwrap_or(0)
    }

    /// Bound address of the receiver for `endpoint`
    pub fn local_addr(&self, endpoint: SocketAddr) -> Option<SocketAddr> {
        self.receivers.get(&endpoint).map(|r| r.local_addr())
    }

    pub fn stats(&self, endpoint: SocketAddr) -> Option<ReceiverStats> {
        self.receivers.get(&endpoint).map(|r| r.stats())
    }
}

impl Drop for ReceiverRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}
