//! Subscription manager for broadcasting tracker events.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{
    DropReason, SubscriptionConfig, SubscriptionHandle, SubscriptionId, VersionBitsEvent,
};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<VersionBitsEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(&self, event: VersionBitsEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Manages subscriptions and broadcasts events.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Best effort
            let _ = sub.sender.try_send(VersionBitsEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Broadcast events in order to every subscription whose filter matches.
    pub fn broadcast_all(&self, events: impl IntoIterator<Item = VersionBitsEvent>) {
        for event in events {
            self.broadcast(event);
        }
    }

    /// Broadcast one event. Drops subscribers that fail to receive.
    pub fn broadcast(&self, event: VersionBitsEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.config.filter.matches(&event) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::warn!(subscription = id.0, "dropping slow subscriber");
                    // Might fail, that's ok
                    let _ = sub.sender.try_send(VersionBitsEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploymentParams;
    use crate::deployments::Deployment;
    use crate::error::ErrorKind;
    use crate::subscriptions::SubscriptionFilter;
    use std::time::Duration;

    fn update(id: &str) -> VersionBitsEvent {
        VersionBitsEvent::Update {
            deployment: Deployment::from_params(&DeploymentParams::new(id, 0, 0, 1)),
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = SubscriptionManager::new();

        let handle = manager.subscribe(SubscriptionConfig::default());
        assert_eq!(manager.subscription_count(), 1);

        manager.unsubscribe(handle.id);
        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(
            handle.recv_timeout(Duration::from_millis(100)).unwrap(),
            VersionBitsEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        );
    }

    #[test]
    fn test_broadcast_to_matching_ids() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::deployment_ids(vec!["csv".to_string()]),
            ..Default::default()
        });

        manager.broadcast(update("segwit"));
        manager.broadcast(update("csv"));

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(event.deployment_id(), Some("csv"));
        assert!(handle.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_lifecycle_filter() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::lifecycle(),
            ..Default::default()
        });

        manager.broadcast_all(vec![
            update("csv"),
            VersionBitsEvent::Ready,
            VersionBitsEvent::Error {
                kind: ErrorKind::Sequencing,
                message: "gap".into(),
            },
        ]);

        let events = handle.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], VersionBitsEvent::Ready);
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let manager = SubscriptionManager::new();
        let _handle = manager.subscribe(SubscriptionConfig {
            buffer_size: 2,
            filter: SubscriptionFilter::deployments(),
        });

        for _ in 0..10 {
            manager.broadcast(update("csv"));
        }

        assert_eq!(manager.subscription_count(), 0);
    }
}
