//! Observer registry: which subscribers watch which feed URL.
//!
//! Keyed by the literal subscribed URL, since that is what the poller
//! fetches. Each (URL, subscriber) pair holds exactly one [`Observer`].

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::types::{Observer, SubscriberId};

/// Registry shared between the scheduler and the subscription service.
///
/// Locks are held only for the map operation itself, never across a fetch,
/// so registration never waits on network I/O.
#[derive(Debug, Default)]
pub struct ObserverRegistry {
    observers: RwLock<HashMap<String, HashMap<SubscriberId, Observer>>>,
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` for `url`, replacing any previous registration of
    /// the same subscriber.
    ///
    /// Returns true when the URL had no observers before this call.
    pub async fn add_observer(&self, url: &str, observer: Observer) -> bool {
        let mut observers = self.observers.write().await;
        let entry = observers.entry(url.to_string()).or_default();
        let first = entry.is_empty();
        entry.insert(observer.subscriber_id, observer);
        first
    }

    /// Remove the subscriber's registration for `url` only when it still
    /// belongs to `subscription_id`.
    ///
    /// A registration of the same subscriber under another subscription is
    /// left in place. Removing a pair that was never registered is a no-op.
    /// The URL entry stays addressable even when its last observer leaves.
    pub async fn remove_observer_if(
        &self,
        url: &str,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Option<Observer> {
        let mut observers = self.observers.write().await;
        let entry = observers.get_mut(url)?;
        let owned = entry
            .get(&subscriber_id)
            .is_some_and(|current| current.subscription_id == subscription_id);
        if owned {
            entry.remove(&subscriber_id)
        } else {
            None
        }
    }

    /// All observers of `url`, ordered by subscriber.
    pub async fn observers_for(&self, url: &str) -> Vec<Observer> {
        let observers = self.observers.read().await;
        let mut result: Vec<Observer> = observers
            .get(url)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default();
        result.sort_by_key(|o| o.subscriber_id);
        result
    }

    /// The subscriber's current registration for `url`, if any.
    pub async fn observer(&self, url: &str, subscriber_id: SubscriberId) -> Option<Observer> {
        let observers = self.observers.read().await;
        observers
            .get(url)
            .and_then(|entry| entry.get(&subscriber_id))
            .cloned()
    }

    /// Point-in-time copy of every URL that has at least one observer.
    ///
    /// Sorted by URL for stable cycle ordering.
    pub async fn snapshot(&self) -> Vec<(String, Vec<Observer>)> {
        let observers = self.observers.read().await;
        let mut result: Vec<(String, Vec<Observer>)> = observers
            .iter()
            .filter(|(_, entry)| !entry.is_empty())
            .map(|(url, entry)| {
                let mut list: Vec<Observer> = entry.values().cloned().collect();
                list.sort_by_key(|o| o.subscriber_id);
                (url.clone(), list)
            })
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Number of URLs with at least one observer.
    pub async fn url_count(&self) -> usize {
        let observers = self.observers.read().await;
        observers.values().filter(|entry| !entry.is_empty()).count()
    }

    /// Total number of registrations.
    pub async fn observer_count(&self) -> usize {
        let observers = self.observers.read().await;
        observers.values().map(HashMap::len).sum()
    }
}
