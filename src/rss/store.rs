//! Persistence collaborator for subscriptions and delivery ledgers.
//!
//! [`SqliteStore`](super::repository::SqliteStore) is the durable
//! implementation; [`MemoryStore`] keeps everything in process.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::ledger::Ledger;
use super::types::{SubscriberId, Subscription, SubscriptionStatistic};
use crate::error::{FeedwatchError, Result};

/// Storage of subscription records and per-pair ledgers.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Every subscriber holding at least one subscription, ascending.
    async fn list_subscribers(&self) -> Result<Vec<SubscriberId>>;

    /// A subscriber's subscriptions, oldest first.
    async fn list_subscriptions(&self, subscriber_id: SubscriberId) -> Result<Vec<Subscription>>;

    /// Look up one subscription.
    async fn get_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<Option<Subscription>>;

    /// Insert a subscription. Fails if the subscriber already holds its id.
    async fn add_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription: &Subscription,
    ) -> Result<()>;

    /// Replace an existing subscription record.
    async fn update_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription: &Subscription,
    ) -> Result<()>;

    /// Delete a subscription record. Returns whether it existed.
    async fn remove_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<bool>;

    /// Load a ledger; a pair with no ledger yields an empty one.
    async fn load_ledger(&self, subscriber_id: SubscriberId, subscription_id: &str)
        -> Result<Ledger>;

    /// Replace a pair's ledger.
    async fn save_ledger(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
        ledger: &Ledger,
    ) -> Result<()>;

    /// Drop a pair's ledger.
    async fn delete_ledger(&self, subscriber_id: SubscriberId, subscription_id: &str)
        -> Result<()>;

    /// Feeds ordered by subscriber count, most popular first.
    async fn top_subscriptions(&self, limit: usize) -> Result<Vec<SubscriptionStatistic>>;
}

pub(crate) fn duplicate_subscription(subscription: &Subscription) -> FeedwatchError {
    FeedwatchError::Validation(format!(
        "already subscribed to {} ({})",
        subscription.title, subscription.link
    ))
}

#[derive(Debug, Default)]
struct MemoryState {
    subscriptions: BTreeMap<SubscriberId, Vec<Subscription>>,
    ledgers: HashMap<(SubscriberId, String), Ledger>,
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn list_subscribers(&self) -> Result<Vec<SubscriberId>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|(_, subs)| !subs.is_empty())
            .map(|(id, _)| *id)
            .collect())
    }

    async fn list_subscriptions(&self, subscriber_id: SubscriberId) -> Result<Vec<Subscription>> {
        let state = self.state.read().await;
        let mut subs = state
            .subscriptions
            .get(&subscriber_id)
            .cloned()
            .unwrap_or_default();
        subs.sort_by_key(|s| s.created_at);
        Ok(subs)
    }

    async fn get_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .get(&subscriber_id)
            .and_then(|subs| subs.iter().find(|s| s.id == subscription_id))
            .cloned())
    }

    async fn add_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription: &Subscription,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let subs = state.subscriptions.entry(subscriber_id).or_default();
        if let Some(existing) = subs.iter().find(|s| s.id == subscription.id) {
            return Err(duplicate_subscription(existing));
        }
        subs.push(subscription.clone());
        Ok(())
    }

    async fn update_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription: &Subscription,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let existing = state
            .subscriptions
            .get_mut(&subscriber_id)
            .and_then(|subs| subs.iter_mut().find(|s| s.id == subscription.id))
            .ok_or_else(|| FeedwatchError::NotFound("subscription".to_string()))?;
        *existing = subscription.clone();
        Ok(())
    }

    async fn remove_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(subs) = state.subscriptions.get_mut(&subscriber_id) else {
            return Ok(false);
        };
        let before = subs.len();
        subs.retain(|s| s.id != subscription_id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            state.subscriptions.remove(&subscriber_id);
        }
        Ok(removed)
    }

    async fn load_ledger(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<Ledger> {
        let state = self.state.read().await;
        Ok(state
            .ledgers
            .get(&(subscriber_id, subscription_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_ledger(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
        ledger: &Ledger,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .ledgers
            .insert((subscriber_id, subscription_id.to_string()), ledger.clone());
        Ok(())
    }

    async fn delete_ledger(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .ledgers
            .remove(&(subscriber_id, subscription_id.to_string()));
        Ok(())
    }

    async fn top_subscriptions(&self, limit: usize) -> Result<Vec<SubscriptionStatistic>> {
        let state = self.state.read().await;
        let mut by_feed: HashMap<&str, SubscriptionStatistic> = HashMap::new();

        for sub in state.subscriptions.values().flatten() {
            by_feed
                .entry(sub.id.as_str())
                .and_modify(|stat| {
                    stat.count += 1;
                    if sub.created_at < stat.subscription.created_at {
                        stat.subscription = sub.clone();
                    }
                })
                .or_insert_with(|| SubscriptionStatistic {
                    subscription: sub.clone(),
                    count: 1,
                });
        }

        let mut stats: Vec<SubscriptionStatistic> = by_feed.into_values().collect();
        stats.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.subscription.id.cmp(&b.subscription.id))
        });
        stats.truncate(limit);
        Ok(stats)
    }
}
