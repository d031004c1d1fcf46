//! Subscription service.
//!
//! Front door for subscribe/unsubscribe and the other subscriber-facing
//! operations. Keeps the store, the ledgers and the observer registry in
//! step.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{FeedwatchError, Result};
use crate::rss::fetcher::validate_url;
use crate::rss::ledger::Ledger;
use crate::rss::store::{duplicate_subscription, SubscriptionStore};
use crate::rss::types::{Item, Observer, SubscriberId, Subscription, SubscriptionStatistic};
use crate::rss::updater::FeedMonitor;

/// Result of a successful subscribe.
#[derive(Debug, Clone)]
pub struct SubscribeOutcome {
    /// The stored subscription.
    pub subscription: Subscription,
    /// Latest item of the initial fetch, shown once.
    pub preview: Option<Item>,
}

/// Subscription service.
#[derive(Clone)]
pub struct FeedService {
    monitor: Arc<FeedMonitor>,
}

impl FeedService {
    /// Create a new FeedService over a monitor.
    pub fn new(monitor: Arc<FeedMonitor>) -> Self {
        Self { monitor }
    }

    fn store(&self) -> &Arc<dyn SubscriptionStore> {
        self.monitor.store()
    }

    /// Subscribe to a feed URL.
    ///
    /// The initial items are marked delivered without being sent; only the
    /// latest one comes back as a preview.
    pub async fn subscribe(&self, subscriber_id: SubscriberId, url: &str) -> Result<SubscribeOutcome> {
        let url = url.trim();
        validate_url(url)?;

        let feed = self.monitor.source().fetch(url).await?;

        if let Some(existing) = self.store().get_subscription(subscriber_id, &feed.id).await? {
            return Err(duplicate_subscription(&existing));
        }
        // The registry holds one observer per (URL, subscriber), so a feed
        // whose identity changed must not be subscribed twice under one URL
        if let Some(existing) = self
            .store()
            .list_subscriptions(subscriber_id)
            .await?
            .into_iter()
            .find(|s| s.link == url)
        {
            return Err(duplicate_subscription(&existing));
        }

        let subscription = Subscription::from_feed(&feed, url);
        {
            let _guard = self.monitor.lock_ledger(subscriber_id, &subscription.id).await;
            self.store().add_subscription(subscriber_id, &subscription).await?;

            let ledger = Ledger::seeded(&feed.items, Utc::now());
            if let Err(e) = self
                .store()
                .save_ledger(subscriber_id, &subscription.id, &ledger)
                .await
            {
                // An unseeded subscription would replay the whole feed later
                if let Err(cleanup) = self
                    .store()
                    .remove_subscription(subscriber_id, &subscription.id)
                    .await
                {
                    warn!("Failed to remove half-created subscription: {}", cleanup);
                }
                return Err(e);
            }
        }

        self.monitor
            .observe(url, Observer::new(subscriber_id, subscription.id.clone()))
            .await;

        info!(
            "Subscriber {} subscribed to {} ({} existing item(s))",
            subscriber_id,
            url,
            feed.items.len()
        );

        Ok(SubscribeOutcome {
            preview: feed.latest_item().cloned(),
            subscription,
        })
    }

    /// Unsubscribe and drop the ledger.
    pub async fn unsubscribe(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<Subscription> {
        let subscription = self.get_subscription(subscriber_id, subscription_id).await?;

        self.monitor
            .forget(&subscription.link, subscriber_id, subscription_id)
            .await;
        {
            let _guard = self.monitor.lock_ledger(subscriber_id, subscription_id).await;
            self.store()
                .remove_subscription(subscriber_id, subscription_id)
                .await?;
            self.store().delete_ledger(subscriber_id, subscription_id).await?;
        }
        self.monitor.release_ledger(subscriber_id, subscription_id).await;

        info!(
            "Subscriber {} unsubscribed from {}",
            subscriber_id, subscription.link
        );
        Ok(subscription)
    }

    /// A subscriber's subscriptions, oldest first.
    pub async fn list_subscriptions(&self, subscriber_id: SubscriberId) -> Result<Vec<Subscription>> {
        self.store().list_subscriptions(subscriber_id).await
    }

    /// Get one subscription.
    pub async fn get_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<Subscription> {
        self.store()
            .get_subscription(subscriber_id, subscription_id)
            .await?
            .ok_or_else(|| FeedwatchError::NotFound("subscription".to_string()))
    }

    /// Set or clear the routing topic of a subscription.
    pub async fn set_topic(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
        topic: Option<i64>,
    ) -> Result<Subscription> {
        let mut subscription = self.get_subscription(subscriber_id, subscription_id).await?;
        subscription.topic = topic;
        self.store()
            .update_subscription(subscriber_id, &subscription)
            .await?;
        Ok(subscription)
    }

    /// Most subscribed feeds.
    pub async fn top_subscriptions(&self, limit: usize) -> Result<Vec<SubscriptionStatistic>> {
        self.store().top_subscriptions(limit).await
    }

    /// Register observers for every stored subscription.
    ///
    /// Returns the number of subscriptions restored.
    pub async fn restore(&self) -> Result<usize> {
        let mut restored = 0;
        for subscriber_id in self.store().list_subscribers().await? {
            for subscription in self.store().list_subscriptions(subscriber_id).await? {
                self.monitor
                    .register(
                        &subscription.link,
                        Observer::new(subscriber_id, subscription.id.clone()),
                    )
                    .await;
                restored += 1;
            }
        }

        info!("Restored {} subscription(s)", restored);
        Ok(restored)
    }
}
