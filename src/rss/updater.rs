//! Feed monitor and background scheduler.
//!
//! [`FeedMonitor`] fetches each observed URL once per cycle and fans the
//! result out to every observer of that URL. [`Scheduler`] drives it from a
//! timer and from on-demand triggers raised when a URL gains its first
//! observer.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{FeedwatchError, Result};
use crate::rss::delivery::{compose_messages, Delivery};
use crate::rss::fetcher::FeedSource;
use crate::rss::ledger::{reconcile, AdmissionPolicy};
use crate::rss::locks::KeyedLocks;
use crate::rss::registry::ObserverRegistry;
use crate::rss::store::SubscriptionStore;
use crate::rss::types::{Observer, ParsedFeed, SubscriberId, MAX_MESSAGE_CHARS};

/// Tunables of the monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Upper bound on a single fetch.
    pub fetch_timeout: Duration,
    /// Distinct URLs fetched in parallel per cycle.
    pub max_concurrent_fetches: usize,
    /// Character ceiling per delivered message.
    pub max_message_chars: usize,
    /// Which never-seen items are admitted.
    pub policy: AdmissionPolicy,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            max_concurrent_fetches: 4,
            max_message_chars: MAX_MESSAGE_CHARS,
            policy: AdmissionPolicy::All,
        }
    }
}

impl MonitorSettings {
    /// Settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch_timeout: config.monitor.fetch_timeout(),
            max_concurrent_fetches: config.monitor.max_concurrent_fetches,
            max_message_chars: config.delivery.max_message_chars,
            policy: AdmissionPolicy::from_flag(config.monitor.use_watermark),
        }
    }
}

/// Result of refreshing one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nobody observes the URL, or the fetch returned no items.
    Skipped,
    /// The fetch failed or timed out.
    Failed,
    /// Fetched and reconciled; total new items across observers.
    Fetched(usize),
}

/// Totals for one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// URLs visited.
    pub urls: usize,
    /// URLs whose fetch failed.
    pub failed: usize,
    /// New items across all observers.
    pub new_items: usize,
}

/// The polling engine.
pub struct FeedMonitor {
    registry: ObserverRegistry,
    source: Arc<dyn FeedSource>,
    store: Arc<dyn SubscriptionStore>,
    delivery: Arc<dyn Delivery>,
    url_locks: KeyedLocks<String>,
    ledger_locks: KeyedLocks<(SubscriberId, String)>,
    settings: MonitorSettings,
    trigger_tx: mpsc::UnboundedSender<String>,
    trigger_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl FeedMonitor {
    /// Create a monitor with an empty registry.
    pub fn new(
        source: Arc<dyn FeedSource>,
        store: Arc<dyn SubscriptionStore>,
        delivery: Arc<dyn Delivery>,
        settings: MonitorSettings,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        Self {
            registry: ObserverRegistry::new(),
            source,
            store,
            delivery,
            url_locks: KeyedLocks::new(),
            ledger_locks: KeyedLocks::new(),
            settings,
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        }
    }

    /// The observer registry.
    pub fn registry(&self) -> &ObserverRegistry {
        &self.registry
    }

    /// The persistence collaborator.
    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    /// The feed source.
    pub fn source(&self) -> &Arc<dyn FeedSource> {
        &self.source
    }

    /// Register an observer; the URL's first observer triggers an
    /// out-of-cycle fetch.
    pub async fn observe(&self, url: &str, observer: Observer) {
        if self.registry.add_observer(url, observer).await {
            debug!("First observer for {}, requesting fetch", url);
            // Only fails when the scheduler has gone away
            let _ = self.trigger_tx.send(url.to_string());
        }
    }

    /// Register an observer without requesting a fetch.
    ///
    /// Used at startup, where the scheduler's first tick polls every URL.
    pub async fn register(&self, url: &str, observer: Observer) {
        self.registry.add_observer(url, observer).await;
    }

    /// Remove the subscriber's registration for `url` if it belongs to
    /// `subscription_id`.
    pub async fn forget(
        &self,
        url: &str,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Option<Observer> {
        self.registry
            .remove_observer_if(url, subscriber_id, subscription_id)
            .await
    }

    /// Serialize access to one (subscriber, subscription) ledger.
    pub async fn lock_ledger(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> tokio::sync::OwnedMutexGuard<()> {
        self.ledger_locks
            .lock(&(subscriber_id, subscription_id.to_string()))
            .await
    }

    /// Drop the lock slot of a ledger that no longer exists.
    pub async fn release_ledger(&self, subscriber_id: SubscriberId, subscription_id: &str) {
        self.ledger_locks
            .forget(&(subscriber_id, subscription_id.to_string()))
            .await;
    }

    async fn take_triggers(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.trigger_rx.lock().await.take()
    }

    /// Run one polling cycle over every observed URL.
    pub async fn refresh_all(&self) -> CycleSummary {
        let urls: Vec<String> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .map(|(url, _)| url)
            .collect();

        if urls.is_empty() {
            debug!("No observed feeds");
            return CycleSummary::default();
        }

        debug!("Polling cycle started for {} feed(s)", urls.len());

        let summary = Mutex::new(CycleSummary {
            urls: urls.len(),
            ..CycleSummary::default()
        });

        stream::iter(urls)
            .for_each_concurrent(self.settings.max_concurrent_fetches.max(1), |url| {
                let summary = &summary;
                async move {
                    let outcome = self.refresh_url(&url).await;
                    let mut summary = summary.lock().await;
                    match outcome {
                        RefreshOutcome::Failed => summary.failed += 1,
                        RefreshOutcome::Fetched(count) => summary.new_items += count,
                        RefreshOutcome::Skipped => {}
                    }
                }
            })
            .await;

        let summary = summary.into_inner();
        debug!(
            "Polling cycle finished: {} feed(s), {} failed, {} new item(s)",
            summary.urls, summary.failed, summary.new_items
        );
        summary
    }

    /// Fetch one URL and reconcile it for every current observer.
    ///
    /// Fetch failures are logged and swallowed.
    pub async fn refresh_url(&self, url: &str) -> RefreshOutcome {
        let _guard = self.url_locks.lock(&url.to_string()).await;

        if self.registry.observers_for(url).await.is_empty() {
            return RefreshOutcome::Skipped;
        }

        let feed = match self.fetch_with_timeout(url).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!("Failed to fetch feed {}: {}", url, e);
                return RefreshOutcome::Failed;
            }
        };

        if feed.items.is_empty() {
            debug!("Feed {} returned no items, skipping", url);
            return RefreshOutcome::Skipped;
        }

        // Re-read after the fetch so observers that left meanwhile are skipped
        let observers = self.registry.observers_for(url).await;
        let mut total = 0;
        for observer in observers {
            match self.dispatch(url, &feed, &observer).await {
                Ok(count) => total += count,
                Err(e) => error!(
                    "Failed to reconcile {} for subscriber {}: {}",
                    url, observer.subscriber_id, e
                ),
            }
        }

        if total > 0 {
            info!("Feed {}: {} new item(s)", url, total);
        }
        RefreshOutcome::Fetched(total)
    }

    async fn fetch_with_timeout(&self, url: &str) -> Result<ParsedFeed> {
        match tokio::time::timeout(self.settings.fetch_timeout, self.source.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(FeedwatchError::Fetch(format!(
                "timed out after {} seconds",
                self.settings.fetch_timeout.as_secs()
            ))),
        }
    }

    /// Reconcile one observer's ledger and deliver its new items.
    async fn dispatch(&self, url: &str, feed: &ParsedFeed, observer: &Observer) -> Result<usize> {
        let subscriber_id = observer.subscriber_id;
        let subscription_id = observer.subscription_id.as_str();

        let guard = self.lock_ledger(subscriber_id, subscription_id).await;

        if self.registry.observer(url, subscriber_id).await.as_ref() != Some(observer) {
            debug!("Subscriber {} stopped observing {}", subscriber_id, url);
            return Ok(0);
        }

        let Some(subscription) = self
            .store
            .get_subscription(subscriber_id, subscription_id)
            .await?
        else {
            debug!("Subscription {} of {} is gone", subscription_id, subscriber_id);
            return Ok(0);
        };

        let ledger = self.store.load_ledger(subscriber_id, subscription_id).await?;
        let outcome = reconcile(&ledger, &feed.items, self.settings.policy, Utc::now());

        if outcome.changed {
            self.store
                .save_ledger(subscriber_id, subscription_id, &outcome.ledger)
                .await?;
        }
        drop(guard);

        if outcome.new_items.is_empty() {
            return Ok(0);
        }

        let messages = compose_messages(
            subscriber_id,
            subscription.topic,
            &outcome.new_items,
            self.settings.max_message_chars,
        );
        for message in &messages {
            if let Err(e) = self.delivery.deliver(message).await {
                warn!("Failed to deliver to subscriber {}: {}", subscriber_id, e);
            }
        }

        Ok(outcome.new_items.len())
    }
}

/// Periodic driver of a [`FeedMonitor`].
pub struct Scheduler {
    monitor: Arc<FeedMonitor>,
    period: Duration,
}

impl Scheduler {
    /// Create a scheduler polling every `period`.
    pub fn new(monitor: Arc<FeedMonitor>, period: Duration) -> Self {
        Self { monitor, period }
    }

    /// Start the polling loop on the runtime.
    ///
    /// A monitor can be driven by only one scheduler.
    pub async fn spawn(self) -> Result<SchedulerHandle> {
        let triggers = self
            .monitor
            .take_triggers()
            .await
            .ok_or_else(|| FeedwatchError::Config("scheduler already started".to_string()))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(self.run(triggers, shutdown_rx));

        Ok(SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        })
    }

    async fn run(
        self,
        mut triggers: mpsc::UnboundedReceiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            "Feed scheduler started (poll interval: {} seconds)",
            self.period.as_secs()
        );

        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = timer.tick() => {
                    self.monitor.refresh_all().await;
                }
                Some(url) = triggers.recv() => {
                    self.monitor.refresh_url(&url).await;
                }
            }
        }

        info!("Feed scheduler stopped");
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the timer and wait for the in-flight work to finish.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| FeedwatchError::Config(format!("scheduler task failed: {}", e)))
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
