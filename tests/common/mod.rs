//! Test helpers for monitor integration tests.
//!
//! Provides a scripted feed source, a recording delivery collaborator, a
//! store wrapper with injectable failures, and a harness wiring them into a
//! monitor and service.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use feedwatch::rss::types::content_hash;
use feedwatch::{
    Delivery, FeedMonitor, FeedService, FeedSource, FeedwatchError, Item, Ledger, MemoryStore,
    MonitorSettings, OutgoingMessage, ParsedFeed, Result, SubscriberId, Subscription,
    SubscriptionStatistic, SubscriptionStore,
};

/// Scripted response for one URL.
#[derive(Clone, Default)]
struct Script {
    canonical: Option<String>,
    items: Vec<Item>,
    fail: bool,
    delay: Duration,
}

/// Feed source returning whatever the test scripted, per URL.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, Script>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `items` for `url`.
    pub fn set_items(&self, url: &str, items: Vec<Item>) {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.entry(url.to_string()).or_default();
        script.items = items;
        script.fail = false;
    }

    /// Make fetches of `url` fail.
    pub fn set_failing(&self, url: &str) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(url.to_string()).or_default().fail = true;
    }

    /// Delay fetches of `url`.
    pub fn set_delay(&self, url: &str, delay: Duration) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(url.to_string()).or_default().delay = delay;
    }

    /// Report `canonical` as the feed's own link (as if `url` redirected).
    pub fn set_canonical(&self, url: &str, canonical: &str) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(url.to_string()).or_default().canonical = Some(canonical.to_string());
    }

    /// Number of fetches issued for `url`.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        *self.fetches.lock().unwrap().entry(url.to_string()).or_default() += 1;

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FeedwatchError::Fetch(format!("HTTP error: 404 for {url}")))?;

        tokio::time::sleep(script.delay).await;

        if script.fail {
            return Err(FeedwatchError::Fetch("HTTP error: 503".to_string()));
        }

        let link = script.canonical.unwrap_or_else(|| url.to_string());
        Ok(ParsedFeed {
            id: content_hash(&link),
            title: format!("Feed {link}"),
            link: Some(link),
            items: script.items,
        })
    }
}

/// Delivery collaborator recording every message.
#[derive(Default)]
pub struct RecordingDelivery {
    messages: Mutex<Vec<OutgoingMessage>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail (nothing is recorded).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// All recorded messages.
    pub fn messages(&self) -> Vec<OutgoingMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Recorded messages for one subscriber.
    pub fn messages_for(&self, subscriber_id: SubscriberId) -> Vec<OutgoingMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.subscriber_id == subscriber_id)
            .collect()
    }

    /// Delivery attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn deliver(&self, message: &OutgoingMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FeedwatchError::Delivery("chat not found".to_string()));
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Store wrapper whose ledger saves can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_saves: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriptionStore for FlakyStore {
    async fn list_subscribers(&self) -> Result<Vec<SubscriberId>> {
        self.inner.list_subscribers().await
    }

    async fn list_subscriptions(&self, subscriber_id: SubscriberId) -> Result<Vec<Subscription>> {
        self.inner.list_subscriptions(subscriber_id).await
    }

    async fn get_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        self.inner.get_subscription(subscriber_id, subscription_id).await
    }

    async fn add_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription: &Subscription,
    ) -> Result<()> {
        self.inner.add_subscription(subscriber_id, subscription).await
    }

    async fn update_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription: &Subscription,
    ) -> Result<()> {
        self.inner.update_subscription(subscriber_id, subscription).await
    }

    async fn remove_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<bool> {
        self.inner.remove_subscription(subscriber_id, subscription_id).await
    }

    async fn load_ledger(&self, subscriber_id: SubscriberId, subscription_id: &str) -> Result<Ledger> {
        self.inner.load_ledger(subscriber_id, subscription_id).await
    }

    async fn save_ledger(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
        ledger: &Ledger,
    ) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(FeedwatchError::Database("disk I/O error".to_string()));
        }
        self.inner.save_ledger(subscriber_id, subscription_id, ledger).await
    }

    async fn delete_ledger(&self, subscriber_id: SubscriberId, subscription_id: &str) -> Result<()> {
        self.inner.delete_ledger(subscriber_id, subscription_id).await
    }

    async fn top_subscriptions(&self, limit: usize) -> Result<Vec<SubscriptionStatistic>> {
        self.inner.top_subscriptions(limit).await
    }
}

/// A monitor and service wired to scripted collaborators.
pub struct Harness {
    pub source: Arc<ScriptedSource>,
    pub delivery: Arc<RecordingDelivery>,
    pub store: Arc<dyn SubscriptionStore>,
    pub monitor: Arc<FeedMonitor>,
    pub service: FeedService,
}

impl Harness {
    /// Harness over an in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), MonitorSettings::default())
    }

    /// Harness over a given store and settings.
    pub fn with_store(store: Arc<dyn SubscriptionStore>, settings: MonitorSettings) -> Self {
        Self::with_parts(
            Arc::new(ScriptedSource::new()),
            Arc::new(RecordingDelivery::new()),
            store,
            settings,
        )
    }

    /// Harness over existing collaborators (e.g. to simulate a restart).
    pub fn with_parts(
        source: Arc<ScriptedSource>,
        delivery: Arc<RecordingDelivery>,
        store: Arc<dyn SubscriptionStore>,
        settings: MonitorSettings,
    ) -> Self {
        let monitor = Arc::new(FeedMonitor::new(
            source.clone(),
            Arc::clone(&store),
            delivery.clone(),
            settings,
        ));
        let service = FeedService::new(Arc::clone(&monitor));
        Self {
            source,
            delivery,
            store,
            monitor,
            service,
        }
    }
}

/// Item with a guid, titled after it.
pub fn item(guid: &str) -> Item {
    Item::new(
        Some(guid),
        format!("Post {guid}"),
        format!("https://blog.example.com/posts/{guid}"),
    )
}

/// Items for a list of guids.
pub fn items(guids: &[&str]) -> Vec<Item> {
    guids.iter().map(|g| item(g)).collect()
}

/// Titles of the items mentioned in a message body, in order.
pub fn delivered_titles(messages: &[OutgoingMessage]) -> Vec<String> {
    messages
        .iter()
        .flat_map(|m| m.text.lines().map(str::to_string).collect::<Vec<_>>())
        .filter_map(|line| {
            let start = line.find("\">")? + 2;
            let end = line.rfind("</a>")?;
            Some(line[start..end].to_string())
        })
        .collect()
}
