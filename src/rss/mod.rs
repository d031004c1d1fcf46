//! Feed monitoring engine.
//!
//! Fetches each observed feed URL once per cycle, reconciles the result
//! against every subscriber's delivery ledger and hands new items to the
//! delivery collaborator.

pub mod delivery;
pub mod fetcher;
pub mod ledger;
pub mod locks;
pub mod registry;
pub mod repository;
pub mod service;
pub mod store;
pub mod types;
pub mod updater;

pub use delivery::{compose_messages, format_item, Delivery, OutgoingMessage};
pub use fetcher::{parse_feed, validate_url, FeedFetcher, FeedSource};
pub use ledger::{reconcile, AdmissionPolicy, DeliveryRecord, Ledger, Reconciliation};
pub use locks::KeyedLocks;
pub use registry::ObserverRegistry;
pub use repository::SqliteStore;
pub use service::{FeedService, SubscribeOutcome};
pub use store::{MemoryStore, SubscriptionStore};
pub use types::{
    content_hash, Item, ItemId, Observer, ParsedFeed, SubscriberId, Subscription,
    SubscriptionStatistic, MAX_MESSAGE_CHARS, UNTITLED_FEED,
};
pub use updater::{
    CycleSummary, FeedMonitor, MonitorSettings, RefreshOutcome, Scheduler, SchedulerHandle,
};
