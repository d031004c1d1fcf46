//! feedwatch - feed monitor
//!
//! Polls syndication feeds once per URL and fans new items out to every
//! subscriber, never delivering the same item twice to the same subscriber.

pub mod config;
pub mod console;
pub mod db;
pub mod error;
pub mod logging;
pub mod rss;

pub use config::Config;
pub use console::{parse_command, Command, Console, ConsoleDelivery};
pub use db::Database;
pub use error::{FeedwatchError, Result};
pub use rss::{
    compose_messages, format_item, reconcile, validate_url, AdmissionPolicy, CycleSummary,
    Delivery, FeedFetcher, FeedMonitor, FeedService, FeedSource, Item, ItemId, Ledger,
    MemoryStore, MonitorSettings, Observer, ObserverRegistry, OutgoingMessage, ParsedFeed,
    RefreshOutcome, Scheduler, SchedulerHandle, SqliteStore, SubscribeOutcome, SubscriberId,
    Subscription, SubscriptionStatistic, SubscriptionStore, MAX_MESSAGE_CHARS,
};
