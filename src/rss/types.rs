//! Feed, item and subscription types for feedwatch.

use std::fmt;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Identifier of a subscriber (a chat, a user, a channel...).
pub type SubscriberId = i64;

/// Maximum characters per delivered message.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Title used when a feed carries none.
pub const UNTITLED_FEED: &str = "Untitled Feed";

/// Hex-encoded SHA-256 of `source`.
pub fn content_hash(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

/// Stable identity of a feed item.
///
/// Derived from the feed-provided unique identifier when present, else from
/// the item link. An item with neither has an empty identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(String);

impl ItemId {
    /// Derive the identity from an item's guid and link.
    pub fn derive(guid: Option<&str>, link: Option<&str>) -> Self {
        let source = guid
            .filter(|g| !g.is_empty())
            .or_else(|| link.filter(|l| !l.is_empty()));

        match source {
            Some(source) => Self(content_hash(source)),
            None => Self(String::new()),
        }
    }

    /// Wrap an already-derived identity (e.g. one loaded from storage).
    pub fn from_stored(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Whether the identity is degenerate (no guid and no link).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of a fetched feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Stable identity.
    pub id: ItemId,
    /// Item title (may be empty).
    pub title: String,
    /// Link to the original article (may be empty).
    pub link: String,
    /// When the item was published, if the feed says.
    pub published_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Create an item, deriving its identity from `guid` and `link`.
    pub fn new(guid: Option<&str>, title: impl Into<String>, link: impl Into<String>) -> Self {
        let link = link.into();
        Self {
            id: ItemId::derive(guid, Some(link.as_str())),
            title: title.into(),
            link,
            published_at: None,
        }
    }

    /// Set the publish time.
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }
}

/// Result of fetching and parsing one feed URL.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    /// Feed identity, derived from the canonical link.
    pub id: String,
    /// Feed title.
    pub title: String,
    /// Canonical link published by the feed itself.
    pub link: Option<String>,
    /// Items, oldest first when publish times are known.
    pub items: Vec<Item>,
}

impl ParsedFeed {
    /// The most recent item (last in fetch order).
    pub fn latest_item(&self) -> Option<&Item> {
        self.items.last()
    }
}

/// A subscriber's durable interest in a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Feed identity; unique per subscriber.
    pub id: String,
    /// The literal URL that was subscribed and is polled.
    pub link: String,
    /// Feed title at subscribe time.
    pub title: String,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
    /// Optional routing topic for deliveries.
    pub topic: Option<i64>,
}

impl Subscription {
    /// Create a subscription for a freshly fetched feed.
    pub fn from_feed(feed: &ParsedFeed, link: impl Into<String>) -> Self {
        Self {
            id: feed.id.clone(),
            link: link.into(),
            title: feed.title.clone(),
            created_at: Utc::now(),
            topic: None,
        }
    }
}

/// Registration of a subscriber's interest in a polled URL.
///
/// Resolved through the store at reconciliation time; holds no state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Observer {
    /// Who gets notified.
    pub subscriber_id: SubscriberId,
    /// Which of the subscriber's subscriptions this URL belongs to.
    pub subscription_id: String,
}

impl Observer {
    /// Create a new observer registration.
    pub fn new(subscriber_id: SubscriberId, subscription_id: impl Into<String>) -> Self {
        Self {
            subscriber_id,
            subscription_id: subscription_id.into(),
        }
    }
}

/// Subscriber count for one feed identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionStatistic {
    /// A representative subscription (title and link) for the feed.
    pub subscription: Subscription,
    /// Number of subscribers.
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_fixed_width() {
        assert_eq!(content_hash("a").len(), 64);
        assert_eq!(content_hash("").len(), 64);
        assert_eq!(content_hash("https://example.com/very/long/path").len(), 64);
    }

    #[test]
    fn test_item_id_prefers_guid() {
        let a = ItemId::derive(Some("guid-1"), Some("https://example.com/1"));
        let b = ItemId::derive(Some("guid-1"), Some("https://example.com/other"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), content_hash("guid-1"));
    }

    #[test]
    fn test_item_id_falls_back_to_link() {
        let a = ItemId::derive(None, Some("https://example.com/1"));
        let b = ItemId::derive(Some(""), Some("https://example.com/1"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), content_hash("https://example.com/1"));
    }

    #[test]
    fn test_item_id_empty_without_guid_and_link() {
        assert!(ItemId::derive(None, None).is_empty());
        assert!(ItemId::derive(Some(""), Some("")).is_empty());
    }

    #[test]
    fn test_item_id_distinct_sources_differ() {
        let a = ItemId::derive(Some("guid-1"), None);
        let b = ItemId::derive(Some("guid-2"), None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_item_new_same_guid_different_title() {
        let first = Item::new(Some("g"), "Original title", "https://example.com/a");
        let second = Item::new(Some("g"), "Edited title", "https://example.com/a");
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_latest_item() {
        let feed = ParsedFeed {
            id: content_hash("https://example.com"),
            title: "Feed".to_string(),
            link: Some("https://example.com".to_string()),
            items: vec![
                Item::new(Some("a"), "A", "https://example.com/a"),
                Item::new(Some("b"), "B", "https://example.com/b"),
            ],
        };
        assert_eq!(feed.latest_item().unwrap().title, "B");
    }

    #[test]
    fn test_subscription_from_feed_uses_requested_link() {
        let feed = ParsedFeed {
            id: content_hash("https://example.com"),
            title: "Feed".to_string(),
            link: Some("https://example.com".to_string()),
            items: vec![],
        };
        let sub = Subscription::from_feed(&feed, "https://example.com/rss?redirected=1");
        assert_eq!(sub.id, feed.id);
        assert_eq!(sub.link, "https://example.com/rss?redirected=1");
        assert_eq!(sub.title, "Feed");
        assert_eq!(sub.topic, None);
    }
}
