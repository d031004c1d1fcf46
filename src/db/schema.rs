//! Database schema and migrations for feedwatch.
//!
//! Migrations are applied sequentially when the database is first opened
//! or upgraded.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Subscriptions and delivery ledger
    r#"
-- One row per (subscriber, feed identity)
CREATE TABLE subscriptions (
    subscriber_id    INTEGER NOT NULL,
    subscription_id  TEXT NOT NULL,          -- feed identity hash
    link             TEXT NOT NULL,          -- literal subscribed URL
    title            TEXT NOT NULL,
    topic            INTEGER,                -- optional routing topic
    created_at       TEXT NOT NULL,
    PRIMARY KEY (subscriber_id, subscription_id)
);

CREATE INDEX idx_subscriptions_subscription ON subscriptions(subscription_id);

-- Item identities already delivered to a subscriber for a subscription
CREATE TABLE ledger_entries (
    subscriber_id    INTEGER NOT NULL,
    subscription_id  TEXT NOT NULL,
    item_id          TEXT NOT NULL,
    delivered_at     TEXT NOT NULL,
    PRIMARY KEY (subscriber_id, subscription_id, item_id)
);
"#,
    // v2: Published-time high-watermark per ledger
    r#"
CREATE TABLE ledger_watermarks (
    subscriber_id    INTEGER NOT NULL,
    subscription_id  TEXT NOT NULL,
    high_watermark   TEXT NOT NULL,
    PRIMARY KEY (subscriber_id, subscription_id)
);
"#,
];
