//! SQLite-backed subscription store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ledger::Ledger;
use super::store::{duplicate_subscription, SubscriptionStore};
use super::types::{ItemId, SubscriberId, Subscription, SubscriptionStatistic};
use crate::db::DbPool;
use crate::error::{FeedwatchError, Result};

/// Row type for a subscription from database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SubscriptionRow {
    subscription_id: String,
    link: String,
    title: String,
    topic: Option<i64>,
    created_at: String,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            id: row.subscription_id,
            link: row.link,
            title: row.title,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            topic: row.topic,
        }
    }
}

/// Row type for subscriber statistics.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StatisticRow {
    subscription_id: String,
    link: String,
    title: String,
    topic: Option<i64>,
    created_at: String,
    count: i64,
}

impl From<StatisticRow> for SubscriptionStatistic {
    fn from(row: StatisticRow) -> Self {
        SubscriptionStatistic {
            subscription: Subscription {
                id: row.subscription_id,
                link: row.link,
                title: row.title,
                created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
                topic: row.topic,
            },
            count: row.count,
        }
    }
}

/// Row type for a ledger entry.
#[derive(Debug, Clone, sqlx::FromRow)]
struct LedgerEntryRow {
    item_id: String,
    delivered_at: String,
}

fn db_error(e: sqlx::Error) -> FeedwatchError {
    FeedwatchError::Database(e.to_string())
}

/// Durable store over a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Create a store over an already migrated pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn list_subscribers(&self) -> Result<Vec<SubscriberId>> {
        sqlx::query_scalar(
            "SELECT DISTINCT subscriber_id FROM subscriptions ORDER BY subscriber_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn list_subscriptions(&self, subscriber_id: SubscriberId) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT subscription_id, link, title, topic, created_at
            FROM subscriptions
            WHERE subscriber_id = $1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(subscriber_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    async fn get_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT subscription_id, link, title, topic, created_at
            FROM subscriptions
            WHERE subscriber_id = $1 AND subscription_id = $2
            "#,
        )
        .bind(subscriber_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Subscription::from))
    }

    async fn add_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription: &Subscription,
    ) -> Result<()> {
        if let Some(existing) = self.get_subscription(subscriber_id, &subscription.id).await? {
            return Err(duplicate_subscription(&existing));
        }

        sqlx::query(
            r#"
            INSERT INTO subscriptions (subscriber_id, subscription_id, link, title, topic, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(subscriber_id)
        .bind(&subscription.id)
        .bind(&subscription.link)
        .bind(&subscription.title)
        .bind(subscription.topic)
        .bind(subscription.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn update_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription: &Subscription,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET link = $1, title = $2, topic = $3
            WHERE subscriber_id = $4 AND subscription_id = $5
            "#,
        )
        .bind(&subscription.link)
        .bind(&subscription.title)
        .bind(subscription.topic)
        .bind(subscriber_id)
        .bind(&subscription.id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(FeedwatchError::NotFound("subscription".to_string()));
        }
        Ok(())
    }

    async fn remove_subscription(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM subscriptions WHERE subscriber_id = $1 AND subscription_id = $2",
        )
        .bind(subscriber_id)
        .bind(subscription_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn load_ledger(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<Ledger> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            SELECT item_id, delivered_at
            FROM ledger_entries
            WHERE subscriber_id = $1 AND subscription_id = $2
            "#,
        )
        .bind(subscriber_id)
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let watermark: Option<String> = sqlx::query_scalar(
            r#"
            SELECT high_watermark
            FROM ledger_watermarks
            WHERE subscriber_id = $1 AND subscription_id = $2
            "#,
        )
        .bind(subscriber_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let mut ledger = Ledger::new();
        for row in rows {
            let delivered_at = parse_datetime(&row.delivered_at).unwrap_or_else(Utc::now);
            ledger.record(ItemId::from_stored(row.item_id), delivered_at);
        }
        ledger.set_high_watermark(watermark.as_deref().and_then(parse_datetime));
        Ok(ledger)
    }

    async fn save_ledger(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
        ledger: &Ledger,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query("DELETE FROM ledger_entries WHERE subscriber_id = $1 AND subscription_id = $2")
            .bind(subscriber_id)
            .bind(subscription_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        for (item_id, record) in ledger.iter() {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries (subscriber_id, subscription_id, item_id, delivered_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(subscriber_id)
            .bind(subscription_id)
            .bind(item_id.as_str())
            .bind(record.delivered_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        sqlx::query(
            "DELETE FROM ledger_watermarks WHERE subscriber_id = $1 AND subscription_id = $2",
        )
        .bind(subscriber_id)
        .bind(subscription_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if let Some(watermark) = ledger.high_watermark() {
            sqlx::query(
                r#"
                INSERT INTO ledger_watermarks (subscriber_id, subscription_id, high_watermark)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(subscriber_id)
            .bind(subscription_id)
            .bind(watermark.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn delete_ledger(
        &self,
        subscriber_id: SubscriberId,
        subscription_id: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        for table in ["ledger_entries", "ledger_watermarks"] {
            let query = format!(
                "DELETE FROM {} WHERE subscriber_id = $1 AND subscription_id = $2",
                table
            );
            sqlx::query(&query)
                .bind(subscriber_id)
                .bind(subscription_id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn top_subscriptions(&self, limit: usize) -> Result<Vec<SubscriptionStatistic>> {
        let rows = sqlx::query_as::<_, StatisticRow>(
            r#"
            SELECT s.subscription_id, s.link, s.title, s.topic, s.created_at, t.count
            FROM (
                SELECT subscription_id, COUNT(*) AS count, MIN(rowid) AS first_row
                FROM subscriptions
                GROUP BY subscription_id
            ) t
            JOIN subscriptions s ON s.rowid = t.first_row
            ORDER BY t.count DESC, s.subscription_id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(SubscriptionStatistic::from).collect())
    }
}

/// Parse a stored timestamp.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}
