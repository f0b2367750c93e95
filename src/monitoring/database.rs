use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;

use super::store::{ClaimOutcome, NotificationRecord, NotificationStore};
use crate::core::error::StoreError;

const STATUS_CLAIMED: &str = "claimed";
const STATUS_NOTIFIED: &str = "notified";

/// SQLite-backed notification store. Timestamps are stored as epoch milliseconds.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_path: &str) -> Result<Self, StoreError> {
        let connection_string = if database_path.starts_with("sqlite:") {
            database_path.to_string()
        } else {
            if let Some(parent) = Path::new(database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            format!("sqlite://{}?mode=rwc", database_path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;

        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                listing_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                claimed_until INTEGER,
                sent_at INTEGER,
                last_seen_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_notifications_last_seen
            ON notifications(status, last_seen_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("✅ Notification store schema initialized");

        Ok(())
    }

    pub async fn get_record(&self, listing_id: &str) -> Result<Option<NotificationRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT listing_id, sent_at, last_seen_at FROM notifications
            WHERE listing_id = ? AND status = ?
            "#,
        )
        .bind(listing_id)
        .bind(STATUS_NOTIFIED)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| NotificationRecord {
            listing_id: row.get("listing_id"),
            sent_at: from_millis(row.get::<Option<i64>, _>("sent_at").unwrap_or_default()),
            last_seen_at: from_millis(row.get("last_seen_at")),
        }))
    }

    pub async fn count_notified(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE status = ?")
            .bind(STATUS_NOTIFIED)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn evict_unseen_since(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            DELETE FROM notifications
            WHERE (status = ? AND last_seen_at < ?)
               OR (status = ? AND claimed_until < ?)
            "#,
        )
        .bind(STATUS_NOTIFIED)
        .bind(cutoff.timestamp_millis())
        .bind(STATUS_CLAIMED)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[async_trait]
impl NotificationStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn has_notified(&self, listing_id: &str) -> Result<bool, StoreError> {
        let found: Option<String> = sqlx::query_scalar(
            "SELECT listing_id FROM notifications WHERE listing_id = ? AND status = ?",
        )
        .bind(listing_id)
        .bind(STATUS_NOTIFIED)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn try_claim(
        &self,
        listing_id: &str,
        lease: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        let now = Utc::now().timestamp_millis();
        let until = now.saturating_add(lease.as_millis() as i64);

        // A conflicting row is only taken over when it is an expired claim.
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (listing_id, status, claimed_until, sent_at, last_seen_at)
            VALUES (?, ?, ?, NULL, ?)
            ON CONFLICT(listing_id) DO UPDATE SET
                claimed_until = excluded.claimed_until,
                last_seen_at = excluded.last_seen_at
            WHERE notifications.status = ? AND notifications.claimed_until < ?
            "#,
        )
        .bind(listing_id)
        .bind(STATUS_CLAIMED)
        .bind(until)
        .bind(now)
        .bind(STATUS_CLAIMED)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        if self.has_notified(listing_id).await? {
            Ok(ClaimOutcome::AlreadyNotified)
        } else {
            Ok(ClaimOutcome::InFlight)
        }
    }

    async fn record_notified(&self, listing_id: &str) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO notifications (listing_id, status, claimed_until, sent_at, last_seen_at)
            VALUES (?, ?, NULL, ?, ?)
            ON CONFLICT(listing_id) DO UPDATE SET
                status = excluded.status,
                claimed_until = NULL,
                sent_at = excluded.sent_at,
                last_seen_at = excluded.last_seen_at
            WHERE notifications.status != ?
            "#,
        )
        .bind(listing_id)
        .bind(STATUS_NOTIFIED)
        .bind(now)
        .bind(now)
        .bind(STATUS_NOTIFIED)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn release_claim(&self, listing_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM notifications WHERE listing_id = ? AND status = ?")
            .bind(listing_id)
            .bind(STATUS_CLAIMED)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_seen(&self, listing_ids: &[String]) -> Result<u64, StoreError> {
        if listing_ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        let mut touched = 0;
        for id in listing_ids {
            let result = sqlx::query(
                "UPDATE notifications SET last_seen_at = ? WHERE listing_id = ? AND status = ?",
            )
            .bind(now)
            .bind(id)
            .bind(STATUS_NOTIFIED)
            .execute(&mut *tx)
            .await?;
            touched += result.rows_affected();
        }
        tx.commit().await?;

        Ok(touched)
    }

    async fn evict_stale(&self, retention: chrono::Duration) -> Result<u64, StoreError> {
        let evicted = self.evict_unseen_since(Utc::now() - retention).await?;
        if evicted > 0 {
            tracing::info!(evicted = evicted, "🧹 Evicted stale notification records");
        }
        Ok(evicted)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
