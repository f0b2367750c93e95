use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::{ClaimOutcome, NotificationStore};
use crate::core::error::StoreError;

const NOTIFIED: &str = "notified";

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const REFRESH_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == 'notified' then
    return redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return 0
"#;

/// Keys and the tokens of claims taken by this process. A release only
/// deletes a key still holding our token.
struct ClaimTokens {
    key_prefix: String,
    held: Mutex<HashMap<String, String>>,
}

impl ClaimTokens {
    fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            held: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, listing_id: &str) -> String {
        format!("{}:{}", self.key_prefix, listing_id)
    }

    async fn hold(&self, listing_id: &str, token: String) {
        self.held.lock().await.insert(listing_id.to_string(), token);
    }

    async fn take(&self, listing_id: &str) -> Option<String> {
        self.held.lock().await.remove(listing_id)
    }
}

/// Redis-backed store. One key per listing: a claim token with a millisecond
/// lease, or the `notified` marker whose TTL is the retention window.
pub struct RedisStore {
    conn: MultiplexedConnection,
    retention: Duration,
    claims: ClaimTokens,
}

impl RedisStore {
    pub async fn new(
        redis_url: &str,
        key_prefix: impl Into<String>,
        retention: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        tracing::info!("✅ Connected to Redis notification store");

        Ok(Self {
            conn,
            retention,
            claims: ClaimTokens::new(key_prefix),
        })
    }

    fn key(&self, listing_id: &str) -> String {
        self.claims.key(listing_id)
    }
}

#[async_trait]
impl NotificationStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn has_notified(&self, listing_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.key(listing_id)).await?;
        Ok(value.as_deref() == Some(NOTIFIED))
    }

    async fn try_claim(
        &self,
        listing_id: &str,
        lease: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let key = self.key(listing_id);
        let token = Uuid::new_v4().to_string();

        let set: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;

        if set.is_some() {
            self.claims.hold(listing_id, token).await;
            return Ok(ClaimOutcome::Claimed);
        }

        let current: Option<String> = conn.get(&key).await?;
        Ok(match current.as_deref() {
            Some(NOTIFIED) => ClaimOutcome::AlreadyNotified,
            _ => ClaimOutcome::InFlight,
        })
    }

    async fn record_notified(&self, listing_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.key(listing_id))
            .arg(NOTIFIED)
            .arg("EX")
            .arg(self.retention.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        self.claims.take(listing_id).await;
        Ok(())
    }

    async fn release_claim(&self, listing_id: &str) -> Result<(), StoreError> {
        let Some(token) = self.claims.take(listing_id).await else {
            return Ok(());
        };

        let mut conn = self.conn.clone();
        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(self.key(listing_id))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn mark_seen(&self, listing_ids: &[String]) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let script = Script::new(REFRESH_SCRIPT);
        let mut touched = 0;
        for id in listing_ids {
            let refreshed: i64 = script
                .key(self.key(id))
                .arg(self.retention.as_secs().max(1))
                .invoke_async(&mut conn)
                .await?;
            touched += refreshed.max(0) as u64;
        }
        Ok(touched)
    }

    async fn evict_stale(&self, _retention: chrono::Duration) -> Result<u64, StoreError> {
        // Keys expire on their own; `mark_seen` pushes the expiry forward.
        Ok(0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
