use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::error::StoreError;

/// Result of trying to take ownership of a listing's notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// Caller owns the listing until the lease expires; it must either
    /// `record_notified` after a successful send or `release_claim`.
    Claimed,
    AlreadyNotified,
    /// Another run holds an unexpired claim.
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub listing_id: String,
    pub sent_at: DateTime<Utc>,
    /// Last run whose search results still contained the listing.
    pub last_seen_at: DateTime<Utc>,
}

/// Durable memory of which listings were already announced.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn has_notified(&self, listing_id: &str) -> Result<bool, StoreError>;

    /// Atomic: of any number of concurrent callers, at most one gets `Claimed`.
    async fn try_claim(&self, listing_id: &str, lease: Duration)
        -> Result<ClaimOutcome, StoreError>;

    /// Idempotent.
    async fn record_notified(&self, listing_id: &str) -> Result<(), StoreError>;

    async fn release_claim(&self, listing_id: &str) -> Result<(), StoreError>;

    /// Refreshes `last_seen_at` of already-recorded listings. Returns how many were touched.
    async fn mark_seen(&self, listing_ids: &[String]) -> Result<u64, StoreError>;

    /// Drops records not seen for `retention` and expired claims.
    async fn evict_stale(&self, retention: chrono::Duration) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
