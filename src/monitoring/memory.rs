use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::store::{ClaimOutcome, NotificationRecord, NotificationStore};
use crate::core::error::StoreError;

#[derive(Debug, Clone)]
enum Entry {
    Claimed { until: Instant },
    Notified(NotificationRecord),
}

/// Process-local store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notified_ids(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut ids: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Notified(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn record(&self, listing_id: &str) -> Option<NotificationRecord> {
        match self.entries.lock().await.get(listing_id) {
            Some(Entry::Notified(record)) => Some(record.clone()),
            _ => None,
        }
    }

    /// Inserts a record with explicit timestamps.
    pub async fn insert_record(&self, record: NotificationRecord) {
        self.entries
            .lock()
            .await
            .insert(record.listing_id.clone(), Entry::Notified(record));
    }

    pub async fn evict_unseen_since(&self, cutoff: DateTime<Utc>) -> u64 {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| match entry {
            Entry::Claimed { until } => *until > now,
            Entry::Notified(record) => record.last_seen_at >= cutoff,
        });
        (before - entries.len()) as u64
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn has_notified(&self, listing_id: &str) -> Result<bool, StoreError> {
        Ok(matches!(
            self.entries.lock().await.get(listing_id),
            Some(Entry::Notified(_))
        ))
    }

    async fn try_claim(
        &self,
        listing_id: &str,
        lease: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let outcome = match entries.get(listing_id) {
            Some(Entry::Notified(_)) => ClaimOutcome::AlreadyNotified,
            Some(Entry::Claimed { until }) if *until > now => ClaimOutcome::InFlight,
            _ => ClaimOutcome::Claimed,
        };
        if outcome == ClaimOutcome::Claimed {
            entries.insert(
                listing_id.to_string(),
                Entry::Claimed { until: now + lease },
            );
        }
        Ok(outcome)
    }

    async fn record_notified(&self, listing_id: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if !matches!(entries.get(listing_id), Some(Entry::Notified(_))) {
            let now = Utc::now();
            entries.insert(
                listing_id.to_string(),
                Entry::Notified(NotificationRecord {
                    listing_id: listing_id.to_string(),
                    sent_at: now,
                    last_seen_at: now,
                }),
            );
        }
        Ok(())
    }

    async fn release_claim(&self, listing_id: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if matches!(entries.get(listing_id), Some(Entry::Claimed { .. })) {
            entries.remove(listing_id);
        }
        Ok(())
    }

    async fn mark_seen(&self, listing_ids: &[String]) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let mut touched = 0;
        for id in listing_ids {
            if let Some(Entry::Notified(record)) = entries.get_mut(id) {
                record.last_seen_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn evict_stale(&self, retention: chrono::Duration) -> Result<u64, StoreError> {
        Ok(self.evict_unseen_since(Utc::now() - retention).await)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
