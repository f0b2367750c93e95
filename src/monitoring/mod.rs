pub mod database;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use database::SqliteStore;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{ClaimOutcome, NotificationRecord, NotificationStore};

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{DedupBackend, DedupConfig};
use crate::core::error::StoreError;

/// Opens the configured dedup backend.
pub async fn open_store(config: &DedupConfig) -> Result<Arc<dyn NotificationStore>, StoreError> {
    let store: Arc<dyn NotificationStore> = match config.backend {
        DedupBackend::Sqlite => Arc::new(SqliteStore::new(&config.database_path).await?),
        DedupBackend::Redis => {
            let retention = Duration::from_secs(config.retention_days.max(1) as u64 * 86_400);
            Arc::new(RedisStore::new(&config.redis_url, config.key_prefix.clone(), retention).await?)
        }
        DedupBackend::Memory => Arc::new(MemoryStore::new()),
    };

    tracing::info!(backend = store.backend(), "💾 Notification store ready");
    Ok(store)
}
