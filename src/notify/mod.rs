pub mod formatter;
pub mod telegram;

pub use formatter::{format_failure_alert, format_listing_alert, format_run_summary};
pub use telegram::{DryRunNotifier, TelegramNotifier};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::core::config::{NotifierBackend, NotifierConfig};
use crate::core::error::NotifyError;
use crate::core::Credentials;
use crate::evaluation::EvaluationResult;
use crate::scanner::Listing;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub message_id: Option<i64>,
    pub sent_at: DateTime<Utc>,
}

/// Delivery channel for alerts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn send(
        &self,
        listing: &Listing,
        evaluation: &EvaluationResult,
    ) -> Result<Ack, NotifyError>;

    /// Operational messages (failure alerts, run summaries).
    async fn send_text(&self, text: &str) -> Result<Ack, NotifyError>;
}

pub fn build_notifier(
    config: &NotifierConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn Notifier>, NotifyError> {
    let notifier: Arc<dyn Notifier> = match config.backend {
        NotifierBackend::Telegram => Arc::new(TelegramNotifier::new(
            config,
            credentials.notification_token.clone(),
            credentials.notification_destination.clone(),
        )?),
        NotifierBackend::DryRun => Arc::new(DryRunNotifier),
    };
    Ok(notifier)
}
