use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::formatter::{format_listing_alert, MAX_MESSAGE_CHARS};
use super::{Ack, Notifier};
use crate::api::{retry_with_backoff, RateLimiter, RateLimiterConfig, RetryPolicy};
use crate::core::config::NotifierConfig;
use crate::core::error::NotifyError;
use crate::evaluation::EvaluationResult;
use crate::scanner::Listing;

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<TelegramMessage>,
    #[serde(default)]
    parameters: Option<TelegramParameters>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Bot API `sendMessage` client, paced and retried.
pub struct TelegramNotifier {
    http_client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
}

impl TelegramNotifier {
    pub fn new(
        config: &NotifierConfig,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| NotifyError::Permanent {
                reason: format!("cannot build HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.backoff_base_ms),
            ),
            limiter: Arc::new(RateLimiter::new(
                "telegram",
                RateLimiterConfig::per_minute(config.messages_per_minute, 1),
            )),
        })
    }

    /// One delivery attempt.
    async fn post_message(&self, text: &str) -> Result<Ack, NotifyError> {
        let _permit = self.limiter.acquire().await;
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": false,
        });

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            // The token is part of the URL; keep it out of the error text.
            .map_err(|e| NotifyError::Transient {
                reason: format!("Telegram request failed: {}", e.without_url()),
                retry_after: None,
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        interpret_response(status, &body)
    }

    async fn deliver(&self, text: &str, label: &str) -> Result<Ack, NotifyError> {
        retry_with_backoff(&self.retry, label, |_| self.post_message(text)).await
    }
}

/// Maps a Bot API reply to an ack or a transient/permanent failure.
pub fn interpret_response(status: u16, body: &str) -> Result<Ack, NotifyError> {
    let parsed: Option<TelegramResponse> = serde_json::from_str(body).ok();
    let description = parsed
        .as_ref()
        .and_then(|r| r.description.clone())
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        200..=299 => match parsed {
            Some(TelegramResponse { ok: true, result, .. }) => Ok(Ack {
                message_id: result.map(|m| m.message_id),
                sent_at: Utc::now(),
            }),
            _ => Err(NotifyError::Transient {
                reason: format!("unexpected Telegram reply: {}", description),
                retry_after: None,
            }),
        },
        429 => Err(NotifyError::Transient {
            reason: format!("rate limited: {}", description),
            retry_after: parsed
                .and_then(|r| r.parameters)
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs),
        }),
        500..=599 => Err(NotifyError::Transient {
            reason: format!("HTTP {}: {}", status, description),
            retry_after: None,
        }),
        _ => Err(NotifyError::Permanent {
            reason: format!("HTTP {}: {}", status, description),
        }),
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel(&self) -> &'static str {
        "telegram"
    }

    async fn send(
        &self,
        listing: &Listing,
        evaluation: &EvaluationResult,
    ) -> Result<Ack, NotifyError> {
        let text = format_listing_alert(listing, evaluation);
        let ack = self.deliver(&text, "telegram alert").await?;
        info!(listing_id = %listing.id, message_id = ?ack.message_id, "📱 Alert delivered");
        Ok(ack)
    }

    async fn send_text(&self, text: &str) -> Result<Ack, NotifyError> {
        let text: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        self.deliver(&text, "telegram message").await
    }
}

/// Logs alerts instead of delivering them.
#[derive(Debug, Default)]
pub struct DryRunNotifier;

#[async_trait]
impl Notifier for DryRunNotifier {
    fn channel(&self) -> &'static str {
        "dry_run"
    }

    async fn send(
        &self,
        listing: &Listing,
        evaluation: &EvaluationResult,
    ) -> Result<Ack, NotifyError> {
        let text = format_listing_alert(listing, evaluation);
        info!(listing_id = %listing.id, "📝 [dry run] alert:\n{}", text);
        Ok(Ack {
            message_id: None,
            sent_at: Utc::now(),
        })
    }

    async fn send_text(&self, text: &str) -> Result<Ack, NotifyError> {
        debug!("📝 [dry run] message:\n{}", text);
        Ok(Ack {
            message_id: None,
            sent_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_reply_is_acked() {
        let ack = interpret_response(200, r#"{"ok":true,"result":{"message_id":42}}"#).unwrap();
        assert_eq!(ack.message_id, Some(42));
    }

    #[test]
    fn test_rate_limit_is_transient_with_retry_after() {
        let err = interpret_response(
            429,
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 7","parameters":{"retry_after":7}}"#,
        )
        .unwrap_err();
        match err {
            NotifyError::Transient { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("expected transient, got {:?}", other),
        }
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(!interpret_response(502, "Bad Gateway").unwrap_err().is_permanent());
    }

    #[test]
    fn test_bad_credentials_are_permanent() {
        for status in [400, 401, 403, 404] {
            let err = interpret_response(
                status,
                r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
            )
            .unwrap_err();
            assert!(err.is_permanent(), "status {} should be permanent", status);
        }
    }

    #[test]
    fn test_ok_false_on_200_is_not_acked() {
        assert!(interpret_response(200, r#"{"ok":false}"#).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_always_acks() {
        let notifier = DryRunNotifier;
        let ack = notifier.send_text("hello").await.unwrap();
        assert_eq!(ack.message_id, None);
        assert_eq!(notifier.channel(), "dry_run");
    }

    #[tokio::test]
    async fn test_unreachable_api_is_transient() {
        let config = NotifierConfig {
            api_base: "http://127.0.0.1:1".into(),
            max_attempts: 1,
            request_timeout_secs: 2,
            ..NotifierConfig::default()
        };
        let notifier = TelegramNotifier::new(&config, "123:abc", "42").unwrap();
        let err = notifier.send_text("hello").await.unwrap_err();
        assert!(!err.is_permanent());
        assert!(!err.to_string().contains("123:abc"));
    }
}
