use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::rate_limiter::RateLimiter;
use crate::core::error::{FetchError, NotifyError};

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

pub trait Retryable {
    fn is_transient(&self) -> bool;

    /// Server-provided wait, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::InvalidUrl { .. } => false,
        }
    }
}

impl Retryable for NotifyError {
    fn is_transient(&self) -> bool {
        !self.is_permanent()
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            NotifyError::Transient { retry_after, .. } => *retry_after,
            NotifyError::Permanent { .. } => None,
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, or attempts run out.
/// The last error is returned as-is.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = e
                    .retry_after()
                    .map(|d| d.min(policy.max_delay))
                    .unwrap_or_else(|| policy.delay_for(attempt));
                tracing::warn!(
                    "🔁 {} failed (attempt {}/{}): {} - retrying in {:?}",
                    label,
                    attempt,
                    policy.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!("{} gave up after {} attempts: {}", label, attempt, e);
                }
                return Err(e);
            }
        }
    }
}

/// Plain GET client for marketplace pages, paced by a shared limiter.
pub struct HttpClient {
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl HttpClient {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client, limiter })
    }

    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let _permit = self.limiter.acquire().await;

        let response = self
            .client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        tracing::debug!("✅ HTTP {}: retrieved {} bytes from {}", status, body.len(), url);
        Ok(body)
    }
}
