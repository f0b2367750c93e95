use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tokio::time;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub max_requests: usize,
    pub window: Duration,
    pub max_in_flight: usize,
}

impl RateLimiterConfig {
    pub fn per_minute(max_requests: usize, max_in_flight: usize) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window: Duration::from_secs(60),
            max_in_flight: max_in_flight.max(1),
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_minute(30, 4)
    }
}

/// Sliding-window limiter shared by every worker of a run.
pub struct RateLimiter {
    name: &'static str,
    config: RateLimiterConfig,
    semaphore: Arc<Semaphore>,
    request_times: Arc<RwLock<VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, config: RateLimiterConfig) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(config.max_in_flight)),
            request_times: Arc::new(RwLock::new(VecDeque::new())),
            config,
        }
    }

    /// Waits until a request fits in the window. The permit bounds in-flight requests.
    pub async fn acquire(&self) -> RateLimitPermit {
        // The semaphore is never closed, so acquisition only fails if it were.
        let permit = self.semaphore.clone().acquire_owned().await.ok();

        loop {
            let mut times = self.request_times.write().await;
            let now = Instant::now();

            while let Some(&front) = times.front() {
                if now.duration_since(front) >= self.config.window {
                    times.pop_front();
                } else {
                    break;
                }
            }

            if times.len() < self.config.max_requests {
                times.push_back(now);
                return RateLimitPermit {
                    _permit: permit,
                    start_time: now,
                };
            }

            let wait = match times.front() {
                Some(&oldest) => (oldest + self.config.window).saturating_duration_since(now),
                None => Duration::ZERO,
            };
            drop(times);
            debug!("⏳ {} rate limit reached, waiting {:?}", self.name, wait);
            time::sleep(wait).await;
        }
    }

    pub async fn get_current_usage(&self) -> usize {
        let times = self.request_times.read().await;
        let now = Instant::now();
        times
            .iter()
            .filter(|&&t| now.duration_since(t) < self.config.window)
            .count()
    }

    pub async fn get_available_capacity(&self) -> usize {
        let usage = self.get_current_usage().await;
        self.config.max_requests.saturating_sub(usage)
    }
}

pub struct RateLimitPermit {
    _permit: Option<tokio::sync::OwnedSemaphorePermit>,
    start_time: Instant,
}

impl RateLimitPermit {
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_acquire() {
        let limiter = RateLimiter::new("test", RateLimiterConfig::per_minute(10, 5));

        let _permit = limiter.acquire().await;
        assert_eq!(limiter.get_current_usage().await, 1);
        assert_eq!(limiter.get_available_capacity().await, 9);
    }

    #[tokio::test]
    async fn test_rate_limiter_waits_for_window() {
        let limiter = RateLimiter::new(
            "test",
            RateLimiterConfig {
                max_requests: 2,
                window: Duration::from_millis(50),
                max_in_flight: 2,
            },
        );

        let start = Instant::now();
        for _ in 0..3 {
            let _permit = limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_per_minute_clamps_zero() {
        let config = RateLimiterConfig::per_minute(0, 0);
        assert_eq!(config.max_requests, 1);
        assert_eq!(config.max_in_flight, 1);
    }
}
