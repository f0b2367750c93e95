pub mod http;
pub mod rate_limiter;

pub use http::{retry_with_backoff, HttpClient, RetryPolicy, Retryable};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
