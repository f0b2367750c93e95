//! Error taxonomy for a scan run.
//!
//! Per-listing errors (`ExtractionError`, `EvaluationError`, `StoreError`, a
//! transient `NotifyError`) are contained by the orchestrator. `RunError`
//! carries the causes that invalidate a whole run.

use std::time::Duration;
use thiserror::Error;

/// Errors retrieving a marketplace page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl FetchError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

/// A raw entry that could not be turned into a `Listing`.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("entry has no stable identifier")]
    MissingId,

    #[error("listing {id} has no {field}")]
    MissingField { id: String, field: &'static str },

    #[error("entry has no content")]
    Empty,
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("classifier request failed: {0}")]
    Classifier(String),

    #[error("classifier returned an unusable verdict: {0}")]
    MalformedVerdict(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    /// Rate limits, timeouts, 5xx. Worth retrying.
    #[error("transient delivery failure: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// Bad token or destination. No later send in this run can succeed.
    #[error("permanent delivery failure: {reason}")]
    Permanent { reason: String },
}

impl NotifyError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, NotifyError::Permanent { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

/// Dedup backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conditions that move a run to `FAILED`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("dedup store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("first search page unreachable: {0}")]
    TotalFetchFailure(#[source] FetchError),

    #[error("notifier unreachable: {0}")]
    NotifierUnavailable(#[source] NotifyError),

    #[error("initialization did not finish within {0:?}")]
    InitTimeout(Duration),
}
