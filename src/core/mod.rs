pub mod config;
pub mod credentials;
pub mod error;
pub mod health;
pub mod logging;

pub use config::Config;
pub use credentials::{Credentials, CredentialsSource};
pub use error::{
    ConfigError, EvaluationError, ExtractionError, FetchError, NotifyError, RunError, StoreError,
};
pub use health::HealthChecker;
