use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use super::config::LogFormat;

/// Logs go to stderr; stdout carries the run report.
pub fn init_logging(log_level: &str, format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }

    tracing::info!("Logging initialized at level: {}", log_level);
}
