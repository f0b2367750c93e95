use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Instrument};

use super::context::{RunContext, RunOutcome, RunReport};
use super::orchestrator::{Orchestrator, RunSettings};
use crate::api::{HttpClient, RateLimiter, RateLimiterConfig, RetryPolicy};
use crate::core::config::Config;
use crate::core::credentials::{source_from_config, CredentialsSource};
use crate::core::error::{ConfigError, RunError};
use crate::core::{Credentials, HealthChecker};
use crate::evaluation::{ConditionClassifier, Criteria, Evaluator, LlmClassifier};
use crate::monitoring::{open_store, NotificationStore};
use crate::notify::{build_notifier, format_failure_alert, format_run_summary, Notifier};
use crate::scanner::{HtmlExtractor, HttpFetcher, SearchQuery};

/// Entry point for one invocation: INIT, run, report.
///
/// Every call loads credentials and opens the dedup backend afresh, so a
/// long-lived `watch` or `serve` process picks up rotated secrets.
pub struct Trigger {
    config: Arc<Config>,
    credentials: Box<dyn CredentialsSource>,
    health: HealthChecker,
}

impl Trigger {
    pub fn new(config: Arc<Config>) -> Self {
        let credentials = source_from_config(&config.credentials);
        Self {
            config,
            credentials,
            health: HealthChecker::new(),
        }
    }

    pub fn with_credentials_source(mut self, source: Box<dyn CredentialsSource>) -> Self {
        self.credentials = source;
        self
    }

    pub fn with_health(mut self, health: HealthChecker) -> Self {
        self.health = health;
        self
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    pub async fn fire(&self) -> RunReport {
        let criteria = Arc::new(Criteria::from_config(
            &self.config.criteria,
            self.config.marketplace.default_currency,
        ));
        let query = SearchQuery::new(
            self.config.marketplace.search_url.clone(),
            self.config.marketplace.max_pages,
        );
        let ctx = RunContext::new(query, criteria.clone());
        let span = tracing::info_span!("run", run_id = %ctx.run_id);

        async move {
            info!("🎬 Run triggered");
            let budget = Duration::from_secs(self.config.run.timeout_secs);
            let initialized = tokio::time::timeout(budget, self.initialize(criteria))
                .await
                .unwrap_or_else(|_| Err((RunError::InitTimeout(budget), None)));
            let (report, notifier) = match initialized {
                Ok(orchestrator) => {
                    let notifier = orchestrator.notifier().clone();
                    let report = orchestrator.execute(ctx).await;
                    (report, Some(notifier))
                }
                Err((e, notifier)) => (ctx.fail(&e), notifier),
            };

            self.update_health(&report).await;
            if let Some(notifier) = notifier {
                self.send_run_message(notifier.as_ref(), &report).await;
            }
            report
        }
        .instrument(span)
        .await
    }

    /// INIT: credentials, store, notifier, classifier. On failure the notifier
    /// is returned too when it was already built, so the failure can be alerted.
    /// Bounded by `run.timeout_secs`, separately from the run itself.
    async fn initialize(
        &self,
        criteria: Arc<Criteria>,
    ) -> Result<Orchestrator, (RunError, Option<Arc<dyn Notifier>>)> {
        let config = &self.config;

        let credentials = self
            .credentials
            .load()
            .await
            .map_err(|e| (RunError::from(e), None))?;

        let notifier = build_notifier(&config.notifier, &credentials).map_err(|e| {
            (
                RunError::from(ConfigError::Invalid(format!("notifier: {}", e))),
                None,
            )
        })?;

        let opened = match open_store(&config.dedup).await {
            Ok(store) => store.ping().await.map(|_| store),
            Err(e) => Err(e),
        };
        let store: Arc<dyn NotificationStore> = match opened {
            Ok(store) => {
                self.health.update_component("dedup_store", true).await;
                store
            }
            Err(e) => {
                self.health.update_component("dedup_store", false).await;
                return Err((RunError::from(e), Some(notifier)));
            }
        };

        let mut evaluator = Evaluator::new(criteria);
        if config.classifier.enabled {
            let classifier = build_classifier(config, &credentials)
                .map_err(|e| (RunError::from(e), Some(notifier.clone())))?;
            evaluator = evaluator.with_classifier(classifier);
        }

        let limiter = Arc::new(RateLimiter::new(
            "marketplace",
            RateLimiterConfig::per_minute(
                config.marketplace.requests_per_minute,
                config.run.concurrency,
            ),
        ));
        let http = HttpClient::new(
            &config.marketplace.user_agent,
            Duration::from_secs(config.marketplace.request_timeout_secs),
            limiter,
        )
        .map_err(|e| {
            (
                RunError::from(ConfigError::Invalid(format!("HTTP client: {}", e))),
                Some(notifier.clone()),
            )
        })?;
        let fetcher = HttpFetcher::new(
            Arc::new(http),
            RetryPolicy::new(
                config.marketplace.max_attempts,
                Duration::from_millis(config.marketplace.backoff_base_ms),
            ),
        );

        info!(
            store = store.backend(),
            notifier = notifier.channel(),
            classifier = config.classifier.enabled,
            "✅ Run initialized"
        );

        Ok(Orchestrator::new(
            Arc::new(fetcher),
            Arc::new(HtmlExtractor::new(config.marketplace.default_currency)),
            Arc::new(evaluator),
            store,
            notifier,
        )
        .with_settings(RunSettings::from_config(config)))
    }

    async fn update_health(&self, report: &RunReport) {
        let notifier_ok = !report
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("notifier"));
        self.health
            .update_component("marketplace", report.pages_fetched > 0)
            .await;
        self.health.update_component("notifier", notifier_ok).await;
        self.health.record_run(report).await;
    }

    async fn send_run_message(&self, notifier: &dyn Notifier, report: &RunReport) {
        let text = match report.outcome {
            RunOutcome::FatalFailure if self.config.notifier.alert_on_failure => {
                format_failure_alert(report)
            }
            RunOutcome::Success | RunOutcome::PartialFailure
                if self.config.notifier.summary_on_success =>
            {
                format_run_summary(report)
            }
            _ => return,
        };

        if let Err(e) = notifier.send_text(&text).await {
            warn!(error = %e, "Failed to deliver run message");
        }
    }
}

fn build_classifier(
    config: &Config,
    credentials: &Credentials,
) -> Result<Arc<dyn ConditionClassifier>, ConfigError> {
    let api_key = credentials
        .provider_key(&config.classifier.api_key_name)
        .ok_or_else(|| {
            ConfigError::Credentials(format!(
                "classifier enabled but `{}` is missing from the bundle",
                config.classifier.api_key_name
            ))
        })?;
    let classifier = LlmClassifier::new(&config.classifier, api_key)
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(Arc::new(classifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DedupBackend, NotifierBackend};
    use crate::core::credentials::{FileCredentials, StaticCredentials};
    use crate::pipeline::RunState;
    use async_trait::async_trait;

    struct StalledCredentials;

    #[async_trait]
    impl CredentialsSource for StalledCredentials {
        async fn load(&self) -> Result<Credentials, ConfigError> {
            std::future::pending().await
        }
    }

    fn bundle() -> Credentials {
        Credentials::from_json(r#"{"notification_token": "123:abc", "notification_destination": "42"}"#)
            .unwrap()
    }

    /// Memory store, dry-run notifier and a marketplace nothing listens on.
    fn offline_config() -> Config {
        let mut config = Config::default();
        config.marketplace.search_url = "http://127.0.0.1:1/s-musik/seite:{page}/op-1/k0".into();
        config.marketplace.max_attempts = 1;
        config.marketplace.request_timeout_secs = 2;
        config.dedup.backend = DedupBackend::Memory;
        config.notifier.backend = NotifierBackend::DryRun;
        config
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_at_init() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        let trigger = Trigger::new(Arc::new(Config::default()))
            .with_credentials_source(Box::new(FileCredentials::new(missing.to_str().unwrap())));

        let report = trigger.fire().await;
        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.outcome, RunOutcome::FatalFailure);
        assert_eq!(report.counters.processed, 0);
        assert!(report.error.unwrap().contains("credentials"));

        let health = trigger.health().get_status().await;
        assert_eq!(health.status, "failing");
    }

    #[tokio::test]
    async fn test_stalled_init_is_bounded() {
        let mut config = offline_config();
        config.run.timeout_secs = 1;
        let trigger =
            Trigger::new(Arc::new(config)).with_credentials_source(Box::new(StalledCredentials));

        let report = tokio::time::timeout(Duration::from_secs(10), trigger.fire())
            .await
            .expect("INIT must not hang");
        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.outcome, RunOutcome::FatalFailure);
        assert!(report.error.unwrap().contains("initialization"));
    }

    #[tokio::test]
    async fn test_store_ping_feeds_health() {
        let trigger = Trigger::new(Arc::new(offline_config()))
            .with_credentials_source(Box::new(StaticCredentials(bundle())));

        let report = trigger.fire().await;
        assert_eq!(report.state, RunState::Failed);
        assert!(report.error.unwrap().contains("first search page"));

        let health = trigger.health().get_status().await;
        assert_eq!(health.components.get("dedup_store"), Some(true));
        assert_eq!(health.components.get("marketplace"), Some(false));
    }
}
