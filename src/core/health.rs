use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::pipeline::{RunOutcome, RunReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentHealth,
    pub last_run: Option<RunReport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub marketplace: bool,
    pub dedup_store: bool,
    pub notifier: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, bool>,
}

impl ComponentHealth {
    pub fn get(&self, key: &str) -> Option<bool> {
        match key {
            "marketplace" => Some(self.marketplace),
            "dedup_store" => Some(self.dedup_store),
            "notifier" => Some(self.notifier),
            _ => self.extra.get(key).copied(),
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    start_time: std::time::Instant,
    status: Arc<RwLock<ComponentHealth>>,
    last_run: Arc<RwLock<Option<RunReport>>>,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            start_time: std::time::Instant::now(),
            status: Arc::new(RwLock::new(ComponentHealth::default())),
            last_run: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn get_status(&self) -> HealthStatus {
        let components = self.status.read().await.clone();
        let last_run = self.last_run.read().await.clone();

        let failed_last = matches!(
            last_run.as_ref().map(|r| r.outcome),
            Some(RunOutcome::FatalFailure)
        );
        let status = if failed_last {
            "failing"
        } else if components.marketplace && components.dedup_store && components.notifier {
            "healthy"
        } else {
            "degraded"
        };

        HealthStatus {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            components,
            last_run,
        }
    }

    pub async fn update_component(&self, component: &str, healthy: bool) {
        let mut status = self.status.write().await;
        match component {
            "marketplace" => status.marketplace = healthy,
            "dedup_store" => status.dedup_store = healthy,
            "notifier" => status.notifier = healthy,
            _ => {
                status.extra.insert(component.to_string(), healthy);
            }
        }
    }

    pub async fn record_run(&self, report: &RunReport) {
        *self.last_run.write().await = Some(report.clone());
    }
}
