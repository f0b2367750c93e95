use serde::Deserialize;
use std::env;
use std::time::Duration;

use super::error::ConfigError;
use crate::scanner::Currency;

pub const DEFAULT_CONFIG_PATH: &str = "scout.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub marketplace: MarketplaceConfig,
    pub criteria: CriteriaConfig,
    pub dedup: DedupConfig,
    pub notifier: NotifierConfig,
    pub classifier: ClassifierConfig,
    pub run: RunConfig,
    pub credentials: CredentialsConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Search results URL. `{page}` is replaced by the page number.
    pub search_url: String,
    pub max_pages: u32,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub requests_per_minute: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub fetch_details: bool,
    pub default_currency: Currency,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            search_url:
                "https://www.kleinanzeigen.de/s-musik/berlin/seite:{page}/teenage+engineering+op-1/k0c74l3331"
                    .to_string(),
            max_pages: 3,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string(),
            request_timeout_secs: 15,
            requests_per_minute: 30,
            max_attempts: 3,
            backoff_base_ms: 500,
            fetch_details: true,
            default_currency: Currency::Eur,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CriteriaConfig {
    /// Inclusive price ceiling in major units of `marketplace.default_currency`.
    pub max_price: f64,
    pub allowed_conditions: Vec<String>,
    pub excluded_keywords: Vec<String>,
    /// Inclusive distance ceiling.
    pub max_distance_km: f64,
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        Self {
            max_price: 599.99,
            allowed_conditions: [
                "good",
                "very good",
                "excellent",
                "like new",
                "gut",
                "sehr gut",
                "wie neu",
                "neuwertig",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            excluded_keywords: [
                "defekt",
                "defect",
                "broken",
                "kaputt",
                "beschädigt",
                "damaged",
                "funktioniert nicht",
                "not working",
                "riss",
                "crack",
                "bastler",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_distance_km: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupBackend {
    Sqlite,
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub backend: DedupBackend,
    pub database_path: String,
    pub redis_url: String,
    pub key_prefix: String,
    pub claim_lease_secs: u64,
    /// Records of listings absent from results this long are evicted.
    pub retention_days: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            backend: DedupBackend::Sqlite,
            database_path: "data/scout.db".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "scout:notified".to_string(),
            claim_lease_secs: 600,
            retention_days: 90,
        }
    }
}

impl DedupConfig {
    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierBackend {
    Telegram,
    DryRun,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub backend: NotifierBackend,
    pub api_base: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub messages_per_minute: usize,
    pub alert_on_failure: bool,
    pub summary_on_success: bool,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            backend: NotifierBackend::Telegram,
            api_base: "https://api.telegram.org".to_string(),
            request_timeout_secs: 10,
            max_attempts: 3,
            backoff_base_ms: 1000,
            messages_per_minute: 20,
            alert_on_failure: true,
            summary_on_success: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub enabled: bool,
    pub api_base: String,
    pub model: String,
    /// Key in the credentials bundle holding the provider API key.
    pub api_key_name: String,
    pub request_timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_name: "openai_api_key".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub timeout_secs: u64,
    pub concurrency: usize,
    /// Interval between runs in `watch` mode.
    pub interval_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 240,
            concurrency: 4,
            interval_secs: 900,
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// JSON file with the credentials bundle. Takes precedence over `env_var`.
    pub path: Option<String>,
    pub env_var: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: None,
            env_var: "SCOUT_CREDENTIALS".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            port: 3000,
        }
    }
}

impl Config {
    /// Defaults, then the config file (`SCOUT_CONFIG`), then `SCOUT__SECTION__KEY` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let path = env::var("SCOUT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(&path)
    }

    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("SCOUT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("criteria.allowed_conditions")
                    .with_list_parse_key("criteria.excluded_keywords")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if url::Url::parse(&self.marketplace.search_url.replace("{page}", "1")).is_err() {
            return Err(ConfigError::Invalid(format!(
                "marketplace.search_url is not a URL: {}",
                self.marketplace.search_url
            )));
        }
        if self.marketplace.max_pages == 0 {
            return Err(ConfigError::Invalid("marketplace.max_pages must be >= 1".into()));
        }
        if self.marketplace.max_attempts == 0 || self.notifier.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be >= 1".into()));
        }
        if !(self.criteria.max_price.is_finite() && self.criteria.max_price >= 0.0) {
            return Err(ConfigError::Invalid("criteria.max_price must be >= 0".into()));
        }
        if !(self.criteria.max_distance_km.is_finite() && self.criteria.max_distance_km >= 0.0) {
            return Err(ConfigError::Invalid(
                "criteria.max_distance_km must be >= 0".into(),
            ));
        }
        if self.run.concurrency == 0 {
            return Err(ConfigError::Invalid("run.concurrency must be >= 1".into()));
        }
        Ok(())
    }
}
