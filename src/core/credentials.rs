use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

use super::config::CredentialsConfig;
use super::error::ConfigError;

/// Secrets bundle fetched once at INIT and treated as an immutable snapshot.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    #[serde(alias = "TELEGRAM_TOKEN")]
    pub notification_token: String,
    #[serde(alias = "TELEGRAM_CHAT_ID")]
    pub notification_destination: String,
    /// Provider API keys (e.g. `openai_api_key`) and anything else in the bundle.
    #[serde(flatten)]
    pub provider_api_keys: HashMap<String, serde_json::Value>,
}

impl Credentials {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let credentials: Credentials = serde_json::from_str(raw)
            .map_err(|e| ConfigError::Credentials(format!("malformed bundle: {}", e)))?;

        if credentials.notification_token.trim().is_empty() {
            return Err(ConfigError::Credentials("notification_token is empty".into()));
        }
        if credentials.notification_destination.trim().is_empty() {
            return Err(ConfigError::Credentials(
                "notification_destination is empty".into(),
            ));
        }
        Ok(credentials)
    }

    /// Looks up a provider key by name, ignoring case.
    pub fn provider_key(&self, name: &str) -> Option<&str> {
        self.provider_api_keys
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("notification_token", &"<redacted>")
            .field("notification_destination", &self.notification_destination)
            .field(
                "provider_api_keys",
                &self.provider_api_keys.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Where the credentials bundle lives. Secret storage itself is external.
#[async_trait]
pub trait CredentialsSource: Send + Sync {
    async fn load(&self) -> Result<Credentials, ConfigError>;
}

pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialsSource for EnvCredentials {
    async fn load(&self) -> Result<Credentials, ConfigError> {
        let raw = std::env::var(&self.var)
            .map_err(|_| ConfigError::Credentials(format!("{} is not set", self.var)))?;
        Credentials::from_json(&raw)
    }
}

pub struct FileCredentials {
    path: String,
}

impl FileCredentials {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialsSource for FileCredentials {
    async fn load(&self) -> Result<Credentials, ConfigError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ConfigError::Credentials(format!("cannot read {}: {}", self.path, e))
        })?;
        Credentials::from_json(&raw)
    }
}

/// Fixed bundle, for tests and embedding.
pub struct StaticCredentials(pub Credentials);

#[async_trait]
impl CredentialsSource for StaticCredentials {
    async fn load(&self) -> Result<Credentials, ConfigError> {
        Ok(self.0.clone())
    }
}

pub fn source_from_config(config: &CredentialsConfig) -> Box<dyn CredentialsSource> {
    match &config.path {
        Some(path) => Box::new(FileCredentials::new(path.clone())),
        None => Box::new(EnvCredentials::new(config.env_var.clone())),
    }
}
