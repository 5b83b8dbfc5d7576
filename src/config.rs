use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use url::Url;
use crate::core::{ConfigError, Constraints, ManagerConfig, UploadSettings};

fn default_max_concurrent() -> usize {
    3
}

fn default_event_capacity() -> usize {
    256
}

/// Contents of the TOML config file
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub endpoint: Url,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub settings: UploadSettings,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let config_str = fs::read_to_string(path)?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid("max_concurrent must be at least 1".to_string()));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("timeout_secs must be positive".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be at least 1".to_string()));
        }
        if !matches!(self.endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!("unsupported endpoint scheme {}", self.endpoint.scheme())));
        }
        self.settings
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_concurrent: self.max_concurrent,
            constraints: self.constraints.clone(),
            timeout: self.timeout(),
            event_capacity: self.event_capacity,
            ..Default::default()
        }
    }
}
