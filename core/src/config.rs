//! Flow configuration.
//!
//! Loaded from TOML text or from `TOPICFLOW_*` environment variables:
//!
//! - `TOPICFLOW_STREAM_HIGH_WATER_MARK` (positive integer, default 16)
//! - `TOPICFLOW_UNHANDLED_ERRORS` (`panic` | `log`, default `panic`)

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

const ENV_HIGH_WATER_MARK: &str = "TOPICFLOW_STREAM_HIGH_WATER_MARK";
const ENV_UNHANDLED_ERRORS: &str = "TOPICFLOW_UNHANDLED_ERRORS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid flow configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: String, value: String },
}

/// What the store does with an error nobody listens to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnhandledErrors {
    /// Panic at the emit site, surfacing the failure at the host's fault boundary.
    #[default]
    Panic,
    /// Log at `error` level and carry on.
    Log,
}

impl UnhandledErrors {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "panic" => Some(Self::Panic),
            "log" => Some(Self::Log),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Items a stream bridge hands downstream before it reports saturation.
    pub stream_high_water_mark: usize,
    pub unhandled_errors: UnhandledErrors,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            stream_high_water_mark: DEFAULT_HIGH_WATER_MARK,
            unhandled_errors: UnhandledErrors::default(),
        }
    }
}

impl FlowConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: FlowConfig = toml::from_str(raw)?;
        config.validate()
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = FlowConfig::default();

        if let Some(raw) = lookup(ENV_HIGH_WATER_MARK) {
            config.stream_high_water_mark =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: ENV_HIGH_WATER_MARK.to_string(),
                        value: raw.clone(),
                    })?;
        }

        if let Some(raw) = lookup(ENV_UNHANDLED_ERRORS) {
            config.unhandled_errors =
                UnhandledErrors::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                    key: ENV_UNHANDLED_ERRORS.to_string(),
                    value: raw.clone(),
                })?;
        }

        config.validate()
    }

    pub fn with_high_water_mark(mut self, items: usize) -> Self {
        self.stream_high_water_mark = items;
        self
    }

    pub fn with_unhandled_errors(mut self, policy: UnhandledErrors) -> Self {
        self.unhandled_errors = policy;
        self
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.stream_high_water_mark == 0 {
            return Err(ConfigError::InvalidValue {
                key: "stream_high_water_mark".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(self)
    }
}
