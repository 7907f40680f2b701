use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::env::{
    LOGTAIL_API_KEY_ENV, LOGTAIL_API_URL_ENV, LOGTAIL_BATCH_SIZE_ENV, LOGTAIL_ENV_PREFIX,
    LOGTAIL_FLUSH_INTERVAL_MS_ENV, LOGTAIL_TIMEOUT_MS_ENV,
};

pub const DEFAULT_ENDPOINT: &str = "https://in.logtail.com";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("api key is required but empty")]
    ApiKeyMissing,

    #[error("endpoint is not a valid URL: {0}")]
    EndpointInvalidUrl(String),

    #[error("{0} has invalid value: {1}")]
    InvalidNumeric(String, String),
}

/// Settings of a [`LogtailSink`](crate::sink::LogtailSink).
///
/// Zero or empty fields mean "use the default"; they are replaced by
/// [`validated`](Self::validated), which every sink constructor calls.
///
/// **Fields**
/// - `api_key`: source token sent as `Authorization: Bearer <api_key>`.
/// - `endpoint`: ingestion URL, [`DEFAULT_ENDPOINT`] when empty.
/// - `batch_size`: buffered records that trigger a flush (default 100).
/// - `flush_interval`: period of the background flush (default 5s).
/// - `timeout`: bound on a single delivery request (default 10s).
#[derive(Clone, Default, PartialEq)]
pub struct LogtailConfig {
    pub api_key: String,
    pub endpoint: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub timeout: Duration,
}

impl LogtailConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Substitute defaults for zero-valued fields and check the rest.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::ApiKeyMissing);
        }
        if self.endpoint.is_empty() {
            self.endpoint = DEFAULT_ENDPOINT.to_string();
        }
        Url::parse(&self.endpoint).map_err(|_| ConfigError::EndpointInvalidUrl(self.endpoint.clone()))?;
        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.flush_interval.is_zero() {
            self.flush_interval = DEFAULT_FLUSH_INTERVAL;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        Ok(self)
    }

    /// Build a validated config from `LOGTAIL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with(LOGTAIL_ENV_PREFIX))
            .collect();
        Self::parse(&vars)
    }

    fn parse(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let config = Self {
            api_key: vars.get(LOGTAIL_API_KEY_ENV).cloned().unwrap_or_default(),
            endpoint: vars.get(LOGTAIL_API_URL_ENV).cloned().unwrap_or_default(),
            batch_size: parse_usize(vars, LOGTAIL_BATCH_SIZE_ENV)?,
            flush_interval: parse_duration_ms(vars, LOGTAIL_FLUSH_INTERVAL_MS_ENV)?,
            timeout: parse_duration_ms(vars, LOGTAIL_TIMEOUT_MS_ENV)?,
        };
        config.validated()
    }
}

impl fmt::Debug for LogtailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogtailConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn parse_usize(vars: &HashMap<String, String>, name: &str) -> Result<usize, ConfigError> {
    match vars.get(name) {
        Some(val) => val
            .parse()
            .map_err(|_| ConfigError::InvalidNumeric(name.to_owned(), val.clone())),
        None => Ok(0),
    }
}

fn parse_duration_ms(vars: &HashMap<String, String>, name: &str) -> Result<Duration, ConfigError> {
    match vars.get(name) {
        Some(val) => {
            let ms: u64 = val
                .parse()
                .map_err(|_| ConfigError::InvalidNumeric(name.to_owned(), val.clone()))?;
            Ok(Duration::from_millis(ms))
        }
        None => Ok(Duration::ZERO),
    }
}
