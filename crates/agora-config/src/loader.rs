//! Environment-driven construction of [`ClientConfig`].

use std::str::FromStr;
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::model::ClientConfig;

/// Backend base URL.
pub const ENV_URL: &str = "AGORA_URL";
/// Anonymous API key.
pub const ENV_ANON_KEY: &str = "AGORA_ANON_KEY";
/// Session persistence path.
pub const ENV_SESSION_PATH: &str = "AGORA_SESSION_PATH";
/// Token refresh margin in seconds.
pub const ENV_REFRESH_MARGIN_SECS: &str = "AGORA_REFRESH_MARGIN_SECS";
/// Real-time events per second.
pub const ENV_REALTIME_EPS: &str = "AGORA_REALTIME_EPS";
/// Request timeout in seconds.
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "AGORA_REQUEST_TIMEOUT_SECS";
/// Cache staleness window in seconds.
pub const ENV_CACHE_STALE_SECS: &str = "AGORA_CACHE_STALE_SECS";
/// Default page size.
pub const ENV_PAGE_SIZE: &str = "AGORA_PAGE_SIZE";
/// Log level.
pub const ENV_LOG_LEVEL: &str = "AGORA_LOG_LEVEL";
/// Log format (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "AGORA_LOG_FORMAT";

impl ClientConfig {
    /// Load settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or any
    /// value fails to parse or validate.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary lookup (environment, file, test map).
    ///
    /// Blank values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required value is missing or any value
    /// fails to parse or validate.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let endpoint_raw = read(ENV_URL).ok_or(ConfigError::MissingField { field: ENV_URL })?;
        let endpoint = Url::parse(&endpoint_raw)
            .map_err(|_| ConfigError::invalid(ENV_URL, Some(&endpoint_raw), "invalid_url"))?;
        let anon_key = read(ENV_ANON_KEY).ok_or(ConfigError::MissingField {
            field: ENV_ANON_KEY,
        })?;

        let mut config = Self::new(endpoint, anon_key);
        if let Some(path) = read(ENV_SESSION_PATH) {
            config.session_path = Some(path.into());
        }
        if let Some(secs) = parse_opt::<u64>(ENV_REFRESH_MARGIN_SECS, read(ENV_REFRESH_MARGIN_SECS))? {
            config.refresh_margin = Duration::from_secs(secs);
        }
        if let Some(eps) = parse_opt::<u32>(ENV_REALTIME_EPS, read(ENV_REALTIME_EPS))? {
            config.realtime_events_per_second = eps;
        }
        if let Some(secs) =
            parse_opt::<u64>(ENV_REQUEST_TIMEOUT_SECS, read(ENV_REQUEST_TIMEOUT_SECS))?
        {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_opt::<u64>(ENV_CACHE_STALE_SECS, read(ENV_CACHE_STALE_SECS))? {
            config.cache_stale_after = Duration::from_secs(secs);
        }
        if let Some(size) = parse_opt::<u32>(ENV_PAGE_SIZE, read(ENV_PAGE_SIZE))? {
            config.default_page_size = size;
        }
        if let Some(level) = read(ENV_LOG_LEVEL) {
            config.log_level = level;
        }
        config.log_format = read(ENV_LOG_FORMAT);

        config.validate()?;
        debug!(endpoint = %config.endpoint, "client configuration loaded");
        Ok(config)
    }
}

fn parse_opt<T: FromStr>(field: &'static str, raw: Option<String>) -> ConfigResult<Option<T>> {
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|_| ConfigError::invalid(field, Some(&value), "not_a_number"))
    })
    .transpose()
}
