//! Typed client configuration.
//!
//! # Design
//! - One immutable value built at startup and shared read-only afterwards.
//! - Defaults live in `defaults.rs`; parsing lives in `loader.rs`.

use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::defaults::{
    DEFAULT_CACHE_STALE_AFTER, DEFAULT_LOG_LEVEL, DEFAULT_PAGE_SIZE, DEFAULT_REALTIME_EPS,
    DEFAULT_REFRESH_MARGIN, DEFAULT_REQUEST_TIMEOUT, MAX_PAGE_SIZE, MAX_REFRESH_MARGIN,
};
use crate::error::{ConfigError, ConfigResult};

/// Settings for the backend client, session handling, and cache.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the hosted backend (scheme + host, optional path prefix).
    pub endpoint: Url,
    /// Public anonymous API key sent with every request.
    pub anon_key: String,
    /// Where the session is persisted; `None` keeps it in memory.
    pub session_path: Option<PathBuf>,
    /// Refresh the access token this long before it expires.
    pub refresh_margin: Duration,
    /// Ceiling on real-time push events per second.
    pub realtime_events_per_second: u32,
    /// Per-request timeout applied by the HTTP client.
    pub request_timeout: Duration,
    /// Cached reads older than this are refetched.
    pub cache_stale_after: Duration,
    /// Page size used when a read does not specify one.
    pub default_page_size: u32,
    /// Log level passed to the tracing filter.
    pub log_level: String,
    /// Log format label (`json` or `pretty`); inferred when absent.
    pub log_format: Option<String>,
}

impl ClientConfig {
    /// Build a configuration with defaults for everything but the endpoint and key.
    #[must_use]
    pub fn new(endpoint: Url, anon_key: impl Into<String>) -> Self {
        Self {
            endpoint,
            anon_key: anon_key.into(),
            session_path: None,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            realtime_events_per_second: DEFAULT_REALTIME_EPS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cache_stale_after: DEFAULT_CACHE_STALE_AFTER,
            default_page_size: DEFAULT_PAGE_SIZE,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: None,
        }
    }

    /// Persist the session at `path`.
    #[must_use]
    pub fn with_session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = Some(path.into());
        self
    }

    /// Override the token refresh margin.
    #[must_use]
    pub const fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Override the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the cache staleness window.
    #[must_use]
    pub const fn with_cache_stale_after(mut self, stale_after: Duration) -> Self {
        self.cache_stale_after = stale_after;
        self
    }

    /// Override the default page size.
    #[must_use]
    pub const fn with_default_page_size(mut self, page_size: u32) -> Self {
        self.default_page_size = page_size;
        self
    }

    /// Override the real-time event ceiling.
    #[must_use]
    pub const fn with_realtime_events_per_second(mut self, events: u32) -> Self {
        self.realtime_events_per_second = events;
        self
    }

    /// URL of a PostgREST table or view, e.g. `<endpoint>/rest/v1/posts`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] if the endpoint cannot be joined.
    pub fn rest_url(&self, table: &str) -> ConfigResult<Url> {
        self.join(&format!("rest/v1/{table}"))
    }

    /// URL of an auth endpoint, e.g. `<endpoint>/auth/v1/token`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] if the endpoint cannot be joined.
    pub fn auth_url(&self, path: &str) -> ConfigResult<Url> {
        self.join(&format!("auth/v1/{path}"))
    }

    fn join(&self, relative: &str) -> ConfigResult<Url> {
        let mut base = self.endpoint.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(relative).map_err(|_| {
            ConfigError::invalid("endpoint", Some(self.endpoint.as_str()), "not_joinable")
        })
    }

    /// Check the invariants every consumer relies on.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn validate(&self) -> ConfigResult<()> {
        if !matches!(self.endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "endpoint",
                Some(self.endpoint.as_str()),
                "must_be_http_or_https",
            ));
        }
        if self.endpoint.cannot_be_a_base() || self.endpoint.host_str().is_none() {
            return Err(ConfigError::invalid(
                "endpoint",
                Some(self.endpoint.as_str()),
                "must_have_host",
            ));
        }
        if self.anon_key.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "anon_key" });
        }
        if self.default_page_size == 0 || self.default_page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::invalid(
                "default_page_size",
                Some(&self.default_page_size.to_string()),
                "must_be_between_1_and_1000",
            ));
        }
        if self.realtime_events_per_second == 0 {
            return Err(ConfigError::invalid(
                "realtime_events_per_second",
                Some("0"),
                "must_be_positive",
            ));
        }
        if self.refresh_margin > MAX_REFRESH_MARGIN {
            return Err(ConfigError::invalid(
                "refresh_margin",
                Some(&self.refresh_margin.as_secs().to_string()),
                "must_be_at_most_one_day",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "request_timeout",
                Some("0"),
                "must_be_positive",
            ));
        }
        Ok(())
    }
}

impl Debug for ClientConfig {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("anon_key", &"<redacted>")
            .field("session_path", &self.session_path)
            .field("refresh_margin", &self.refresh_margin)
            .field("realtime_events_per_second", &self.realtime_events_per_second)
            .field("request_timeout", &self.request_timeout)
            .field("cache_stale_after", &self.cache_stale_after)
            .field("default_page_size", &self.default_page_size)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .finish()
    }
}
