//! Default values for client settings.

use std::time::Duration;

/// Refresh tokens this long before they expire.
pub(crate) const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);
/// Longest accepted refresh margin (one day).
pub(crate) const MAX_REFRESH_MARGIN: Duration = Duration::from_secs(86_400);
/// Real-time push ceiling agreed with the backend.
pub(crate) const DEFAULT_REALTIME_EPS: u32 = 10;
/// Per-request timeout.
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Cached reads are refetched after five minutes.
pub(crate) const DEFAULT_CACHE_STALE_AFTER: Duration = Duration::from_secs(300);
/// Rows per page when a read does not specify one.
pub(crate) const DEFAULT_PAGE_SIZE: u32 = 20;
/// Largest page PostgREST is asked for.
pub(crate) const MAX_PAGE_SIZE: u32 = 1_000;
/// Log level when none is configured.
pub(crate) const DEFAULT_LOG_LEVEL: &str = "info";
