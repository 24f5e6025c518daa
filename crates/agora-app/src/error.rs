//! # Design
//!
//! - Centralize errors raised while bringing the client context up or down.
//! - Keep error messages constant while carrying the failing operation.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or validated.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: agora_config::ConfigError,
    },
    /// Logging or metrics setup failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: agora_telemetry::TelemetryError,
    },
    /// Transport, session, or hook call failed.
    #[error("client operation failed")]
    Client {
        /// Operation identifier.
        operation: &'static str,
        /// Source client error.
        source: agora_client::ClientError,
    },
    /// The background refresher task could not be joined.
    #[error("background task failed")]
    Task {
        /// Task name.
        task: &'static str,
        /// Source join error.
        source: tokio::task::JoinError,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: agora_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: agora_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn client(operation: &'static str, source: agora_client::ClientError) -> Self {
        Self::Client { operation, source }
    }

    /// Operation that failed.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Config { operation, .. }
            | Self::Telemetry { operation, .. }
            | Self::Client { operation, .. } => operation,
            Self::Task { task, .. } => task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn helpers_keep_operation_and_source() {
        let config = AppError::config(
            "config.load",
            agora_config::ConfigError::MissingField { field: "AGORA_URL" },
        );
        assert!(matches!(config, AppError::Config { .. }));
        assert_eq!(config.operation(), "config.load");
        assert!(config.source().is_some());
        assert_eq!(config.to_string(), "configuration operation failed");

        let client = AppError::client(
            "session.sign_in",
            agora_client::ClientError::MissingSession {
                operation: "session.refresh",
            },
        );
        assert_eq!(client.operation(), "session.sign_in");
    }
}
