//! Error taxonomy shared by every backend call.
//!
//! Messages are constant; context travels in fields so callers can branch on
//! [`ClientError::kind`] without parsing strings.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use agora_config::ConfigError;
use agora_models::ModelError;
use thiserror::Error;

/// Coarse error category callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport failure, timeout, or server-side outage. Retrying may help.
    Network,
    /// Missing, expired, or rejected credentials.
    Auth,
    /// The backend refused the write (constraint, policy, or stale state).
    Rejected,
    /// The addressed record does not exist or is not visible.
    NotFound,
    /// A payload failed client-side validation.
    InvalidInput,
    /// A status change outside the allowed state machine.
    InvalidTransition,
    /// The backend answered with data the client could not interpret.
    Decode,
    /// The caller cancelled the operation.
    Cancelled,
    /// Persisting or loading the session failed.
    Storage,
}

impl ErrorKind {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Rejected => "rejected",
            Self::NotFound => "not_found",
            Self::InvalidInput => "invalid_input",
            Self::InvalidTransition => "invalid_transition",
            Self::Decode => "decode",
            Self::Cancelled => "cancelled",
            Self::Storage => "storage",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Errors produced by the transport, session, and data layers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP request never produced a response.
    #[error("backend request failed")]
    Transport {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// Timeout, throttling, or 5xx answer from the backend.
    #[error("backend unavailable")]
    Unavailable {
        /// Operation identifier.
        operation: &'static str,
        /// HTTP status returned.
        status: u16,
        /// Backend-provided message.
        message: Option<String>,
    },
    /// Credentials were missing, expired, or refused.
    #[error("authentication required")]
    Unauthorized {
        /// Operation identifier.
        operation: &'static str,
        /// Backend error code, when provided.
        code: Option<String>,
        /// Backend-provided message.
        message: Option<String>,
    },
    /// A refresh was requested while signed out.
    #[error("no session available")]
    MissingSession {
        /// Operation identifier.
        operation: &'static str,
    },
    /// The backend refused the request.
    #[error("backend rejected the request")]
    Rejected {
        /// Operation identifier.
        operation: &'static str,
        /// HTTP status returned.
        status: u16,
        /// Backend error code (`23505`, `23503`, ...), when provided.
        code: Option<String>,
        /// Backend-provided message.
        message: Option<String>,
    },
    /// A status-guarded write lost a race with another writer.
    #[error("record status changed concurrently")]
    StaleStatus {
        /// Operation identifier.
        operation: &'static str,
        /// Status the write expected to find.
        expected: &'static str,
    },
    /// The addressed record does not exist.
    #[error("record not found")]
    NotFound {
        /// Operation identifier.
        operation: &'static str,
        /// Table or resource that was addressed.
        resource: &'static str,
    },
    /// A payload failed validation before leaving the client.
    #[error("invalid input")]
    Invalid {
        /// Operation identifier.
        operation: &'static str,
        /// Validation failure.
        #[source]
        source: ModelError,
    },
    /// Client configuration was unusable.
    #[error("invalid client configuration")]
    Config(#[from] ConfigError),
    /// A header value could not be encoded.
    #[error("invalid request header")]
    Header {
        /// Operation identifier.
        operation: &'static str,
        /// Header name.
        name: &'static str,
    },
    /// The response body was not the expected JSON shape.
    #[error("failed to decode backend response")]
    Decode {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// The response parsed but broke a structural expectation.
    #[error("unexpected backend response")]
    Unexpected {
        /// Operation identifier.
        operation: &'static str,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// The caller cancelled the operation before it completed.
    #[error("operation cancelled")]
    Cancelled {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Reading or writing the session file failed.
    #[error("session storage failed")]
    Storage {
        /// Operation identifier.
        operation: &'static str,
        /// File involved, when known.
        path: Option<PathBuf>,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The session file held malformed data.
    #[error("session storage held malformed data")]
    StorageFormat {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// The HTTP client could not be constructed.
    #[error("failed to build http client")]
    HttpClient {
        /// Underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl ClientError {
    /// Wrap a validation failure raised while performing `operation`.
    #[must_use]
    pub const fn invalid(operation: &'static str, source: ModelError) -> Self {
        Self::Invalid { operation, source }
    }

    /// Category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::Unavailable { .. } | Self::HttpClient { .. } => {
                ErrorKind::Network
            }
            Self::Unauthorized { .. } | Self::MissingSession { .. } => ErrorKind::Auth,
            Self::Rejected { .. } | Self::StaleStatus { .. } => ErrorKind::Rejected,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Invalid {
                source: ModelError::Transition(_),
                ..
            } => ErrorKind::InvalidTransition,
            Self::Invalid { .. } | Self::Config(_) | Self::Header { .. } => ErrorKind::InvalidInput,
            Self::Decode { .. } | Self::Unexpected { .. } => ErrorKind::Decode,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Storage { .. } | Self::StorageFormat { .. } => ErrorKind::Storage,
        }
    }

    /// Whether the failure is transient; only network-class errors are.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network)
    }

    /// Backend error code carried by auth and rejection errors.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } | Self::Unauthorized { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Operation identifier, when the variant carries one.
    #[must_use]
    pub const fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Transport { operation, .. }
            | Self::Unavailable { operation, .. }
            | Self::Unauthorized { operation, .. }
            | Self::MissingSession { operation }
            | Self::Rejected { operation, .. }
            | Self::StaleStatus { operation, .. }
            | Self::NotFound { operation, .. }
            | Self::Invalid { operation, .. }
            | Self::Header { operation, .. }
            | Self::Decode { operation, .. }
            | Self::Unexpected { operation, .. }
            | Self::Cancelled { operation }
            | Self::Storage { operation, .. }
            | Self::StorageFormat { operation, .. } => Some(operation),
            Self::Config(_) | Self::HttpClient { .. } => None,
        }
    }
}

/// Convenience alias for client results.
pub type ClientResult<T> = Result<T, ClientError>;
