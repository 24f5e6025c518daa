//! Error types for payload validation and status transitions.

use thiserror::Error;

/// Validation failure raised before a payload leaves the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// A payload field failed validation.
    #[error("invalid payload field")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// A backend row violated an invariant the client relies on.
    #[error("invalid record")]
    InvalidRecord {
        /// Record kind (for example `post`).
        record: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// A status transition was not in the allowed set.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl ModelError {
    pub(crate) const fn field(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidField { field, reason }
    }
}

/// Status change rejected by an entity state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition")]
pub struct TransitionError {
    /// Entity kind whose machine rejected the change.
    pub entity: &'static str,
    /// Status the record currently holds.
    pub from: &'static str,
    /// Status the caller asked for.
    pub to: &'static str,
}

/// Convenience alias for model results.
pub type ModelResult<T> = Result<T, ModelError>;
