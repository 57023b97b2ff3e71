//! Domain errors raised by validation, integrity checks, and lookups.
//!
//! These are bounded and stable: they describe refusal states of the state
//! machine, not backend implementation details.

use thiserror::Error;

use super::json_canon::CanonJsonError;

/// Canonical error enum for the core state machine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// An event failed a precondition against the current projection.
    /// `reason` is a stable machine-readable code; `detail` is for humans.
    #[error("validation failed ({reason}): {detail}")]
    Validation { reason: &'static str, detail: String },

    /// A digest, hash chain, or signature did not check out.
    #[error("integrity violation ({reason}): {detail}")]
    Integrity { reason: &'static str, detail: String },

    /// Lookup miss.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A concurrent writer won the race; the caller may retry.
    #[error("concurrent write conflict")]
    Conflict,

    /// A state backend failed mechanically (not a domain refusal).
    #[error("state backend error: {0}")]
    Storage(String),

    #[error(transparent)]
    Canon(#[from] CanonJsonError),
}

impl CoreError {
    pub fn validation(reason: &'static str, detail: impl Into<String>) -> Self {
        CoreError::Validation {
            reason,
            detail: detail.into(),
        }
    }

    pub fn integrity(reason: &'static str, detail: impl Into<String>) -> Self {
        CoreError::Integrity {
            reason,
            detail: detail.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// The machine-readable reason code, if this error carries one.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            CoreError::Validation { reason, .. } => Some(reason),
            CoreError::Integrity { reason, .. } => Some(reason),
            _ => None,
        }
    }
}
