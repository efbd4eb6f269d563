//! Error types for the call engine.
//!
//! Façade operations return a two-valued outcome: `Ok` or an API failure
//! describing the misuse. Transport and media failures are never raised
//! through the façade; they flow through the event stream as `Ended*`
//! events.

use thiserror::Error;

use crate::types::CallId;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, CallError>;

/// Failures reported synchronously from a façade operation.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// The referenced call is not in the registry.
    #[error("call not found: {call_id}")]
    CallNotFound {
        call_id: CallId,
    },

    /// The operation is not valid in the call's current state.
    #[error("invalid state for {operation}: {details}")]
    InvalidState {
        operation: &'static str,
        details: String,
    },

    /// An operation that requires an active call found none.
    #[error("no active call")]
    NoActiveCall,

    /// The engine's event task is gone (after shutdown or panic).
    #[error("call engine is not running")]
    EngineStopped,

    /// Invariant violation inside the engine.
    #[error("internal error: {message}")]
    Internal {
        message: String,
    },
}

impl CallError {
    pub(crate) fn invalid_state(operation: &'static str, details: impl Into<String>) -> Self {
        CallError::InvalidState {
            operation,
            details: details.into(),
        }
    }

    /// Coarse grouping for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            CallError::CallNotFound { .. } => "call",
            CallError::InvalidState { .. } | CallError::NoActiveCall => "state",
            CallError::EngineStopped => "engine",
            CallError::Internal { .. } => "internal",
        }
    }

    /// True when the failure is application misuse rather than an engine
    /// fault.
    pub fn is_api_misuse(&self) -> bool {
        !matches!(self, CallError::Internal { .. } | CallError::EngineStopped)
    }
}
