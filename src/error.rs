//! Engine error taxonomy.
//!
//! State-precondition violations surface as typed failures rather than silent
//! no-ops, so clients can distinguish a race (double pause) from a bug.

use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session is not active (state: {state})")]
    SessionNotActive { state: SessionState },

    #[error("invalid transition: cannot {op} from {from}")]
    InvalidTransition { from: SessionState, op: &'static str },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("delivery failed: {0}")]
    DeliveryFailure(String),
}

impl EngineError {
    /// Stable machine-readable code for the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SessionNotFound(_) => "session_not_found",
            EngineError::SessionNotActive { .. } => "session_not_active",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Validation(_) => "validation_error",
            EngineError::DeliveryFailure(_) => "delivery_failure",
        }
    }
}
