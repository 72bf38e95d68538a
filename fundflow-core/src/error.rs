//! Domain error taxonomy.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::model::RequestStatus;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised by workflow rules before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// The action is not permitted from the request's current status.
    #[error("cannot {action} a request in status {status}")]
    InvalidTransition {
        status: RequestStatus,
        action: &'static str,
    },

    /// The actor lacks permission for the action.
    #[error("not authorized: {reason}")]
    Unauthorized { reason: String },

    /// Block-mode budget enforcement tripped.
    #[error("budget exceeded: {requested} requested but only {remaining} remaining")]
    BudgetExceeded {
        remaining: Decimal,
        requested: Decimal,
    },

    /// Malformed input, rejected before touching the store.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl WorkflowError {
    pub fn invalid_transition(status: RequestStatus, action: &'static str) -> Self {
        Self::InvalidTransition { status, action }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
