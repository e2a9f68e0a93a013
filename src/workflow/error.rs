//! Workflow error taxonomy

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::ServiceRequestStatus;
use crate::services::paystack::GatewayError;
use crate::services::ratings::RatingError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The request is not in a state that accepts the attempted event
    #[error("cannot {action}: current status is {}", current.label())]
    InvalidStateTransition {
        action: &'static str,
        current: ServiceRequestStatus,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("payment validation failed: {reason}")]
    PaymentValidation {
        reason: String,
        expected: Option<Decimal>,
        actual: Option<Decimal>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// The request changed between load and commit without a status change
    #[error("service request {0} was modified concurrently, retry the operation")]
    ConcurrentModification(uuid::Uuid),

    #[error("rating invariant violated: {0}")]
    Rating(#[from] RatingError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn invalid_transition(action: &'static str, current: ServiceRequestStatus) -> Self {
        Self::InvalidStateTransition { action, current }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn payment(reason: impl Into<String>) -> Self {
        Self::PaymentValidation {
            reason: reason.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn amount_mismatch(expected: Decimal, actual: Decimal) -> Self {
        Self::PaymentValidation {
            reason: format!("expected amount {} but payment was {}", expected, actual),
            expected: Some(expected),
            actual: Some(actual),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
