use std::time::Duration;

use smartorder_core::{OrderStatus, OrderStoreError};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Outcome of one submission to the invoicing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("invoicing endpoint temporarily unavailable: {0}")]
    Transient(String),
    #[error("invoicing endpoint refused the request (HTTP {status}): {message}")]
    Permanent { status: u16, message: String },
    #[error("invoicing endpoint rejected the invoice: {0}")]
    Rejected(String),
    /// Recent exports kept failing; no request was sent.
    #[error("invoicing endpoint is failing, export paused for {}s", .retry_in.as_secs())]
    CircuitOpen { retry_in: Duration },
}

impl SubmitError {
    /// Application-level rejections are retried as well; the endpoint
    /// reports lock conflicts that way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Transient(_) | SubmitError::Rejected(_))
    }
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("order {0} not found")]
    NotFound(Uuid),
    #[error("order is {current}, expected {expected}")]
    InvalidState {
        current: OrderStatus,
        expected: OrderStatus,
    },
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invoice export failed: {0}")]
    Export(#[from] SubmitError),
    #[error("processing failed")]
    Processing,
}

impl From<OrderStoreError> for TriggerError {
    fn from(err: OrderStoreError) -> Self {
        match err {
            OrderStoreError::NotFound(id) => TriggerError::NotFound(id),
            OrderStoreError::InvalidTransition { from, to } => TriggerError::InvalidTransition { from, to },
            other => {
                error!(error = %other, "order store failure in trigger");
                TriggerError::Processing
            }
        }
    }
}
