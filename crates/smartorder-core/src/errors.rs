use thiserror::Error;
use uuid::Uuid;

use crate::status::OrderStatus;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderStoreError {
    #[error("order {0} not found")]
    NotFound(Uuid),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("order number {0} already exists")]
    DuplicateOrderNumber(String),

    #[error("could not allocate a unique order number after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    #[error("database error: {0}")]
    Database(String),
}

impl OrderStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrderStoreError::NotFound(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog source unavailable: {0}")]
    Unavailable(String),

    #[error("catalog is empty")]
    Empty,
}
