use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{CatalogError, OrderStoreError};
use crate::message::DeadLetterEntry;
use crate::models::{
    CatalogProduct, DeliveryQuote, NewOrderItem, Order, OrderFilter, OrderItem, OrderPage, PreparedOrder,
};
use crate::phone::normalize_phone;
use crate::status::StatusTransition;

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Full catalog ordered by product name.
    async fn load_products(&self) -> Result<Vec<CatalogProduct>, CatalogError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Allocates the next order number and writes header and items in one
    /// atomic unit. A number collision surfaces as `DuplicateOrderNumber`.
    async fn insert_order(&self, order: &PreparedOrder) -> Result<Order, OrderStoreError>;

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, OrderStoreError>;

    async fn transition(
        &self,
        id: Uuid,
        transition: &StatusTransition,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderStoreError>;

    /// Sets the export flag. Returns `false` when it was already set.
    async fn mark_invoice_exported(&self, id: Uuid) -> Result<bool, OrderStoreError>;

    async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: u32,
        page_size: u32,
    ) -> Result<OrderPage, OrderStoreError>;

    /// `phone` is already normalized. Telegram orders are restricted to
    /// `owner` when one is given.
    async fn orders_by_phone(&self, phone: &str, owner: Option<i64>) -> Result<Vec<Order>, OrderStoreError>;

    async fn order_items(&self, id: Uuid) -> Result<Vec<OrderItem>, OrderStoreError>;

    async fn normalize_phone(&self, raw: &str) -> Result<Option<String>, OrderStoreError> {
        Ok(normalize_phone(raw))
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Blocks up to `wait` for the next raw message.
    async fn dequeue(&self, wait: Duration) -> anyhow::Result<Option<String>>;
    async fn enqueue(&self, raw: &str) -> anyhow::Result<()>;
    async fn dead_letter(&self, entry: &DeadLetterEntry) -> anyhow::Result<()>;
    async fn ping(&self) -> anyhow::Result<()>;
}

/// Cross-worker dedup markers keyed by an explicit message id.
#[async_trait]
pub trait ProcessingGuard: Send + Sync {
    async fn is_processed(&self, key: &str) -> anyhow::Result<bool>;
    /// Set-if-absent claim. Returns `false` when another worker holds it.
    async fn try_claim(&self, key: &str, worker_id: usize) -> anyhow::Result<bool>;
    async fn release(&self, key: &str) -> anyhow::Result<()>;
    async fn mark_processed(&self, key: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DeliveryQuoter: Send + Sync {
    async fn quote(&self, address: &str, items: &[NewOrderItem]) -> anyhow::Result<DeliveryQuote>;
}
