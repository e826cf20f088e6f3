use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use smartorder_core::{
    Channel, Order, OrderFilter, OrderItem, OrderPage, OrderRepository, OrderStoreError, PreparedOrder,
    StatusTransition,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct OrderTables {
    orders: HashMap<Uuid, Order>,
    numbers: HashMap<String, Uuid>,
    counters: HashMap<i32, i64>,
}

/// Order repository held in process memory. Header, items and the
/// per-year counter live behind one lock so every insert is atomic.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    tables: RwLock<OrderTables>,
    collisions: AtomicU32,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` inserts collide on the order number, as a racing
    /// writer would make them.
    pub fn inject_number_collisions(&self, count: u32) {
        self.collisions.store(count, Ordering::SeqCst);
    }

    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    fn take_collision(&self) -> bool {
        self.collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert_order(&self, prepared: &PreparedOrder) -> Result<Order, OrderStoreError> {
        if prepared.items.is_empty() {
            return Err(OrderStoreError::InvalidOrder("order has no items".to_string()));
        }

        let now = Utc::now();
        let mut tables = self.tables.write().await;
        let year = now.year();
        let next = tables.counters.get(&year).copied().unwrap_or(0) + 1;
        let order_number = format!("ORD-{year}-{next:04}");

        if self.take_collision() || tables.numbers.contains_key(&order_number) {
            tables.counters.insert(year, next);
            return Err(OrderStoreError::DuplicateOrderNumber(order_number));
        }

        let id = Uuid::new_v4();
        let items = prepared
            .items
            .iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                order_id: id,
                product_articul: item.product_articul.clone(),
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                price_at_order: item.price_at_order,
                total: item.total(),
                created_at: now,
            })
            .collect();

        let order = Order {
            id,
            order_number: order_number.clone(),
            status: prepared.status,
            channel: prepared.channel,
            customer_name: prepared.customer_name.clone(),
            customer_phone: prepared.customer_phone.clone(),
            customer_address: prepared.customer_address.clone(),
            customer_email: prepared.customer_email.clone(),
            items,
            delivery_cost: prepared.delivery_cost,
            total_amount: prepared.total_amount,
            tracking_number: None,
            transaction_id: None,
            invoice_exported: false,
            telegram_user_id: prepared.telegram_user_id,
            created_at: now,
            updated_at: now,
            paid_at: None,
            shipped_at: None,
        };

        tables.counters.insert(year, next);
        tables.numbers.insert(order_number, id);
        tables.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, OrderStoreError> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: &StatusTransition,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderStoreError> {
        let mut tables = self.tables.write().await;
        let order = tables.orders.get_mut(&id).ok_or(OrderStoreError::NotFound(id))?;

        let mut updated = order.clone();
        transition.apply(&mut updated, now)?;
        *order = updated.clone();
        Ok(updated)
    }

    async fn mark_invoice_exported(&self, id: Uuid) -> Result<bool, OrderStoreError> {
        let mut tables = self.tables.write().await;
        let order = tables.orders.get_mut(&id).ok_or(OrderStoreError::NotFound(id))?;
        if order.invoice_exported {
            return Ok(false);
        }
        order.invoice_exported = true;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: u32,
        page_size: u32,
    ) -> Result<OrderPage, OrderStoreError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<&Order> = tables
            .orders
            .values()
            .filter(|order| filter.status.is_none_or(|status| order.status == status))
            .filter(|order| filter.channel.is_none_or(|channel| order.channel == channel))
            .filter(|order| {
                filter
                    .customer_phone
                    .as_deref()
                    .is_none_or(|phone| order.customer_phone.as_deref() == Some(phone))
            })
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.order_number.cmp(&a.order_number))
        });

        let total = matching.len() as i64;
        let page = page.max(1);
        let offset = ((page - 1) * page_size) as usize;
        let items = matching
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .cloned()
            .collect();

        Ok(OrderPage::new(items, total, page, page_size))
    }

    async fn orders_by_phone(&self, phone: &str, owner: Option<i64>) -> Result<Vec<Order>, OrderStoreError> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|order| order.customer_phone.as_deref() == Some(phone))
            .filter(|order| match owner {
                Some(owner) if order.channel == Channel::Telegram => order.telegram_user_id == Some(owner),
                _ => true,
            })
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn order_items(&self, id: Uuid) -> Result<Vec<OrderItem>, OrderStoreError> {
        let tables = self.tables.read().await;
        let order = tables.orders.get(&id).ok_or(OrderStoreError::NotFound(id))?;
        Ok(order.items.clone())
    }
}
