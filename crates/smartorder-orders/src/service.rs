use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use smartorder_core::{
    DeliveryQuoter, NewOrder, Order, OrderFilter, OrderItem, OrderPage, OrderRepository, OrderStatus,
    OrderStoreError, PreparedOrder, RetryPolicy, StatusTransition,
};
use tracing::{info, warn};
use uuid::Uuid;

const MAX_PAGE_SIZE: u32 = 100;

/// Entry point for everything that reads or mutates orders.
pub struct OrderService {
    repository: Arc<dyn OrderRepository>,
    delivery: Option<Arc<dyn DeliveryQuoter>>,
    number_retry: RetryPolicy,
}

impl OrderService {
    pub fn new(repository: Arc<dyn OrderRepository>) -> Self {
        Self {
            repository,
            delivery: None,
            number_retry: RetryPolicy::order_number(),
        }
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn DeliveryQuoter>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn repository(&self) -> &Arc<dyn OrderRepository> {
        &self.repository
    }

    pub async fn create_order(&self, draft: NewOrder) -> Result<Order, OrderStoreError> {
        validate_draft(&draft)?;

        let delivery_cost = self.resolve_delivery_cost(&draft).await;
        let items_total: Decimal = draft.items.iter().map(|item| item.total()).sum();
        let customer_phone = match draft.customer_phone.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(
                self.repository
                    .normalize_phone(raw)
                    .await?
                    .unwrap_or_else(|| raw.to_string()),
            ),
            _ => None,
        };

        let prepared = PreparedOrder {
            channel: draft.channel,
            status: OrderStatus::New,
            customer_name: draft.customer_name,
            customer_phone,
            customer_address: draft.customer_address,
            customer_email: draft.customer_email,
            telegram_user_id: draft.telegram_user_id,
            items: draft.items,
            delivery_cost,
            total_amount: items_total + delivery_cost,
        };

        let attempts = self.number_retry.max_attempts;
        let order = self
            .number_retry
            .run(
                |_| self.repository.insert_order(&prepared),
                |err| matches!(err, OrderStoreError::DuplicateOrderNumber(_)),
            )
            .await
            .map_err(|err| match err {
                OrderStoreError::DuplicateOrderNumber(_) => OrderStoreError::AllocationExhausted { attempts },
                other => other,
            })?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            channel = %order.channel,
            total = %order.total_amount,
            "order created"
        );
        Ok(order)
    }

    async fn resolve_delivery_cost(&self, draft: &NewOrder) -> Decimal {
        if let Some(cost) = draft.delivery_cost {
            return cost;
        }
        let (Some(delivery), Some(address)) = (&self.delivery, draft.customer_address.as_deref()) else {
            return Decimal::ZERO;
        };
        if address.trim().is_empty() {
            return Decimal::ZERO;
        }

        match delivery.quote(address, &draft.items).await {
            Ok(quote) => {
                info!(city = %quote.city, cost = %quote.cost, "delivery cost calculated");
                quote.cost
            }
            Err(err) => {
                warn!(error = %err, "delivery cost lookup failed, using 0");
                Decimal::ZERO
            }
        }
    }

    pub async fn get_order(&self, id: Uuid) -> Result<Order, OrderStoreError> {
        self.repository
            .find_order(id)
            .await?
            .ok_or(OrderStoreError::NotFound(id))
    }

    pub async fn update_status(&self, id: Uuid, transition: StatusTransition) -> Result<Order, OrderStoreError> {
        match self.repository.transition(id, &transition, Utc::now()).await {
            Ok(order) => {
                info!(order_id = %id, status = %order.status, "order status updated");
                Ok(order)
            }
            Err(err) => {
                warn!(order_id = %id, target = %transition.target(), error = %err, "status update rejected");
                Err(err)
            }
        }
    }

    pub async fn mark_invoice_exported(&self, id: Uuid) -> Result<bool, OrderStoreError> {
        self.repository.mark_invoice_exported(id).await
    }

    pub async fn list_orders(&self, filter: OrderFilter, page: u32, page_size: u32) -> Result<OrderPage, OrderStoreError> {
        let mut filter = filter;
        if let Some(raw) = filter.customer_phone.take() {
            filter.customer_phone = Some(self.repository.normalize_phone(&raw).await?.unwrap_or(raw));
        }
        self.repository
            .list_orders(&filter, page.max(1), page_size.clamp(1, MAX_PAGE_SIZE))
            .await
    }

    /// Orders placed with `phone`. With an owner id, Telegram orders are
    /// limited to that user; an unparseable phone yields no orders.
    pub async fn get_orders_by_phone(&self, phone: &str, owner: Option<i64>) -> Result<Vec<Order>, OrderStoreError> {
        let Some(normalized) = self.repository.normalize_phone(phone).await? else {
            warn!(phone, "could not normalize phone");
            return Ok(Vec::new());
        };
        self.repository.orders_by_phone(&normalized, owner).await
    }

    pub async fn get_order_items(&self, id: Uuid) -> Result<Vec<OrderItem>, OrderStoreError> {
        self.repository.order_items(id).await
    }
}

fn validate_draft(draft: &NewOrder) -> Result<(), OrderStoreError> {
    if draft.items.is_empty() {
        return Err(OrderStoreError::InvalidOrder("order must contain at least one item".to_string()));
    }
    if let Some(item) = draft.items.iter().find(|item| item.quantity < 1) {
        return Err(OrderStoreError::InvalidOrder(format!(
            "quantity for {} must be positive",
            item.product_articul
        )));
    }
    if let Some(item) = draft.items.iter().find(|item| item.price_at_order.is_sign_negative()) {
        return Err(OrderStoreError::InvalidOrder(format!(
            "price for {} must not be negative",
            item.product_articul
        )));
    }
    if draft.delivery_cost.is_some_and(|cost| cost.is_sign_negative()) {
        return Err(OrderStoreError::InvalidOrder("delivery cost must not be negative".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use chrono::Datelike;
    use futures_util::future::join_all;
    use smartorder_core::{Channel, DeliveryQuote, NewOrderItem};
    use smartorder_store::InMemoryOrderRepository;

    use super::*;
    use crate::CityRateTable;

    struct BrokenQuoter;

    #[async_trait]
    impl DeliveryQuoter for BrokenQuoter {
        async fn quote(&self, _address: &str, _items: &[NewOrderItem]) -> anyhow::Result<DeliveryQuote> {
            anyhow::bail!("rates service down")
        }
    }

    fn draft(address: Option<&str>, delivery_cost: Option<Decimal>) -> NewOrder {
        NewOrder {
            channel: Channel::Telegram,
            customer_name: Some("Иван Петров".to_string()),
            customer_phone: Some("8 (999) 123-45-67".to_string()),
            customer_address: address.map(str::to_string),
            customer_email: None,
            telegram_user_id: Some(42),
            items: vec![
                NewOrderItem {
                    product_articul: "ФР-00000001".to_string(),
                    product_name: "Варочная панель".to_string(),
                    quantity: 2,
                    price_at_order: Decimal::new(1_999_950, 2),
                },
                NewOrderItem {
                    product_articul: "ФР-00000002".to_string(),
                    product_name: "Духовой шкаф".to_string(),
                    quantity: 1,
                    price_at_order: Decimal::from(35_000),
                },
            ],
            delivery_cost,
        }
    }

    fn service() -> (Arc<InMemoryOrderRepository>, OrderService) {
        let repository = Arc::new(InMemoryOrderRepository::new());
        let service = OrderService::new(repository.clone());
        (repository, service)
    }

    #[tokio::test]
    async fn total_includes_items_and_delivery() {
        let (_, service) = service();

        let order = service.create_order(draft(None, Some(Decimal::from(500)))).await.unwrap();

        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.total_amount, Decimal::from(75_499));
        assert_eq!(order.customer_phone.as_deref(), Some("+79991234567"));
        assert_eq!(order.items[0].total, Decimal::from(39_999));
    }

    #[tokio::test]
    async fn total_is_not_recomputed_by_transitions() {
        let (_, service) = service();
        let order = service.create_order(draft(None, Some(Decimal::ZERO))).await.unwrap();

        service.update_status(order.id, StatusTransition::Validate).await.unwrap();
        service.update_status(order.id, StatusTransition::CreateInvoice).await.unwrap();
        let paid = service
            .update_status(
                order.id,
                StatusTransition::Pay {
                    transaction_id: Some("TXN-1".to_string()),
                    paid_at: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(paid.total_amount, order.total_amount);
        assert!(paid.paid_at.is_some());
    }

    #[tokio::test]
    async fn delivery_is_quoted_when_missing() {
        let repository = Arc::new(InMemoryOrderRepository::new());
        let service = OrderService::new(repository).with_delivery(Arc::new(CityRateTable::default()));

        let order = service
            .create_order(draft(Some("Москва, ул. Тверская, д. 1"), None))
            .await
            .unwrap();

        assert_eq!(order.delivery_cost, Decimal::from(500));
        assert_eq!(order.total_amount, Decimal::from(75_499));
    }

    #[tokio::test]
    async fn delivery_failure_defaults_to_zero() {
        let repository = Arc::new(InMemoryOrderRepository::new());
        let service = OrderService::new(repository).with_delivery(Arc::new(BrokenQuoter));

        let order = service.create_order(draft(Some("Иркутск, ул. Шукшина, 60"), None)).await.unwrap();

        assert_eq!(order.delivery_cost, Decimal::ZERO);
        assert_eq!(order.total_amount, Decimal::from(74_999));
    }

    #[tokio::test]
    async fn concurrent_creations_get_distinct_numbers() {
        let (_, service) = service();
        let service = Arc::new(service);

        let orders = join_all((0..20).map(|_| {
            let service = service.clone();
            async move { service.create_order(draft(None, Some(Decimal::ZERO))).await }
        }))
        .await;

        let year = Utc::now().year();
        let numbers: HashSet<String> = orders.into_iter().map(|order| order.unwrap().order_number).collect();
        assert_eq!(numbers.len(), 20);
        assert!(numbers.iter().all(|number| number.starts_with(&format!("ORD-{year}-"))
            && number.len() == "ORD-0000-0000".len()));
    }

    #[tokio::test(start_paused = true)]
    async fn number_collisions_are_retried() {
        let (repository, service) = service();
        repository.inject_number_collisions(2);

        let order = service.create_order(draft(None, Some(Decimal::ZERO))).await.unwrap();

        assert!(order.order_number.starts_with("ORD-"));
        assert_eq!(repository.order_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn number_collisions_exhaust_after_three_attempts() {
        let (repository, service) = service();
        repository.inject_number_collisions(3);

        let err = service.create_order(draft(None, Some(Decimal::ZERO))).await.unwrap_err();

        assert_eq!(err, OrderStoreError::AllocationExhausted { attempts: 3 });
        assert_eq!(repository.order_count().await, 0);
    }

    #[tokio::test]
    async fn empty_or_zero_quantity_orders_are_rejected() {
        let (repository, service) = service();
        let mut empty = draft(None, None);
        empty.items.clear();
        let mut zero = draft(None, None);
        zero.items[0].quantity = 0;

        assert!(matches!(service.create_order(empty).await, Err(OrderStoreError::InvalidOrder(_))));
        assert!(matches!(service.create_order(zero).await, Err(OrderStoreError::InvalidOrder(_))));
        assert_eq!(repository.order_count().await, 0);
    }

    #[tokio::test]
    async fn illegal_transition_names_both_statuses() {
        let (_, service) = service();
        let order = service.create_order(draft(None, None)).await.unwrap();

        let err = service
            .update_status(
                order.id,
                StatusTransition::Ship {
                    tracking_number: None,
                    shipped_at: None,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            OrderStoreError::InvalidTransition {
                from: OrderStatus::New,
                to: OrderStatus::Shipped
            }
        );
        assert_eq!(service.get_order(order.id).await.unwrap().status, OrderStatus::New);
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let (_, service) = service();
        let id = Uuid::new_v4();

        assert_eq!(service.get_order(id).await.unwrap_err(), OrderStoreError::NotFound(id));
        assert!(service.update_status(id, StatusTransition::Cancel).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn phone_lookup_normalizes_and_checks_owner() {
        let (_, service) = service();
        service.create_order(draft(None, None)).await.unwrap();

        assert_eq!(service.get_orders_by_phone("+7 999 123 45 67", Some(42)).await.unwrap().len(), 1);
        assert!(service.get_orders_by_phone("89991234567", Some(7)).await.unwrap().is_empty());
        assert!(service.get_orders_by_phone("12", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn items_and_listing() {
        let (_, service) = service();
        let order = service.create_order(draft(None, None)).await.unwrap();

        let items = service.get_order_items(order.id).await.unwrap();
        assert_eq!(items.len(), 2);

        let filter = OrderFilter {
            customer_phone: Some("89991234567".to_string()),
            ..OrderFilter::default()
        };
        let page = service.list_orders(filter, 0, 1000).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
    }
}
