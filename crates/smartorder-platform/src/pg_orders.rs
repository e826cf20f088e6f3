use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use smartorder_core::{
    Channel, Order, OrderFilter, OrderItem, OrderPage, OrderRepository, OrderStatus, OrderStoreError, PreparedOrder,
    StatusTransition, normalize_phone,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::warn;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, order_number, status, channel, customer_name, customer_phone, customer_address, \
     customer_email, total_amount, delivery_cost, tracking_number, transaction_id, invoice_exported_to_1c, \
     telegram_user_id, created_at, updated_at, paid_at, shipped_at";

const ITEM_COLUMNS: &str = "id, order_id, product_articul, product_name, quantity, price_at_order, total, created_at";

/// Orders and their items in Postgres. Order numbers come from the
/// `generate_order_number()` server function.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(err: sqlx::Error) -> OrderStoreError {
    OrderStoreError::Database(err.to_string())
}

fn order_from_row(row: &PgRow, items: Vec<OrderItem>) -> Result<Order, OrderStoreError> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let channel: String = row.try_get("channel").map_err(db_error)?;

    Ok(Order {
        id: row.try_get("id").map_err(db_error)?,
        order_number: row.try_get("order_number").map_err(db_error)?,
        status: status.parse()?,
        channel: channel
            .parse::<Channel>()
            .map_err(OrderStoreError::Database)?,
        customer_name: row.try_get("customer_name").map_err(db_error)?,
        customer_phone: row.try_get("customer_phone").map_err(db_error)?,
        customer_address: row.try_get("customer_address").map_err(db_error)?,
        customer_email: row.try_get("customer_email").map_err(db_error)?,
        items,
        delivery_cost: row.try_get("delivery_cost").map_err(db_error)?,
        total_amount: row.try_get("total_amount").map_err(db_error)?,
        tracking_number: row.try_get("tracking_number").map_err(db_error)?,
        transaction_id: row.try_get("transaction_id").map_err(db_error)?,
        invoice_exported: row.try_get("invoice_exported_to_1c").map_err(db_error)?,
        telegram_user_id: row.try_get("telegram_user_id").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
        paid_at: row.try_get("paid_at").map_err(db_error)?,
        shipped_at: row.try_get("shipped_at").map_err(db_error)?,
    })
}

fn item_from_row(row: &PgRow) -> Result<OrderItem, OrderStoreError> {
    Ok(OrderItem {
        id: row.try_get("id").map_err(db_error)?,
        order_id: row.try_get("order_id").map_err(db_error)?,
        product_articul: row.try_get("product_articul").map_err(db_error)?,
        product_name: row.try_get("product_name").map_err(db_error)?,
        quantity: row.try_get("quantity").map_err(db_error)?,
        price_at_order: row.try_get("price_at_order").map_err(db_error)?,
        total: row.try_get("total").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
    })
}

async fn load_items(conn: &mut PgConnection, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>, OrderStoreError> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY created_at, id");
    let rows = sqlx::query(&sql)
        .bind(order_ids)
        .fetch_all(conn)
        .await
        .map_err(db_error)?;

    let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    for row in &rows {
        let item = item_from_row(row)?;
        grouped.entry(item.order_id).or_default().push(item);
    }
    Ok(grouped)
}

async fn orders_with_items(conn: &mut PgConnection, rows: Vec<PgRow>) -> Result<Vec<Order>, OrderStoreError> {
    let ids = rows
        .iter()
        .map(|row| row.try_get::<Uuid, _>("id").map_err(db_error))
        .collect::<Result<Vec<_>, _>>()?;
    let mut items = load_items(conn, &ids).await?;

    rows.iter()
        .zip(&ids)
        .map(|(row, id)| order_from_row(row, items.remove(id).unwrap_or_default()))
        .collect()
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert_order(&self, order: &PreparedOrder) -> Result<Order, OrderStoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let order_number: String = sqlx::query_scalar("SELECT generate_order_number()")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;

        let sql = format!(
            r#"
            INSERT INTO orders (
                order_number, status, channel, customer_name, customer_phone, customer_address,
                customer_email, total_amount, delivery_cost, invoice_exported_to_1c, telegram_user_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10)
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&order_number)
            .bind(order.status.as_str())
            .bind(order.channel.as_str())
            .bind(&order.customer_name)
            .bind(&order.customer_phone)
            .bind(&order.customer_address)
            .bind(&order.customer_email)
            .bind(order.total_amount)
            .bind(order.delivery_cost)
            .bind(order.telegram_user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| {
                if err.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                    OrderStoreError::DuplicateOrderNumber(order_number.clone())
                } else {
                    db_error(err)
                }
            })?;
        let order_id: Uuid = row.try_get("id").map_err(db_error)?;

        let item_sql = format!(
            r#"
            INSERT INTO order_items (order_id, product_articul, product_name, quantity, price_at_order, total)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ITEM_COLUMNS}
            "#
        );
        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let item_row = sqlx::query(&item_sql)
                .bind(order_id)
                .bind(&item.product_articul)
                .bind(&item.product_name)
                .bind(item.quantity)
                .bind(item.price_at_order)
                .bind(item.total())
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?;
            items.push(item_from_row(&item_row)?);
        }

        let created = order_from_row(&row, items)?;
        tx.commit().await.map_err(db_error)?;
        Ok(created)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, OrderStoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let Some(row) = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?
        else {
            return Ok(None);
        };

        let mut orders = orders_with_items(&mut *conn, vec![row]).await?;
        Ok(orders.pop())
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: &StatusTransition,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderStoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or(OrderStoreError::NotFound(id))?;

        let mut order = orders_with_items(&mut *tx, vec![row])
            .await?
            .pop()
            .ok_or(OrderStoreError::NotFound(id))?;
        transition.apply(&mut order, now)?;

        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                transaction_id = $3,
                tracking_number = $4,
                paid_at = $5,
                shipped_at = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(order.status.as_str())
        .bind(&order.transaction_id)
        .bind(&order.tracking_number)
        .bind(order.paid_at)
        .bind(order.shipped_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(order)
    }

    async fn mark_invoice_exported(&self, id: Uuid) -> Result<bool, OrderStoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET invoice_exported_to_1c = TRUE, updated_at = NOW()
            WHERE id = $1 AND NOT invoice_exported_to_1c
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?
        .rows_affected();
        if updated > 0 {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        if exists { Ok(false) } else { Err(OrderStoreError::NotFound(id)) }
    }

    async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: u32,
        page_size: u32,
    ) -> Result<OrderPage, OrderStoreError> {
        const FILTER: &str = "($1::text IS NULL OR status = $1) \
             AND ($2::text IS NULL OR channel = $2) \
             AND ($3::text IS NULL OR customer_phone = $3)";
        let status = filter.status.as_ref().map(OrderStatus::as_str);
        let channel = filter.channel.as_ref().map(Channel::as_str);
        let phone = filter.customer_phone.as_deref();

        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM orders WHERE {FILTER}"))
            .bind(status)
            .bind(channel)
            .bind(phone)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_error)?;

        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {FILTER} ORDER BY created_at DESC LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(channel)
            .bind(phone)
            .bind(i64::from(page_size))
            .bind(i64::from(page.saturating_sub(1)) * i64::from(page_size))
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error)?;

        let orders = orders_with_items(&mut *conn, rows).await?;
        Ok(OrderPage::new(orders, total, page, page_size))
    }

    async fn orders_by_phone(&self, phone: &str, owner: Option<i64>) -> Result<Vec<Order>, OrderStoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE customer_phone = $1 AND ($2::bigint IS NULL OR channel <> 'telegram' OR telegram_user_id = $2) \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(phone)
            .bind(owner)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error)?;

        orders_with_items(&mut *conn, rows).await
    }

    async fn order_items(&self, id: Uuid) -> Result<Vec<OrderItem>, OrderStoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
            .bind(id)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_error)?;
        if !exists {
            return Err(OrderStoreError::NotFound(id));
        }

        let mut items = load_items(&mut *conn, &[id]).await?;
        Ok(items.remove(&id).unwrap_or_default())
    }

    /// Uses the server-side function so stored and queried phones agree;
    /// falls back to the local rules when the function is missing.
    async fn normalize_phone(&self, raw: &str) -> Result<Option<String>, OrderStoreError> {
        match sqlx::query_scalar::<_, Option<String>>("SELECT normalize_phone($1)")
            .bind(raw)
            .fetch_one(&self.pool)
            .await
        {
            Ok(normalized) => Ok(normalized),
            Err(err) => {
                warn!(error = %err, "normalize_phone() unavailable, using local rules");
                Ok(normalize_phone(raw))
            }
        }
    }
}
