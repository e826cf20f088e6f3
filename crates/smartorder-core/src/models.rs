use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Channel;
use crate::status::OrderStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub articul: String,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
}

impl CatalogProduct {
    /// Articul comparison ignores surrounding whitespace and letter case.
    pub fn matches_articul(&self, articul: &str) -> bool {
        self.articul.trim().to_uppercase() == articul.trim().to_uppercase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedProduct {
    #[serde(default)]
    pub articul: String,
    #[serde(default)]
    pub name: String,
    pub quantity: i32,
    #[serde(default)]
    pub price_mentioned: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl CustomerDetails {
    /// Contact fields that are absent or blank, in canonical order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.name) {
            missing.push("name");
        }
        if is_blank(&self.phone) {
            missing.push("phone");
        }
        if is_blank(&self.address) {
            missing.push("address");
        }
        missing
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or_default().is_empty()
}

/// Structured order intent before catalog validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedOrderDraft {
    #[serde(default)]
    pub products: Vec<ParsedProduct>,
    #[serde(default)]
    pub customer: CustomerDetails,
    #[serde(default)]
    pub missing_data: Vec<String>,
    #[serde(default)]
    pub unfound_products: Vec<String>,
}

impl ParsedOrderDraft {
    /// Every product needs a positive quantity and at least one identifier.
    pub fn is_well_formed(&self) -> bool {
        self.products.iter().all(|product| {
            product.quantity >= 1
                && !(product.articul.trim().is_empty() && product.name.trim().is_empty())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftSource {
    LanguageModel,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedProduct {
    pub articul: String,
    pub name: String,
    pub quantity: i32,
    pub price_at_order: Decimal,
    pub stock: i32,
    pub available: bool,
    pub validated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Validated,
    NeedsClarification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub status: ResultStatus,
    pub products: Vec<ValidatedProduct>,
    pub customer: CustomerDetails,
    pub missing_data: Vec<String>,
    pub unfound_products: Vec<String>,
    pub clarification_questions: Vec<String>,
    pub source: DraftSource,
}

impl OrderResult {
    pub fn is_validated(&self) -> bool {
        self.status == ResultStatus::Validated
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_articul: String,
    pub product_name: String,
    pub quantity: i32,
    pub price_at_order: Decimal,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub channel: Channel,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    pub customer_email: Option<String>,
    pub items: Vec<OrderItem>,
    pub delivery_cost: Decimal,
    pub total_amount: Decimal,
    pub tracking_number: Option<String>,
    pub transaction_id: Option<String>,
    pub invoice_exported: bool,
    pub telegram_user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_articul: String,
    pub product_name: String,
    pub quantity: i32,
    pub price_at_order: Decimal,
}

impl NewOrderItem {
    pub fn total(&self) -> Decimal {
        Decimal::from(self.quantity) * self.price_at_order
    }
}

impl From<&ValidatedProduct> for NewOrderItem {
    fn from(product: &ValidatedProduct) -> Self {
        Self {
            product_articul: product.articul.clone(),
            product_name: product.name.clone(),
            quantity: product.quantity,
            price_at_order: product.price_at_order,
        }
    }
}

/// Order creation request handed to the order service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub channel: Channel,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    pub customer_email: Option<String>,
    pub telegram_user_id: Option<i64>,
    pub items: Vec<NewOrderItem>,
    /// `None` asks the delivery collaborator when an address is known.
    pub delivery_cost: Option<Decimal>,
}

/// A fully priced order ready for persistence. Repositories allocate the
/// order number and write header and items atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedOrder {
    pub channel: Channel,
    pub status: OrderStatus,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    pub customer_email: Option<String>,
    pub telegram_user_id: Option<i64>,
    pub items: Vec<NewOrderItem>,
    pub delivery_cost: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryQuote {
    pub cost: Decimal,
    pub city: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub channel: Option<Channel>,
    pub customer_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPage {
    pub items: Vec<Order>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub pages: u32,
}

impl OrderPage {
    pub fn new(items: Vec<Order>, total: i64, page: u32, page_size: u32) -> Self {
        let pages = if total > 0 && page_size > 0 {
            ((total as u64).div_ceil(page_size as u64)) as u32
        } else {
            0
        };
        Self {
            items,
            total,
            page,
            page_size,
            pages,
        }
    }
}
