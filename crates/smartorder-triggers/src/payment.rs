use std::fmt;
use std::ops::RangeInclusive;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smartorder_core::{Order, OrderStatus, StatusTransition};
use smartorder_orders::OrderService;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TriggerError;
use crate::invoice::{InvoiceExporter, InvoicePayload};
use crate::tracking::TrackingGenerator;

static CVV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{3}$").expect("valid cvv pattern"));
static EXPIRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})/(\d{2})$").expect("valid expiry pattern"));

#[derive(Clone, Deserialize)]
pub struct CardDetails {
    pub number: String,
    pub cvv: String,
    /// `MM/YY`
    pub expiry: String,
    pub holder_name: String,
}

impl CardDetails {
    fn digits(&self) -> String {
        self.number.chars().filter(|ch| !matches!(ch, ' ' | '-')).collect()
    }

    pub fn last4(&self) -> String {
        let digits = self.digits();
        let skip = digits.chars().count().saturating_sub(4);
        digits.chars().skip(skip).collect()
    }
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &format_args!("**** {}", self.last4()))
            .field("cvv", &"***")
            .field("expiry", &self.expiry)
            .field("holder_name", &self.holder_name)
            .finish()
    }
}

/// Shape checks only; nothing is sent to a card network.
pub fn validate_card(card: &CardDetails, now: DateTime<Utc>) -> Result<(), TriggerError> {
    let mut problems = Vec::new();

    let digits = card.digits();
    if digits.len() != 16 || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        problems.push("card number must contain 16 digits".to_string());
    }
    if !CVV.is_match(card.cvv.trim()) {
        problems.push("CVV must contain 3 digits".to_string());
    }
    match EXPIRY.captures(card.expiry.trim()) {
        None => problems.push("expiry must be in MM/YY format".to_string()),
        Some(captures) => {
            let month: u32 = captures[1].parse().unwrap_or(0);
            let year = 2000 + captures[2].parse::<i32>().unwrap_or(0);
            if !(1..=12).contains(&month) {
                problems.push("expiry month must be between 01 and 12".to_string());
            } else if (year, month) < (now.year(), now.month()) {
                problems.push("card has expired".to_string());
            }
        }
    }
    if card.holder_name.trim().chars().count() < 2 {
        problems.push("card holder name must contain at least 2 characters".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(TriggerError::Validation(problems.join("; ")))
    }
}

/// `TXN-YYYYMMDD-HHMMSS-NNNNNN`
pub fn transaction_id(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("TXN-{}-{suffix:06}", now.format("%Y%m%d-%H%M%S"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentReceipt {
    pub order_id: Uuid,
    pub transaction_id: String,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
    pub card_last4: String,
    pub already_paid: bool,
    pub invoice_exported: bool,
    pub invoice_number: Option<String>,
    pub tracking_number: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
}

impl PaymentReceipt {
    fn from_order(order: &Order, card_last4: String, already_paid: bool) -> Option<Self> {
        Some(Self {
            order_id: order.id,
            transaction_id: order.transaction_id.clone()?,
            amount: order.total_amount,
            paid_at: order.paid_at.unwrap_or(order.updated_at),
            card_last4,
            already_paid,
            invoice_exported: order.invoice_exported,
            invoice_number: order
                .invoice_exported
                .then(|| InvoicePayload::invoice_number(&order.order_number)),
            tracking_number: order.tracking_number.clone(),
            shipped_at: order.shipped_at,
        })
    }
}

/// Simulated card capture. After the order is paid the invoice is exported
/// and, once exported, a tracking number is assigned. Those follow-ups are
/// best effort: their failures are logged and the payment stands.
pub struct PaymentProcessor {
    orders: Arc<OrderService>,
    exporter: Option<Arc<InvoiceExporter>>,
    tracking: Option<Arc<TrackingGenerator>>,
    latency: RangeInclusive<Duration>,
}

impl PaymentProcessor {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self {
            orders,
            exporter: None,
            tracking: None,
            latency: Duration::from_secs(1)..=Duration::from_secs(2),
        }
    }

    pub fn with_exporter(mut self, exporter: Arc<InvoiceExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_tracking(mut self, tracking: Arc<TrackingGenerator>) -> Self {
        self.tracking = Some(tracking);
        self
    }

    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.latency = min.min(max)..=min.max(max);
        self
    }

    fn simulated_latency(&self) -> Duration {
        rand::thread_rng().gen_range(self.latency.clone())
    }

    pub async fn capture(&self, order_id: Uuid, card: &CardDetails) -> Result<PaymentReceipt, TriggerError> {
        validate_card(card, Utc::now())?;
        let card_last4 = card.last4();

        let order = self.orders.get_order(order_id).await?;
        if order.transaction_id.is_some() && matches!(order.status, OrderStatus::Paid | OrderStatus::Shipped) {
            info!(%order_id, "order already paid");
            if let Some(receipt) = PaymentReceipt::from_order(&order, card_last4.clone(), true) {
                return Ok(receipt);
            }
        }
        if order.status != OrderStatus::InvoiceCreated {
            return Err(TriggerError::InvalidState {
                current: order.status,
                expected: OrderStatus::InvoiceCreated,
            });
        }

        info!(%order_id, card_last4 = %card_last4, amount = %order.total_amount, "capturing payment");
        tokio::time::sleep(self.simulated_latency()).await;

        let now = Utc::now();
        let paid = self
            .orders
            .update_status(
                order_id,
                StatusTransition::Pay {
                    transaction_id: Some(transaction_id(now)),
                    paid_at: Some(now),
                },
            )
            .await?;
        let mut receipt = PaymentReceipt::from_order(&paid, card_last4, false).ok_or(TriggerError::Processing)?;
        info!(%order_id, transaction_id = %receipt.transaction_id, "payment captured");

        let Some(exporter) = &self.exporter else {
            return Ok(receipt);
        };
        match exporter.export(order_id).await {
            Ok(outcome) => {
                receipt.invoice_exported = true;
                receipt.invoice_number = Some(outcome.invoice_number);
            }
            Err(err) => {
                warn!(%order_id, error = %err, "invoice export after payment failed");
                return Ok(receipt);
            }
        }

        if let Some(tracking) = &self.tracking {
            match tracking.generate(order_id).await {
                Ok(outcome) => {
                    receipt.tracking_number = Some(outcome.tracking_number);
                    receipt.shipped_at = outcome.shipped_at;
                }
                Err(err) => warn!(%order_id, error = %err, "tracking generation after payment failed"),
            }
        }
        Ok(receipt)
    }
}
