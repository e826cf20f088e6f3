use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use smartorder_core::{BreakerConfig, CircuitBreaker, CircuitError, Order, OrderStatus, RetryPolicy};
use smartorder_orders::OrderService;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{SubmitError, TriggerError};

const BODY_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceCustomer {
    pub name: String,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceLine {
    pub articul: String,
    pub name: String,
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

/// Document sent to the accounting system for a paid order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoicePayload {
    pub invoice_number: String,
    pub date: String,
    pub customer: InvoiceCustomer,
    pub items: Vec<InvoiceLine>,
    #[serde(with = "rust_decimal::serde::float")]
    pub delivery_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

impl InvoicePayload {
    pub fn invoice_number(order_number: &str) -> String {
        format!("INV-{}", order_number.strip_prefix("ORD-").unwrap_or(order_number))
    }

    pub fn from_order(order: &Order) -> Self {
        Self {
            invoice_number: Self::invoice_number(&order.order_number),
            date: order.created_at.format("%Y-%m-%d").to_string(),
            customer: InvoiceCustomer {
                name: order.customer_name.clone().unwrap_or_default(),
                phone: order.customer_phone.clone().unwrap_or_default(),
                address: order.customer_address.clone().unwrap_or_default(),
            },
            items: order
                .items
                .iter()
                .map(|item| InvoiceLine {
                    articul: item.product_articul.clone(),
                    name: item.product_name.clone(),
                    quantity: item.quantity,
                    price: item.price_at_order,
                    total: item.total,
                })
                .collect(),
            delivery_cost: order.delivery_cost,
            total: order.total_amount,
        }
    }
}

/// Receives invoices. One call is one attempt; retries happen above.
#[async_trait]
pub trait InvoiceSink: Send + Sync {
    async fn submit(&self, invoice: &InvoicePayload) -> Result<Value, SubmitError>;
}

#[derive(Debug, Clone)]
pub struct InvoiceEndpointConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub invoices_endpoint: String,
    pub timeout: Duration,
}

impl Default for InvoiceEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            invoices_endpoint: "/hs/invoices".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the 1C invoicing service.
pub struct OneCInvoiceClient {
    http: reqwest::Client,
    config: InvoiceEndpointConfig,
}

impl OneCInvoiceClient {
    pub fn new(config: InvoiceEndpointConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), self.config.invoices_endpoint)
    }
}

#[async_trait]
impl InvoiceSink for OneCInvoiceClient {
    async fn submit(&self, invoice: &InvoicePayload) -> Result<Value, SubmitError> {
        let url = self.endpoint();
        debug!(%url, invoice_number = %invoice.invoice_number, "submitting invoice");

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(invoice)
            .send()
            .await
            .map_err(|err| SubmitError::Transient(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| SubmitError::Transient(err.to_string()))?;

        classify_response(status, &body)
    }
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

fn error_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Maps an HTTP status and body to the submission outcome. A 2xx answer
/// still fails when the body is not JSON or reports an error.
pub fn classify_response(status: u16, body: &str) -> Result<Value, SubmitError> {
    match status {
        200..=299 => {
            let value: Value = serde_json::from_str(body)
                .map_err(|_| SubmitError::Rejected(format!("non-JSON response: {}", preview(body))))?;
            if let Some(err) = value.get("error") {
                return Err(SubmitError::Rejected(error_text(err)));
            }
            if value.get("success").and_then(Value::as_bool) == Some(false) {
                let message = value
                    .get("message")
                    .or_else(|| value.get("error"))
                    .map(error_text)
                    .unwrap_or_else(|| "unknown error".to_string());
                return Err(SubmitError::Rejected(message));
            }
            Ok(value)
        }
        500..=599 => Err(SubmitError::Transient(format!("HTTP {status}: {}", preview(body)))),
        _ => Err(SubmitError::Permanent {
            status,
            message: preview(body),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportOutcome {
    pub order_id: Uuid,
    pub invoice_number: String,
    pub already_exported: bool,
    pub response: Option<Value>,
}

/// Exports paid orders at most once, tracked by the order's export flag.
pub struct InvoiceExporter {
    orders: Arc<OrderService>,
    sink: Arc<dyn InvoiceSink>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl InvoiceExporter {
    pub fn new(orders: Arc<OrderService>, sink: Arc<dyn InvoiceSink>) -> Self {
        Self {
            orders,
            sink,
            retry: RetryPolicy::invoice_export(),
            breaker: Arc::new(CircuitBreaker::new("invoicing", BreakerConfig::invoicing())),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub async fn export(&self, order_id: Uuid) -> Result<ExportOutcome, TriggerError> {
        let order = self.orders.get_order(order_id).await?;
        let invoice_number = InvoicePayload::invoice_number(&order.order_number);

        if order.invoice_exported {
            info!(%order_id, %invoice_number, "invoice already exported");
            return Ok(ExportOutcome {
                order_id,
                invoice_number,
                already_exported: true,
                response: None,
            });
        }
        if order.status != OrderStatus::Paid {
            return Err(TriggerError::InvalidState {
                current: order.status,
                expected: OrderStatus::Paid,
            });
        }

        let payload = InvoicePayload::from_order(&order);
        let response = self
            .breaker
            .call(|| self.retry.run(|_| self.sink.submit(&payload), SubmitError::is_retryable))
            .await
            .map_err(|err| match err {
                CircuitError::Open { retry_in, .. } => SubmitError::CircuitOpen { retry_in },
                CircuitError::Failed(err) => err,
            })
            .map_err(|err| {
                error!(%order_id, %invoice_number, error = %err, "invoice export failed");
                err
            })?;

        if !self.orders.mark_invoice_exported(order_id).await? {
            warn!(%order_id, "export flag was already set by a concurrent export");
        }
        info!(%order_id, %invoice_number, "invoice exported");

        Ok(ExportOutcome {
            order_id,
            invoice_number,
            already_exported: false,
            response: Some(response),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::time::Instant;

    use super::*;
    use crate::testing::{ScriptedSink, order_in, sample_order, service};

    #[test]
    fn payload_uses_invoice_numbering_and_numbers() {
        let mut order = sample_order();
        order.order_number = "ORD-2025-0042".to_string();

        let payload = InvoicePayload::from_order(&order);
        let body = serde_json::to_value(&payload).unwrap();

        assert_eq!(payload.invoice_number, "INV-2025-0042");
        assert_eq!(body["customer"]["address"], "");
        assert_eq!(body["items"][0]["price"], 120_000.0);
        assert_eq!(body["total"], 240_500.0);
        assert_eq!(body["date"], order.created_at.format("%Y-%m-%d").to_string());
    }

    #[test]
    fn responses_are_classified() {
        assert_eq!(classify_response(200, r#"{"success":true,"id":7}"#).unwrap()["id"], 7);
        assert!(matches!(classify_response(200, r#"{"error":"locked"}"#), Err(SubmitError::Rejected(msg)) if msg == "locked"));
        assert!(matches!(
            classify_response(200, r#"{"success":false,"message":"нет контрагента"}"#),
            Err(SubmitError::Rejected(msg)) if msg == "нет контрагента"
        ));
        assert!(matches!(classify_response(200, "<html>"), Err(SubmitError::Rejected(_))));
        assert!(matches!(classify_response(503, ""), Err(SubmitError::Transient(_))));
        assert!(matches!(classify_response(404, "not found"), Err(SubmitError::Permanent { status: 404, .. })));
        assert!(matches!(classify_response(401, ""), Err(SubmitError::Permanent { status: 401, .. })));
    }

    #[tokio::test]
    async fn second_export_is_not_submitted() {
        let orders = service();
        let order = order_in(&orders, OrderStatus::Paid).await;
        let sink = ScriptedSink::new(Vec::new());
        let exporter = InvoiceExporter::new(orders.clone(), sink.clone());

        let first = exporter.export(order.id).await.unwrap();
        let second = exporter.export(order.id).await.unwrap();

        assert!(!first.already_exported);
        assert!(second.already_exported);
        assert_eq!(second.invoice_number, first.invoice_number);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert!(orders.get_order(order.id).await.unwrap().invoice_exported);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let orders = service();
        let order = order_in(&orders, OrderStatus::Paid).await;
        let sink = ScriptedSink::new(vec![
            Err(SubmitError::Transient("HTTP 502".to_string())),
            Err(SubmitError::Rejected("locked".to_string())),
        ]);
        let exporter = InvoiceExporter::new(orders, sink.clone());
        let started = Instant::now();

        let outcome = exporter.export(order.id).await.unwrap();

        assert!(!outcome.already_exported);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_stops_immediately() {
        let orders = service();
        let order = order_in(&orders, OrderStatus::Paid).await;
        let sink = ScriptedSink::new(vec![Err(SubmitError::Permanent {
            status: 401,
            message: "unauthorized".to_string(),
        })]);
        let exporter = InvoiceExporter::new(orders.clone(), sink.clone());

        let err = exporter.export(order.id).await.unwrap_err();

        assert!(matches!(err, TriggerError::Export(SubmitError::Permanent { status: 401, .. })));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert!(!orders.get_order(order.id).await.unwrap().invoice_exported);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_endpoint_opens_the_circuit() {
        let orders = service();
        let first = order_in(&orders, OrderStatus::Paid).await;
        let second = order_in(&orders, OrderStatus::Paid).await;
        let sink = ScriptedSink::new(vec![Err(SubmitError::Permanent {
            status: 404,
            message: "no such endpoint".to_string(),
        })]);
        let breaker = Arc::new(CircuitBreaker::new(
            "invoicing",
            BreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(120),
            },
        ));
        let exporter = InvoiceExporter::new(orders.clone(), sink.clone()).with_breaker(breaker);

        assert!(exporter.export(first.id).await.is_err());
        let err = exporter.export(second.id).await.unwrap_err();

        assert!(matches!(
            err,
            TriggerError::Export(SubmitError::CircuitOpen { retry_in }) if retry_in == Duration::from_secs(120)
        ));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(120)).await;
        let outcome = exporter.export(second.id).await.unwrap();

        assert!(!outcome.already_exported);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert!(orders.get_order(second.id).await.unwrap().invoice_exported);
    }

    #[tokio::test]
    async fn unpaid_order_is_refused() {
        let orders = service();
        let order = order_in(&orders, OrderStatus::InvoiceCreated).await;
        let sink = ScriptedSink::new(Vec::new());

        let err = InvoiceExporter::new(orders, sink.clone()).export(order.id).await.unwrap_err();

        assert!(matches!(
            err,
            TriggerError::InvalidState {
                current: OrderStatus::InvoiceCreated,
                expected: OrderStatus::Paid
            }
        ));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let id = Uuid::new_v4();
        let err = InvoiceExporter::new(service(), ScriptedSink::new(Vec::new()))
            .export(id)
            .await
            .unwrap_err();

        assert!(matches!(err, TriggerError::NotFound(missing) if missing == id));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let client = OneCInvoiceClient::new(InvoiceEndpointConfig {
            base_url: "http://1c.local/base/".to_string(),
            ..InvoiceEndpointConfig::default()
        })
        .unwrap();

        assert_eq!(client.endpoint(), "http://1c.local/base/hs/invoices");
    }
}
