use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrderStoreError;
use crate::models::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Validated,
    InvoiceCreated,
    Paid,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::New,
        OrderStatus::Validated,
        OrderStatus::InvoiceCreated,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Validated => "validated",
            OrderStatus::InvoiceCreated => "invoice_created",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses reachable in one step.
    pub fn allowed_next(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::New => &[OrderStatus::Validated, OrderStatus::Cancelled],
            OrderStatus::Validated => &[OrderStatus::InvoiceCreated, OrderStatus::Cancelled],
            OrderStatus::InvoiceCreated => &[OrderStatus::Paid, OrderStatus::Cancelled],
            OrderStatus::Paid => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Cancelled],
            OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_next().contains(&next)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| OrderStoreError::InvalidOrder(format!("unknown order status '{value}'")))
    }
}

/// A requested status change. Only `Pay` carries a transaction id and only
/// `Ship` carries a tracking number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTransition {
    Validate,
    CreateInvoice,
    Pay {
        transaction_id: Option<String>,
        paid_at: Option<DateTime<Utc>>,
    },
    Ship {
        tracking_number: Option<String>,
        shipped_at: Option<DateTime<Utc>>,
    },
    Cancel,
}

impl StatusTransition {
    pub fn target(&self) -> OrderStatus {
        match self {
            StatusTransition::Validate => OrderStatus::Validated,
            StatusTransition::CreateInvoice => OrderStatus::InvoiceCreated,
            StatusTransition::Pay { .. } => OrderStatus::Paid,
            StatusTransition::Ship { .. } => OrderStatus::Shipped,
            StatusTransition::Cancel => OrderStatus::Cancelled,
        }
    }

    /// Plain transition into `status` with no payload. `New` is never a target.
    pub fn for_status(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::New => None,
            OrderStatus::Validated => Some(StatusTransition::Validate),
            OrderStatus::InvoiceCreated => Some(StatusTransition::CreateInvoice),
            OrderStatus::Paid => Some(StatusTransition::Pay {
                transaction_id: None,
                paid_at: None,
            }),
            OrderStatus::Shipped => Some(StatusTransition::Ship {
                tracking_number: None,
                shipped_at: None,
            }),
            OrderStatus::Cancelled => Some(StatusTransition::Cancel),
        }
    }

    /// Checks the transition table and applies side effects to `order`.
    /// Rejected transitions leave the order untouched.
    pub fn apply(&self, order: &mut Order, now: DateTime<Utc>) -> Result<(), OrderStoreError> {
        let target = self.target();
        if !order.status.can_transition_to(target) {
            return Err(OrderStoreError::InvalidTransition {
                from: order.status,
                to: target,
            });
        }

        match self {
            StatusTransition::Pay {
                transaction_id,
                paid_at,
            } => {
                if order.paid_at.is_none() {
                    order.paid_at = Some(paid_at.unwrap_or(now));
                }
                if order.transaction_id.is_none() {
                    order.transaction_id = transaction_id.clone();
                }
            }
            StatusTransition::Ship {
                tracking_number,
                shipped_at,
            } => {
                if order.shipped_at.is_none() {
                    order.shipped_at = Some(shipped_at.unwrap_or(now));
                }
                if order.tracking_number.is_none() {
                    order.tracking_number = tracking_number.clone();
                }
            }
            _ => {}
        }

        order.status = target;
        order.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::*;
    use crate::message::Channel;

    fn order_in(status: OrderStatus) -> Order {
        let created = Utc::now();
        Order {
            id: Uuid::new_v4(),
            order_number: "ORD-2026-0001".to_string(),
            status,
            channel: Channel::Telegram,
            customer_name: None,
            customer_phone: None,
            customer_address: None,
            customer_email: None,
            items: Vec::new(),
            delivery_cost: Decimal::ZERO,
            total_amount: Decimal::from(100),
            tracking_number: None,
            transaction_id: None,
            invoice_exported: false,
            telegram_user_id: None,
            created_at: created,
            updated_at: created,
            paid_at: None,
            shipped_at: None,
        }
    }

    #[test]
    fn transition_table_is_enforced_for_every_pair() {
        let legal = [
            (OrderStatus::New, OrderStatus::Validated),
            (OrderStatus::New, OrderStatus::Cancelled),
            (OrderStatus::Validated, OrderStatus::InvoiceCreated),
            (OrderStatus::Validated, OrderStatus::Cancelled),
            (OrderStatus::InvoiceCreated, OrderStatus::Paid),
            (OrderStatus::InvoiceCreated, OrderStatus::Cancelled),
            (OrderStatus::Paid, OrderStatus::Shipped),
            (OrderStatus::Paid, OrderStatus::Cancelled),
            (OrderStatus::Shipped, OrderStatus::Cancelled),
        ];

        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                let Some(transition) = StatusTransition::for_status(to) else {
                    continue;
                };
                let mut order = order_in(from);
                let result = transition.apply(&mut order, Utc::now());

                if legal.contains(&(from, to)) {
                    assert!(result.is_ok(), "{from} -> {to} should be legal");
                    assert_eq!(order.status, to);
                } else {
                    assert_eq!(result, Err(OrderStoreError::InvalidTransition { from, to }));
                    assert_eq!(order.status, from);
                }
            }
        }
    }

    #[test]
    fn pay_stamps_time_and_transaction_once() {
        let mut order = order_in(OrderStatus::InvoiceCreated);
        let now = Utc::now();
        StatusTransition::Pay {
            transaction_id: Some("TXN-1".to_string()),
            paid_at: None,
        }
        .apply(&mut order, now)
        .unwrap();

        assert_eq!(order.paid_at, Some(now));
        assert_eq!(order.transaction_id.as_deref(), Some("TXN-1"));
        assert!(order.tracking_number.is_none());
    }

    #[test]
    fn rejected_transition_does_not_touch_fields() {
        let mut order = order_in(OrderStatus::New);
        let before = order.clone();
        let err = StatusTransition::Ship {
            tracking_number: Some("TRACK-1".to_string()),
            shipped_at: None,
        }
        .apply(&mut order, Utc::now())
        .unwrap_err();

        assert_eq!(err.to_string(), "invalid status transition from new to shipped");
        assert_eq!(order, before);
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("invoice_created".parse::<OrderStatus>().unwrap(), OrderStatus::InvoiceCreated);
        assert!("archived".parse::<OrderStatus>().is_err());
    }
}
