use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use smartorder_core::{OrderStatus, StatusTransition};
use smartorder_orders::OrderService;
use tracing::info;
use uuid::Uuid;

use crate::error::TriggerError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingOutcome {
    pub order_id: Uuid,
    pub tracking_number: String,
    pub shipped_at: Option<DateTime<Utc>>,
    pub already_generated: bool,
}

/// `TRACK-YYYYMMDD-NNNNNN`
pub fn tracking_number(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("TRACK-{}-{suffix:06}", now.format("%Y%m%d"))
}

/// Assigns a tracking number to a paid order and ships it.
pub struct TrackingGenerator {
    orders: Arc<OrderService>,
}

impl TrackingGenerator {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }

    pub async fn generate(&self, order_id: Uuid) -> Result<TrackingOutcome, TriggerError> {
        let order = self.orders.get_order(order_id).await?;
        if let Some(existing) = order.tracking_number {
            info!(%order_id, tracking_number = %existing, "tracking number already assigned");
            return Ok(TrackingOutcome {
                order_id,
                tracking_number: existing,
                shipped_at: order.shipped_at,
                already_generated: true,
            });
        }
        if order.status != OrderStatus::Paid {
            return Err(TriggerError::InvalidState {
                current: order.status,
                expected: OrderStatus::Paid,
            });
        }

        let now = Utc::now();
        let number = tracking_number(now);
        let shipped = self
            .orders
            .update_status(
                order_id,
                StatusTransition::Ship {
                    tracking_number: Some(number.clone()),
                    shipped_at: Some(now),
                },
            )
            .await?;
        info!(%order_id, tracking_number = %number, "tracking number generated");

        Ok(TrackingOutcome {
            order_id,
            tracking_number: shipped.tracking_number.unwrap_or(number),
            shipped_at: shipped.shipped_at,
            already_generated: false,
        })
    }
}
