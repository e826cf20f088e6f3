use std::sync::Arc;

use async_trait::async_trait;
use smartorder_core::{Channel, NewOrder, NewOrderItem, QueueMessage};
use smartorder_orders::OrderService;
use smartorder_parser::OrderParser;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    OrderCreated { order_id: Uuid, order_number: String },
    /// The customer has to answer these before an order can be placed.
    NeedsClarification { questions: Vec<String> },
    /// The message can never be processed; it is dropped without a retry.
    Rejected { reason: String },
}

/// Work done for one dequeued message. An `Err` makes the pool retry the
/// message and eventually dead-letter it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, channel: Channel, message: &QueueMessage) -> anyhow::Result<HandleOutcome>;
}

/// Parses the message and records an order when the draft validates.
pub struct OrderProcessor {
    parser: Arc<OrderParser>,
    orders: Arc<OrderService>,
}

impl OrderProcessor {
    pub fn new(parser: Arc<OrderParser>, orders: Arc<OrderService>) -> Self {
        Self { parser, orders }
    }
}

#[async_trait]
impl MessageHandler for OrderProcessor {
    async fn handle(&self, channel: Channel, message: &QueueMessage) -> anyhow::Result<HandleOutcome> {
        let result = match self.parser.parse(message).await {
            Ok(result) => result,
            Err(err) if err.is_malformed_input() => {
                return Ok(HandleOutcome::Rejected { reason: err.to_string() });
            }
            Err(err) => return Err(err.into()),
        };
        if !result.is_validated() {
            info!(
                %channel,
                questions = result.clarification_questions.len(),
                unfound = ?result.unfound_products,
                "order needs clarification"
            );
            return Ok(HandleOutcome::NeedsClarification {
                questions: result.clarification_questions,
            });
        }

        let draft = NewOrder {
            channel,
            customer_name: result.customer.name.clone(),
            customer_phone: result.customer.phone.clone(),
            customer_address: result.customer.address.clone(),
            customer_email: message.email.clone(),
            telegram_user_id: message.telegram_user_id,
            items: result.products.iter().map(NewOrderItem::from).collect(),
            delivery_cost: None,
        };
        let order = self.orders.create_order(draft).await?;

        Ok(HandleOutcome::OrderCreated {
            order_id: order.id,
            order_number: order.order_number,
        })
    }
}
