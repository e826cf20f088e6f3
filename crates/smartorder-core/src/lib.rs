pub mod breaker;
pub mod errors;
pub mod message;
pub mod models;
pub mod phone;
pub mod retry;
pub mod status;
pub mod storage;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitError, CircuitState};
pub use errors::{CatalogError, OrderStoreError};
pub use message::{Channel, DeadLetterEntry, QueueMessage};
pub use models::{
    CatalogProduct, CustomerDetails, DeliveryQuote, DraftSource, NewOrder, NewOrderItem, Order,
    OrderFilter, OrderItem, OrderPage, OrderResult, ParsedOrderDraft, ParsedProduct,
    PreparedOrder, ResultStatus, ValidatedProduct,
};
pub use phone::normalize_phone;
pub use retry::RetryPolicy;
pub use status::{OrderStatus, StatusTransition};
pub use storage::{
    CatalogSource, DeliveryQuoter, MessageQueue, OrderRepository, ProcessingGuard,
};
