pub mod context;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod processor;

pub use context::AppContext;
pub use health::HealthState;
pub use metrics::{MetricsSnapshot, QueueMetrics};
pub use pool::{WorkerPool, WorkerSettings};
pub use processor::{HandleOutcome, MessageHandler, OrderProcessor};
