pub mod config;
pub mod db;
pub mod pg_catalog;
pub mod pg_orders;
pub mod redis_queue;

pub use config::{QueueConfig, ServiceConfig};
pub use db::connect_database;
pub use pg_catalog::PgCatalogSource;
pub use pg_orders::PgOrderRepository;
pub use redis_queue::RedisQueue;
