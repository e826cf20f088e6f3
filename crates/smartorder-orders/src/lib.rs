pub mod delivery;
pub mod service;

pub use delivery::{CityRateTable, RateBand};
pub use service::OrderService;
