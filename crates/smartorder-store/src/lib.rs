mod catalog;
mod orders;
mod queue;

pub use catalog::InMemoryCatalogSource;
pub use orders::InMemoryOrderRepository;
pub use queue::InMemoryQueue;
