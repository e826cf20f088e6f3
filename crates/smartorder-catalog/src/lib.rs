pub mod cache;
pub mod matcher;

pub use cache::{CATALOG_TTL, CatalogCache};
pub use matcher::{
    Availability, ProductMatch, check_availability, extract_articuls, find_by_articul, match_products,
    similarity,
};
