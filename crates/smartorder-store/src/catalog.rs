use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use smartorder_core::{CatalogError, CatalogProduct, CatalogSource};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryCatalogSource {
    products: RwLock<Vec<CatalogProduct>>,
    unavailable: AtomicBool,
    loads: AtomicUsize,
}

impl InMemoryCatalogSource {
    pub fn new(products: Vec<CatalogProduct>) -> Self {
        Self {
            products: RwLock::new(products),
            ..Self::default()
        }
    }

    pub async fn replace(&self, products: Vec<CatalogProduct>) {
        *self.products.write().await = products;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of load attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for InMemoryCatalogSource {
    async fn load_products(&self) -> Result<Vec<CatalogProduct>, CatalogError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("catalog source offline".to_string()));
        }

        let mut products = self.products.read().await.clone();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }
}
