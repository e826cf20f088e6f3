use std::sync::Arc;
use std::time::Duration;

use smartorder_core::{CatalogError, CatalogProduct, CatalogSource};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

pub const CATALOG_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
struct Snapshot {
    products: Arc<Vec<CatalogProduct>>,
    loaded_at: Instant,
}

/// Read-through catalog cache shared by all workers. Readers always see a
/// whole snapshot; refreshes replace it in one write.
pub struct CatalogCache {
    source: Arc<dyn CatalogSource>,
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
}

impl CatalogCache {
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self::with_ttl(source, CATALOG_TTL)
    }

    pub fn with_ttl(source: Arc<dyn CatalogSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshot: RwLock::new(None),
        }
    }

    /// Returns the cached catalog, reloading it when missing, expired or
    /// forced. A failed reload keeps serving the last good snapshot.
    pub async fn get_catalog(&self, force_refresh: bool) -> Result<Arc<Vec<CatalogProduct>>, CatalogError> {
        let cached = self.snapshot.read().await.clone();
        if let Some(snapshot) = &cached {
            if !force_refresh && snapshot.loaded_at.elapsed() <= self.ttl {
                return Ok(snapshot.products.clone());
            }
        }

        match self.load().await {
            Ok(products) => {
                let products = Arc::new(products);
                *self.snapshot.write().await = Some(Snapshot {
                    products: products.clone(),
                    loaded_at: Instant::now(),
                });
                info!(products = products.len(), "catalog reloaded");
                Ok(products)
            }
            Err(err) => match cached {
                Some(snapshot) => {
                    warn!(error = %err, "catalog reload failed, serving stale snapshot");
                    Ok(snapshot.products)
                }
                None => Err(err),
            },
        }
    }

    async fn load(&self) -> Result<Vec<CatalogProduct>, CatalogError> {
        let products = self.source.load_products().await?;
        if products.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(products)
    }
}
