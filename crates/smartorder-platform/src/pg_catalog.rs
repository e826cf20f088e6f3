use async_trait::async_trait;
use smartorder_core::{CatalogError, CatalogProduct, CatalogSource};
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct PgCatalogSource {
    pool: PgPool,
}

impl PgCatalogSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(err: sqlx::Error) -> CatalogError {
    CatalogError::Unavailable(err.to_string())
}

#[async_trait]
impl CatalogSource for PgCatalogSource {
    async fn load_products(&self) -> Result<Vec<CatalogProduct>, CatalogError> {
        let rows = sqlx::query("SELECT articul, name, price, stock FROM products ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        rows.iter()
            .map(|row| {
                Ok(CatalogProduct {
                    articul: row.try_get("articul").map_err(unavailable)?,
                    name: row.try_get("name").map_err(unavailable)?,
                    price: row.try_get("price").map_err(unavailable)?,
                    stock: row.try_get("stock").map_err(unavailable)?,
                })
            })
            .collect()
    }
}
