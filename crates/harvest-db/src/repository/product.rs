//! # Product Repository
//!
//! Database operations for products.
//!
//! ## Key Operations
//! - CRUD with soft delete (`is_active = 0`)
//! - Stock totals derived from batches
//! - Low stock flagging
//!
//! ## Stock Totals
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Where Stock Lives                                    │
//! │                                                                         │
//! │  products                      product_batches                         │
//! │  ┌──────────────────┐          ┌──────────────────────────────┐        │
//! │  │ HONEY-500        │─────────►│ B-20240301  qty 4  exp 05-01 │        │
//! │  │ threshold 5      │          │ B-20240315  qty 12 exp 06-01 │        │
//! │  └──────────────────┘          └──────────────────────────────┘        │
//! │                                                                         │
//! │  total_stock = SUM(batch.quantity) = 16   → not low (16 > 5)           │
//! │                                                                         │
//! │  There is no stock column on products; it cannot drift from batches.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::SqlitePool;
use tracing::{debug, info};

use super::{generate_id, now, BATCH_COLUMNS, PRODUCT_COLUMNS};
use crate::error::{DbError, DbResult};
use harvest_core::inventory::is_low_stock;
use harvest_core::validation::validate_search_query;
use harvest_core::{
    NewProduct, Product, ProductBatch, ProductDetail, ProductUpdate, ProductWithStock,
};

/// `SELECT` for products with their summed batch stock.
fn with_stock_sql(filter: &str) -> String {
    let columns = PRODUCT_COLUMNS
        .split(", ")
        .map(|c| format!("p.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {columns},
                COALESCE(
                    (SELECT SUM(b.quantity) FROM product_batches b WHERE b.product_id = p.id), 0
                ) AS total_stock
         FROM products p
         {filter}"
    )
}

fn flag_low_stock(mut rows: Vec<ProductWithStock>) -> Vec<ProductWithStock> {
    for row in &mut rows {
        row.is_low_stock = is_low_stock(row.total_stock, row.product.low_stock_threshold);
    }
    rows
}

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
///
/// let honey = repo.create(&new_product).await?;
/// let all = repo.list(false).await?;
/// let detail = repo.get_detail(&honey.product.id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Creates a product. New products have no stock until a batch arrives.
    pub async fn create(&self, input: &NewProduct) -> DbResult<ProductWithStock> {
        input.validate()?;

        let id = generate_id();
        let now = now();
        let sku = input.sku.trim().to_uppercase();

        sqlx::query(
            "INSERT INTO products
                (id, sku, name, description, category, unit_price_cents, cost_price_cents,
                 low_stock_threshold, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&id)
        .bind(&sku)
        .bind(input.name.trim())
        .bind(&input.description)
        .bind(&input.category)
        .bind(input.unit_price_cents)
        .bind(input.cost_price_cents)
        .bind(input.low_stock_threshold)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("sku", &sku),
            other => other,
        })?;

        info!(product_id = %id, sku = %sku, "Product created");
        self.get(&id).await
    }

    /// Gets a product with its stock total.
    pub async fn get(&self, id: &str) -> DbResult<ProductWithStock> {
        let sql = with_stock_sql("WHERE p.id = ?");
        let row = sqlx::query_as::<_, ProductWithStock>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))?;

        Ok(flag_low_stock(vec![row]).remove(0))
    }

    /// Gets a product by SKU (case-insensitive).
    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = ? COLLATE NOCASE");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(sku.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    /// Product with its batches, earliest expiry first.
    pub async fn get_detail(&self, id: &str) -> DbResult<ProductDetail> {
        let product = self.get(id).await?;

        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM product_batches
             WHERE product_id = ?
             ORDER BY expiry_date IS NULL, expiry_date, production_date IS NULL,
                      production_date, created_at, id"
        );
        let batches = sqlx::query_as::<_, ProductBatch>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        Ok(ProductDetail { product, batches })
    }

    /// Lists products sorted by name.
    pub async fn list(&self, include_inactive: bool) -> DbResult<Vec<ProductWithStock>> {
        let filter = if include_inactive {
            "ORDER BY p.name"
        } else {
            "WHERE p.is_active = 1 ORDER BY p.name"
        };
        let rows = sqlx::query_as::<_, ProductWithStock>(&with_stock_sql(filter))
            .fetch_all(&self.pool)
            .await?;

        debug!(count = rows.len(), "Listed products");
        Ok(flag_low_stock(rows))
    }

    /// Active products whose name or SKU contains `query`.
    pub async fn search(&self, query: &str, limit: i64) -> DbResult<Vec<ProductWithStock>> {
        let query = validate_search_query(query)?;
        if query.is_empty() {
            let mut all = self.list(false).await?;
            all.truncate(limit.max(0) as usize);
            return Ok(all);
        }

        let pattern = format!("%{query}%");
        let sql = with_stock_sql(
            "WHERE p.is_active = 1 AND (p.name LIKE ? OR p.sku LIKE ?) ORDER BY p.name LIMIT ?",
        );
        let rows = sqlx::query_as::<_, ProductWithStock>(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        debug!(query = %query, count = rows.len(), "Searched products");
        Ok(flag_low_stock(rows))
    }

    /// Active products at or below their low-stock threshold.
    pub async fn low_stock(&self) -> DbResult<Vec<ProductWithStock>> {
        let rows = self.list(false).await?;
        Ok(rows.into_iter().filter(|p| p.is_low_stock).collect())
    }

    /// Applies a partial update.
    pub async fn update(&self, id: &str, update: &ProductUpdate) -> DbResult<ProductWithStock> {
        update.validate()?;

        let current = self.get(id).await?.product;
        let sku = update
            .sku
            .as_deref()
            .map(|s| s.trim().to_uppercase())
            .unwrap_or(current.sku);

        sqlx::query(
            "UPDATE products SET
                sku = ?, name = ?, description = ?, category = ?, unit_price_cents = ?,
                cost_price_cents = ?, low_stock_threshold = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&sku)
        .bind(update.name.as_deref().map(str::trim).unwrap_or(&current.name))
        .bind(update.description.as_ref().or(current.description.as_ref()))
        .bind(update.category.as_ref().or(current.category.as_ref()))
        .bind(update.unit_price_cents.unwrap_or(current.unit_price_cents))
        .bind(update.cost_price_cents.unwrap_or(current.cost_price_cents))
        .bind(update.low_stock_threshold.unwrap_or(current.low_stock_threshold))
        .bind(update.is_active.unwrap_or(current.is_active))
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("sku", &sku),
            other => other,
        })?;

        info!(product_id = %id, "Product updated");
        self.get(id).await
    }

    /// Soft-deletes a product. Orders keep their snapshots and batches stay.
    pub async fn deactivate(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE products SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        info!(product_id = %id, "Product deactivated");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{batch, product, test_db};
    use harvest_core::{CoreError, ValidationError};

    #[tokio::test]
    async fn test_create_and_get() {
        let db = test_db().await;
        let created = product(&db, "honey-500", 8500).await;

        assert_eq!(created.product.sku, "HONEY-500");
        assert_eq!(created.total_stock, 0);
        assert!(created.is_low_stock);

        let by_sku = db.products().get_by_sku("Honey-500").await.unwrap().unwrap();
        assert_eq!(by_sku.id, created.product.id);
    }

    #[tokio::test]
    async fn test_duplicate_sku() {
        let db = test_db().await;
        product(&db, "JAM-250", 4500).await;

        let err = db
            .products()
            .create(&NewProduct {
                sku: "jam-250".into(),
                name: "Another jam".into(),
                description: None,
                category: None,
                unit_price_cents: 100,
                cost_price_cents: 0,
                low_stock_threshold: 5,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { ref field, .. } if field == "sku"));
    }

    #[tokio::test]
    async fn test_invalid_product_rejected() {
        let db = test_db().await;
        let err = db
            .products()
            .create(&NewProduct {
                sku: "X-1".into(),
                name: "".into(),
                description: None,
                category: None,
                unit_price_cents: 100,
                cost_price_cents: 0,
                low_stock_threshold: 5,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::Validation(ValidationError::Required { .. }))
        ));
    }

    #[tokio::test]
    async fn test_stock_totals_and_low_stock() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        let jam = product(&db, "JAM-250", 4500).await;

        batch(&db, &honey.product.id, 4, Some("2024-05-01")).await;
        batch(&db, &honey.product.id, 12, Some("2024-06-01")).await;
        batch(&db, &jam.product.id, 3, None).await;

        let honey = db.products().get(&honey.product.id).await.unwrap();
        assert_eq!(honey.total_stock, 16);
        assert!(!honey.is_low_stock);

        let low = db.products().low_stock().await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].product.sku, "JAM-250");

        let detail = db.products().get_detail(&honey.product.id).await.unwrap();
        assert_eq!(detail.batches.len(), 2);
        assert_eq!(detail.batches[0].quantity, 4);
    }

    #[tokio::test]
    async fn test_update_and_deactivate() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        let id = honey.product.id.clone();

        let updated = db
            .products()
            .update(
                &id,
                &ProductUpdate {
                    unit_price_cents: Some(9000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.product.unit_price_cents, 9000);
        assert_eq!(updated.product.name, honey.product.name);

        db.products().deactivate(&id).await.unwrap();
        assert!(db.products().list(false).await.unwrap().is_empty());
        assert_eq!(db.products().list(true).await.unwrap().len(), 1);

        let err = db.products().deactivate("missing").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_search() {
        let db = test_db().await;
        product(&db, "HONEY-500", 8500).await;
        product(&db, "JAM-250", 4500).await;

        let found = db.products().search("honey", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(db.products().search("", 10).await.unwrap().len(), 2);
    }
}
