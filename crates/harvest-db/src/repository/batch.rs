//! # Batch Repository
//!
//! Product batches and the stock movement audit trail.
//!
//! ## Movement Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Operation            batch.quantity        stock_movements            │
//! │  ───────────────────  ────────────────────  ─────────────────────────  │
//! │  create(qty 12)       12                    in  12  batch_created      │
//! │  adjust(to 10)        12 → 10               out  2  adjustment         │
//! │  adjust(to 15)        10 → 15               in   5  adjustment         │
//! │  remove               15 → row gone / 0     out 15  batch_removed      │
//! │  sale (orders)        −n                    out  n  sale               │
//! │  cancel / refund      +n                    in   n  cancellation/refund│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every change to a batch quantity and its movement row are written in the
//! same transaction.

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    begin_write, fetch_product, generate_id, now, record_movement, MovementEntry, BATCH_COLUMNS,
};
use crate::error::{DbError, DbResult};
use harvest_core::inventory::expiring_within;
use harvest_core::{
    BatchAdjustment, MovementReason, MovementType, NewBatch, ProductBatch, StockMovement,
};

/// Generates a batch number: `B-YYYYMMDD-XXXX`.
fn generate_batch_number() -> String {
    let token = Uuid::new_v4().simple().to_string()[..4].to_ascii_uppercase();
    format!("B-{}-{}", Utc::now().format("%Y%m%d"), token)
}

#[derive(Debug, Clone)]
pub struct BatchRepository {
    pool: SqlitePool,
}

impl BatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        BatchRepository { pool }
    }

    /// Receives a new batch.
    ///
    /// ## Errors
    /// - `Validation` for a negative quantity or bad dates
    /// - `NotFound` when the product doesn't exist
    /// - `UniqueViolation` when the batch number is taken for this product
    pub async fn create(&self, input: &NewBatch) -> DbResult<ProductBatch> {
        input.validate()?;

        let mut tx = begin_write(&self.pool).await?;
        let product = fetch_product(&mut tx, input.product_id.trim()).await?;

        let id = generate_id();
        let now = now();
        let batch_number = input
            .batch_number
            .as_deref()
            .map(|n| n.trim().to_string())
            .unwrap_or_else(generate_batch_number);

        sqlx::query(
            "INSERT INTO product_batches
                (id, product_id, batch_number, quantity, initial_quantity, production_date,
                 expiry_date, cost_price_cents, notes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&product.id)
        .bind(&batch_number)
        .bind(input.quantity)
        .bind(input.quantity)
        .bind(input.production_date)
        .bind(input.expiry_date)
        .bind(input.cost_price_cents)
        .bind(&input.notes)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("batch_number", &batch_number),
            other => other,
        })?;

        if input.quantity > 0 {
            record_movement(
                &mut tx,
                MovementEntry {
                    product_id: &product.id,
                    batch_id: Some(&id),
                    movement_type: MovementType::In,
                    quantity: input.quantity,
                    reason: MovementReason::BatchCreated,
                    reference_id: None,
                    notes: input.notes.as_deref(),
                },
            )
            .await?;
        }

        tx.commit().await?;

        info!(
            batch_id = %id,
            sku = %product.sku,
            quantity = input.quantity,
            "Batch received"
        );
        self.get(&id).await
    }

    pub async fn get(&self, id: &str) -> DbResult<ProductBatch> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM product_batches WHERE id = ?");
        sqlx::query_as::<_, ProductBatch>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Batch", id))
    }

    /// Lists batches in FIFO order, optionally for one product.
    pub async fn list(&self, product_id: Option<&str>) -> DbResult<Vec<ProductBatch>> {
        let order = "ORDER BY product_id, expiry_date IS NULL, expiry_date, \
                     production_date IS NULL, production_date, created_at, id";
        let batches = match product_id {
            Some(product_id) => {
                let sql = format!(
                    "SELECT {BATCH_COLUMNS} FROM product_batches WHERE product_id = ? {order}"
                );
                sqlx::query_as::<_, ProductBatch>(&sql)
                    .bind(product_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT {BATCH_COLUMNS} FROM product_batches {order}");
                sqlx::query_as::<_, ProductBatch>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        debug!(count = batches.len(), "Listed batches");
        Ok(batches)
    }

    /// Sets a batch to a counted quantity.
    ///
    /// The difference is written as an `adjustment` movement; a count that
    /// matches the stored quantity writes nothing but the optional expiry.
    pub async fn adjust(&self, id: &str, adjustment: &BatchAdjustment) -> DbResult<ProductBatch> {
        adjustment.validate()?;

        let mut tx = begin_write(&self.pool).await?;
        let sql = format!("SELECT {BATCH_COLUMNS} FROM product_batches WHERE id = ?");
        let batch = sqlx::query_as::<_, ProductBatch>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Batch", id))?;

        let delta = adjustment.quantity - batch.quantity;

        sqlx::query(
            "UPDATE product_batches SET quantity = ?, expiry_date = ?, notes = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(adjustment.quantity)
        .bind(adjustment.expiry_date.or(batch.expiry_date))
        .bind(adjustment.notes.as_ref().or(batch.notes.as_ref()))
        .bind(now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if delta != 0 {
            record_movement(
                &mut tx,
                MovementEntry {
                    product_id: &batch.product_id,
                    batch_id: Some(id),
                    movement_type: if delta > 0 { MovementType::In } else { MovementType::Out },
                    quantity: delta.abs(),
                    reason: MovementReason::Adjustment,
                    reference_id: None,
                    notes: adjustment.notes.as_deref(),
                },
            )
            .await?;
        }

        tx.commit().await?;

        info!(batch_id = %id, from = batch.quantity, to = adjustment.quantity, "Batch adjusted");
        self.get(id).await
    }

    /// Removes a batch from stock.
    ///
    /// Remaining units are written off with a `batch_removed` movement. A
    /// batch that orders drew from keeps its row at quantity 0 so those
    /// allocations still resolve; any other batch is deleted.
    pub async fn remove(&self, id: &str) -> DbResult<()> {
        let mut tx = begin_write(&self.pool).await?;
        let sql = format!("SELECT {BATCH_COLUMNS} FROM product_batches WHERE id = ?");
        let batch = sqlx::query_as::<_, ProductBatch>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Batch", id))?;

        if batch.quantity > 0 {
            record_movement(
                &mut tx,
                MovementEntry {
                    product_id: &batch.product_id,
                    batch_id: Some(id),
                    movement_type: MovementType::Out,
                    quantity: batch.quantity,
                    reason: MovementReason::BatchRemoved,
                    reference_id: None,
                    notes: None,
                },
            )
            .await?;
        }

        let allocated: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM order_item_batches WHERE batch_id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;

        if allocated > 0 {
            sqlx::query("UPDATE product_batches SET quantity = 0, updated_at = ? WHERE id = ?")
                .bind(now())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("DELETE FROM product_batches WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!(
            batch_id = %id,
            written_off = batch.quantity,
            retained = allocated > 0,
            "Batch removed"
        );
        Ok(())
    }

    /// Batches with stock that expire on or before `today + days`.
    pub async fn expiring(&self, today: NaiveDate, days: i64) -> DbResult<Vec<ProductBatch>> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM product_batches
             WHERE quantity > 0 AND expiry_date IS NOT NULL
             ORDER BY expiry_date, product_id"
        );
        let batches = sqlx::query_as::<_, ProductBatch>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(batches
            .into_iter()
            .filter(|b| expiring_within(b.expiry_date, today, days))
            .collect())
    }

    /// Stock movements of a product, newest first.
    pub async fn movements(&self, product_id: &str, limit: i64) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            "SELECT id, product_id, batch_id, movement_type, quantity, reason, reference_id, notes,
                    created_at
             FROM stock_movements
             WHERE product_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(product_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
