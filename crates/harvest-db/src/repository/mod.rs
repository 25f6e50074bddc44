//! # Repository Module
//!
//! Database repository implementations for Harvest POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  HTTP handler                                                          │
//! │       │                                                                 │
//! │       │  db.orders().create_order(&new_order)                          │
//! │       ▼                                                                 │
//! │  OrderRepository                                                       │
//! │  ├── BEGIN IMMEDIATE (write lock up front)                             │
//! │  ├── load rows, ask harvest-core what to do                            │
//! │  ├── write rows through the helpers below (&mut SqliteConnection)      │
//! │  └── COMMIT (or drop → ROLLBACK)                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`product::ProductRepository`] - Product CRUD with stock totals
//! - [`batch::BatchRepository`] - Batches and the stock movement trail
//! - [`customer::CustomerRepository`] - Customers and purchase summaries
//! - [`event::MarketEventRepository`] - Market events and their days
//! - [`order::OrderRepository`] - Order, payment and refund workflows
//! - [`invoice::InvoiceRepository`] - Invoice generation and delivery state
//! - [`settings::SettingsRepository`] - Business profiles
//! - [`role::RoleRepository`] - User role assignments
//! - [`report::ReportRepository`] - Sales, low stock and expiry reports
//! - [`import::ImportRepository`] - CSV sales import
//!
//! Helpers in this module take `&mut SqliteConnection` so they run inside
//! the caller's transaction (`&mut *tx`).

pub mod batch;
pub mod customer;
pub mod event;
pub mod import;
pub mod invoice;
pub mod order;
pub mod product;
pub mod report;
pub mod role;
pub mod settings;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use harvest_core::inventory::{plan_reversal, Allocation, BatchStock};
use harvest_core::{MovementReason, MovementType, OrderStatus, Product, ProductBatch};

/// New UUID v4 primary key.
pub(crate) fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current timestamp, truncated to whole microseconds so it round-trips
/// through RFC 3339 text unchanged.
pub(crate) fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Opens a transaction that holds SQLite's write lock from the start.
///
/// A deferred transaction that reads and then writes cannot be upgraded
/// while another writer is active in WAL mode and fails with `SQLITE_BUSY`
/// without waiting. `BEGIN IMMEDIATE` queues on the busy timeout instead, so
/// workflows run one after the other and each sees the previous commit.
pub(crate) async fn begin_write(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

// =============================================================================
// Shared Loads
// =============================================================================

pub(crate) const PRODUCT_COLUMNS: &str = "id, sku, name, description, category, unit_price_cents, \
     cost_price_cents, low_stock_threshold, is_active, created_at, updated_at";

pub(crate) const BATCH_COLUMNS: &str = "id, product_id, batch_number, quantity, initial_quantity, \
     production_date, expiry_date, cost_price_cents, notes, created_at, updated_at";

/// Loads a product or fails with NotFound.
pub(crate) async fn fetch_product(
    conn: &mut SqliteConnection,
    product_id: &str,
) -> DbResult<Product> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?");
    sqlx::query_as::<_, Product>(&sql)
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Product", product_id))
}

/// Batches of a product that still hold stock, in FIFO order.
pub(crate) async fn fetch_stocked_batches(
    conn: &mut SqliteConnection,
    product_id: &str,
) -> DbResult<Vec<BatchStock>> {
    let sql = format!(
        "SELECT {BATCH_COLUMNS} FROM product_batches
         WHERE product_id = ? AND quantity > 0
         ORDER BY expiry_date IS NULL, expiry_date, production_date IS NULL,
                  production_date, created_at, id"
    );
    let batches = sqlx::query_as::<_, ProductBatch>(&sql)
        .bind(product_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(batches.iter().map(BatchStock::from).collect())
}

// =============================================================================
// Shared Writes
// =============================================================================

/// One stock movement row for the audit trail.
pub(crate) struct MovementEntry<'a> {
    pub product_id: &'a str,
    pub batch_id: Option<&'a str>,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub reason: MovementReason,
    pub reference_id: Option<&'a str>,
    pub notes: Option<&'a str>,
}

pub(crate) async fn record_movement(
    conn: &mut SqliteConnection,
    entry: MovementEntry<'_>,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO stock_movements
            (id, product_id, batch_id, movement_type, quantity, reason, reference_id, notes,
             created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(generate_id())
    .bind(entry.product_id)
    .bind(entry.batch_id)
    .bind(entry.movement_type)
    .bind(entry.quantity)
    .bind(entry.reason)
    .bind(entry.reference_id)
    .bind(entry.notes)
    .bind(now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn record_status_change(
    conn: &mut SqliteConnection,
    order_id: &str,
    from: Option<OrderStatus>,
    to: OrderStatus,
    note: Option<&str>,
    changed_by: Option<&str>,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO order_status_history
            (id, order_id, from_status, to_status, note, changed_by, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(generate_id())
    .bind(order_id)
    .bind(from)
    .bind(to)
    .bind(note)
    .bind(changed_by)
    .bind(now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Takes `allocation.quantity` units out of a batch.
///
/// The `quantity >= ?` guard makes a concurrent sale of the same units
/// fail instead of driving the batch negative.
pub(crate) async fn take_from_batch(
    conn: &mut SqliteConnection,
    allocation: &Allocation,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE product_batches SET quantity = quantity - ?, updated_at = ?
         WHERE id = ? AND quantity >= ?",
    )
    .bind(allocation.quantity)
    .bind(now())
    .bind(&allocation.batch_id)
    .bind(allocation.quantity)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::conflict(format!(
            "batch {} no longer holds {} units",
            allocation.batch_id, allocation.quantity
        )));
    }
    Ok(())
}

pub(crate) async fn return_to_batch(
    conn: &mut SqliteConnection,
    allocation: &Allocation,
) -> DbResult<()> {
    sqlx::query("UPDATE product_batches SET quantity = quantity + ?, updated_at = ? WHERE id = ?")
        .bind(allocation.quantity)
        .bind(now())
        .bind(&allocation.batch_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Puts every unit an order took back into the batch it came from.
///
/// Allocation rows are merged per product and batch first, so two lines
/// that drew from one batch restore it with a single `in` movement.
/// Returns the number of units restored.
pub(crate) async fn restore_order_allocations(
    conn: &mut SqliteConnection,
    order_id: &str,
    reason: MovementReason,
) -> DbResult<i64> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT oi.product_id, oib.batch_id, oib.quantity
         FROM order_item_batches oib
         JOIN order_items oi ON oi.id = oib.order_item_id
         WHERE oi.order_id = ?
         ORDER BY oi.created_at, oib.id",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut products: Vec<String> = Vec::new();
    let mut by_product: HashMap<String, Vec<Allocation>> = HashMap::new();
    for (product_id, batch_id, quantity) in rows {
        if !by_product.contains_key(&product_id) {
            products.push(product_id.clone());
        }
        by_product
            .entry(product_id)
            .or_default()
            .push(Allocation { batch_id, quantity });
    }

    let mut restored = 0;
    for product_id in &products {
        let allocations = by_product.get(product_id).map(Vec::as_slice).unwrap_or_default();
        for allocation in plan_reversal(allocations) {
            return_to_batch(conn, &allocation).await?;
            record_movement(
                conn,
                MovementEntry {
                    product_id,
                    batch_id: Some(&allocation.batch_id),
                    movement_type: MovementType::In,
                    quantity: allocation.quantity,
                    reason,
                    reference_id: Some(order_id),
                    notes: None,
                },
            )
            .await?;
            restored += allocation.quantity;
        }
    }
    Ok(restored)
}

// =============================================================================
// Test Support
// =============================================================================

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::NaiveDate;

    use crate::pool::{Database, DbConfig};
    use harvest_core::{NewBatch, NewProduct, ProductBatch, ProductWithStock};

    pub async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub async fn product(db: &Database, sku: &str, price_cents: i64) -> ProductWithStock {
        db.products()
            .create(&NewProduct {
                sku: sku.to_string(),
                name: format!("Product {sku}"),
                description: None,
                category: None,
                unit_price_cents: price_cents,
                cost_price_cents: price_cents / 2,
                low_stock_threshold: 5,
            })
            .await
            .unwrap()
    }

    pub async fn batch(
        db: &Database,
        product_id: &str,
        quantity: i64,
        expiry: Option<&str>,
    ) -> ProductBatch {
        db.batches()
            .create(&NewBatch {
                product_id: product_id.to_string(),
                batch_number: None,
                quantity,
                production_date: None,
                expiry_date: expiry.map(date),
                cost_price_cents: None,
                notes: None,
            })
            .await
            .unwrap()
    }
}
