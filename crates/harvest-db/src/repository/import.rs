//! # Import Repository
//!
//! Vendor CSV sales exports become paid orders.
//!
//! ## Commit Flow
//! ```text
//! CSV ──► parse ──► group by receipt ──► match products
//!                                             │
//!          unmatched lines and !skip_unmatched ──► 400, nothing written
//!                                             │
//! BEGIN                                       ▼
//!   for each receipt not imported before:
//!     INSERT order (source import, status paid, created_at = sale time)
//!     INSERT items; take stock FIFO, as much as batches hold
//!     INSERT completed payment, history (→ paid)
//! COMMIT
//! ```
//!
//! Imported sales already happened, so missing stock never blocks them;
//! the shortfall is reported per product instead.

use std::collections::{BTreeMap, HashMap, HashSet};

use sqlx::SqlitePool;
use tracing::{info, warn};

use super::order::{apply_allocations, insert_item, insert_order, insert_payment};
use super::settings::default_vat_rate;
use super::{begin_write, fetch_stocked_batches, generate_id, record_status_change};
use crate::error::{DbError, DbResult};
use harvest_core::import::{
    build_preview, group_into_orders, parse_sales_csv, ImportPreview, ImportResult, ProductMatcher,
    StockImpact,
};
use harvest_core::inventory::{allocated_unit_cost, plan_best_effort, BatchStock};
use harvest_core::order::generate_order_number;
use harvest_core::{
    Money, MovementReason, Order, OrderItem, OrderSource, OrderStatus, Payment, PaymentStatus,
    ProductWithStock, ValidationError,
};

#[derive(Debug, Clone)]
pub struct ImportRepository {
    pool: SqlitePool,
}

impl ImportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ImportRepository { pool }
    }

    async fn existing_references(&self) -> DbResult<HashSet<String>> {
        let references: Vec<String> = sqlx::query_scalar(
            "SELECT external_reference FROM orders WHERE external_reference IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(references.into_iter().collect())
    }

    async fn active_products(&self) -> DbResult<Vec<ProductWithStock>> {
        super::product::ProductRepository::new(self.pool.clone())
            .list(false)
            .await
    }

    /// Parses and matches an export without writing anything.
    pub async fn preview(
        &self,
        csv: &str,
        mappings: &HashMap<String, String>,
    ) -> DbResult<ImportPreview> {
        let parsed = parse_sales_csv(csv)?;
        let products = self.active_products().await?;
        let existing = self.existing_references().await?;

        let preview = build_preview(parsed, &products, mappings, &existing);
        info!(
            orders = preview.orders.len(),
            unmatched = preview.unmatched.len(),
            duplicates = preview.duplicate_orders,
            "Import previewed"
        );
        Ok(preview)
    }

    /// Creates a paid order per receipt not seen before.
    pub async fn commit(
        &self,
        csv: &str,
        mappings: &HashMap<String, String>,
        skip_unmatched: bool,
    ) -> DbResult<ImportResult> {
        let parsed = parse_sales_csv(csv)?;
        let products = self.active_products().await?;
        let existing = self.existing_references().await?;
        let matcher = ProductMatcher::new(&products, mappings);

        let mut result = ImportResult {
            errors: parsed.errors,
            ..Default::default()
        };
        let orders = group_into_orders(parsed.rows);

        if !skip_unmatched {
            let mut unmatched: Vec<String> = orders
                .iter()
                .filter(|o| !existing.contains(&o.external_reference))
                .flat_map(|o| o.rows.iter())
                .filter(|row| matcher.find(row).is_none())
                .map(|row| row.external_key())
                .collect();
            if !unmatched.is_empty() {
                unmatched.sort();
                unmatched.dedup();
                warn!(count = unmatched.len(), "Import rejected: unmatched products");
                return Err(ValidationError::InvalidFormat {
                    field: "csv".to_string(),
                    reason: format!("no product matches {}", unmatched.join(", ")),
                }
                .into());
            }
        }

        let mut tx = begin_write(&self.pool).await?;
        let vat_rate = default_vat_rate(&mut tx).await?;
        let mut stock: HashMap<String, Vec<BatchStock>> = HashMap::new();
        let mut shortfalls: BTreeMap<String, (i64, i64)> = BTreeMap::new();

        for import in orders {
            if existing.contains(&import.external_reference) {
                result.duplicates_skipped += 1;
                continue;
            }

            let mut lines = Vec::new();
            for row in &import.rows {
                match matcher.find(row) {
                    Some(found) => lines.push((row, found.product_id)),
                    None => result.lines_skipped_unmatched += 1,
                }
            }
            if lines.is_empty() {
                continue;
            }

            let at = import.occurred_at.and_utc();
            let subtotal: Money = lines
                .iter()
                .map(|(row, _)| Money::from_cents(row.line_total_cents))
                .sum();
            let order = Order {
                id: generate_id(),
                order_number: generate_order_number(at),
                customer_id: None,
                market_event_id: None,
                status: OrderStatus::Paid,
                subtotal_cents: subtotal.cents(),
                discount_cents: 0,
                tax_cents: subtotal.vat_inclusive_portion(vat_rate).cents(),
                total_cents: subtotal.cents(),
                notes: None,
                source: OrderSource::Import,
                external_reference: Some(import.external_reference.clone()),
                paid_at: Some(at),
                cancelled_at: None,
                created_at: at,
                updated_at: at,
            };
            insert_order(&mut tx, &order).await.map_err(|e| match e {
                DbError::UniqueViolation { .. } => {
                    DbError::duplicate("external_reference", import.external_reference.as_str())
                }
                other => other,
            })?;

            for (row, product_id) in lines {
                let Some(product) = products.iter().find(|p| p.product.id == product_id) else {
                    continue;
                };

                if !stock.contains_key(&product_id) {
                    let batches = fetch_stocked_batches(&mut tx, &product_id).await?;
                    stock.insert(product_id.clone(), batches);
                }
                let batches = stock.get_mut(&product_id).ok_or_else(|| {
                    DbError::Internal(format!("batch cache missing product {product_id}"))
                })?;

                let (allocations, shortfall) = plan_best_effort(batches, row.quantity);
                let unit_cost = allocated_unit_cost(&allocations, batches, product.product.cost());
                for allocation in &allocations {
                    let batch = batches.iter_mut().find(|b| b.batch_id == allocation.batch_id);
                    if let Some(batch) = batch {
                        batch.quantity -= allocation.quantity;
                    }
                }
                if shortfall > 0 {
                    let entry = shortfalls.entry(product_id.clone()).or_default();
                    entry.0 += row.quantity;
                    entry.1 += shortfall;
                }

                let item = OrderItem {
                    id: generate_id(),
                    order_id: order.id.clone(),
                    product_id: product_id.clone(),
                    sku_snapshot: product.product.sku.clone(),
                    name_snapshot: product.product.name.clone(),
                    quantity: row.quantity,
                    unit_price_cents: row.unit_price_cents,
                    cost_price_cents: unit_cost.cents(),
                    line_total_cents: row.line_total_cents,
                    created_at: at,
                };
                insert_item(&mut tx, &item).await?;
                apply_allocations(&mut tx, &order.id, &item, &allocations, MovementReason::Import)
                    .await?;
            }

            if order.total_cents > 0 {
                let payment = Payment {
                    id: generate_id(),
                    order_id: order.id.clone(),
                    method: import.payment_method,
                    status: PaymentStatus::Completed,
                    amount_cents: order.total_cents,
                    provider_reference: None,
                    checkout_url: None,
                    created_at: at,
                    completed_at: Some(at),
                };
                insert_payment(&mut tx, &payment).await?;
            }

            let imported = Some("imported");
            record_status_change(&mut tx, &order.id, None, OrderStatus::Paid, imported, None)
                .await?;

            result.orders_created += 1;
            result.order_ids.push(order.id);
        }

        tx.commit().await?;

        result.stock_shortfalls = shortfalls
            .into_iter()
            .filter_map(|(product_id, (requested, shortfall))| {
                let product = products.iter().find(|p| p.product.id == product_id)?;
                Some(StockImpact {
                    sku: product.product.sku.clone(),
                    name: product.product.name.clone(),
                    available: requested - shortfall,
                    product_id,
                    requested,
                    shortfall,
                })
            })
            .collect();

        info!(
            created = result.orders_created,
            duplicates = result.duplicates_skipped,
            skipped_lines = result.lines_skipped_unmatched,
            shortfalls = result.stock_shortfalls.len(),
            "Sales import committed"
        );
        Ok(result)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{batch, product, test_db};
    use harvest_core::{CoreError, OrderFilter};

    const EXPORT: &str = "\
Date,Time,Receipt No,SKU,Item,Qty,Price,Payment Type
2024-03-02,09:15,R-1001,HONEY-500,Raw Honey 500g,2,85.00,Cash
2024-03-02,09:15,R-1001,,Fig Jam,1,45.00,Cash
2024-03-02,10:40,R-1002,HONEY-500,Raw Honey 500g,4,85.00,Card
";

    #[tokio::test]
    async fn test_preview_flags_unmatched_and_shortfall() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        batch(&db, &honey.product.id, 5, None).await;

        let preview = db.imports().preview(EXPORT, &HashMap::new()).await.unwrap();

        assert_eq!(preview.orders.len(), 2);
        assert_eq!(preview.unmatched, vec!["Fig Jam".to_string()]);
        assert_eq!(preview.stock_impact[0].requested, 6);
        assert_eq!(preview.stock_impact[0].shortfall, 1);
        assert_eq!(preview.duplicate_orders, 0);
    }

    #[tokio::test]
    async fn test_commit_rejects_unmatched_unless_skipped() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        batch(&db, &honey.product.id, 10, None).await;

        let err = db.imports().commit(EXPORT, &HashMap::new(), false).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Validation(_))));
        assert!(db.orders().list(&OrderFilter::default()).await.unwrap().is_empty());

        let result = db.imports().commit(EXPORT, &HashMap::new(), true).await.unwrap();
        assert_eq!(result.orders_created, 2);
        assert_eq!(result.lines_skipped_unmatched, 1);
        assert!(result.stock_shortfalls.is_empty());

        let detail = db.orders().get_detail(&result.order_ids[0]).await.unwrap();
        assert_eq!(detail.order.status, OrderStatus::Paid);
        assert_eq!(detail.order.source, OrderSource::Import);
        assert_eq!(detail.order.external_reference.as_deref(), Some("R-1001"));
        assert_eq!(detail.order.total_cents, 17000);
        assert_eq!(detail.payments.len(), 1);
        assert_eq!(detail.ledger.total_paid_cents, 17000);

        let stock = db.products().get(&honey.product.id).await.unwrap();
        assert_eq!(stock.total_stock, 4);
    }

    #[tokio::test]
    async fn test_commit_is_idempotent_and_reports_shortfall() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        let jam = product(&db, "JAM-250", 4500).await;
        batch(&db, &honey.product.id, 5, None).await;

        let mappings = HashMap::from([("Fig Jam".to_string(), jam.product.id.clone())]);
        let result = db.imports().commit(EXPORT, &mappings, false).await.unwrap();

        assert_eq!(result.orders_created, 2);
        let shortfalls: HashMap<_, _> = result
            .stock_shortfalls
            .iter()
            .map(|s| (s.sku.as_str(), s.shortfall))
            .collect();
        assert_eq!(shortfalls.get("HONEY-500"), Some(&1));
        assert_eq!(shortfalls.get("JAM-250"), Some(&1));
        assert_eq!(db.products().get(&honey.product.id).await.unwrap().total_stock, 0);

        let again = db.imports().commit(EXPORT, &mappings, false).await.unwrap();
        assert_eq!(again.orders_created, 0);
        assert_eq!(again.duplicates_skipped, 2);

        let preview = db.imports().preview(EXPORT, &mappings).await.unwrap();
        assert_eq!(preview.duplicate_orders, 2);
    }

    #[tokio::test]
    async fn test_empty_csv_rejected() {
        let db = test_db().await;
        let err = db.imports().preview("   ", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, DbError::Import(_)));
    }
}
