//! # Report Repository
//!
//! Loads report rows and hands them to `harvest_core::report` for the math.
//!
//! ```text
//! orders (paid, partially_refunded, refunded; created in range)
//!   ├── order_items      → SoldLine   (revenue + quantity × cost snapshot)
//!   ├── refunds          → RefundFigure
//!   └── payments         → PaymentFigure (completed only)
//! event_days in range    → EventFee   (stall fee × days)
//!                    │
//!                    ▼
//!            report::summarize
//! ```

use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use harvest_core::inventory::expiring_within;
use harvest_core::report::{
    summarize, EventFee, ExpiringBatch, OrderFigure, PaymentFigure, RefundFigure, ReportInput,
    SalesSummary, SoldLine,
};
use harvest_core::validation::validate_date_range;
use harvest_core::ProductWithStock;

/// Orders that count as sales.
const REPORTED_ORDERS: &str = "SELECT id FROM orders
     WHERE status IN ('paid', 'partially_refunded', 'refunded')
       AND substr(created_at, 1, 10) BETWEEN ? AND ?";

#[derive(Debug, Clone)]
pub struct ReportRepository {
    pool: SqlitePool,
}

impl ReportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReportRepository { pool }
    }

    /// Sales, margin and event profit for orders created in `from..=to`.
    pub async fn sales_summary(&self, from: NaiveDate, to: NaiveDate) -> DbResult<SalesSummary> {
        validate_date_range(from, to)?;

        let orders = sqlx::query_as::<_, OrderFigure>(&format!(
            "SELECT id AS order_id, market_event_id, discount_cents, total_cents
             FROM orders WHERE id IN ({REPORTED_ORDERS})"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let lines = sqlx::query_as::<_, SoldLine>(&format!(
            "SELECT order_id, product_id, sku_snapshot AS sku, name_snapshot AS name, quantity,
                    line_total_cents AS revenue_cents, quantity * cost_price_cents AS cost_cents
             FROM order_items WHERE order_id IN ({REPORTED_ORDERS})"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let refunds = sqlx::query_as::<_, RefundFigure>(&format!(
            "SELECT order_id, amount_cents FROM refunds WHERE order_id IN ({REPORTED_ORDERS})"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let payments = sqlx::query_as::<_, PaymentFigure>(&format!(
            "SELECT method, amount_cents FROM payments
             WHERE status = 'completed' AND order_id IN ({REPORTED_ORDERS})"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let events = sqlx::query_as::<_, EventFee>(
            "SELECT e.id AS event_id, e.name, e.stall_fee_cents, COUNT(d.id) AS day_count
             FROM market_events e
             JOIN event_days d ON d.event_id = e.id
             WHERE d.event_date BETWEEN ? AND ?
             GROUP BY e.id, e.name, e.stall_fee_cents",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        debug!(%from, %to, orders = orders.len(), lines = lines.len(), "Loaded sales report rows");

        let input = ReportInput {
            orders,
            lines,
            refunds,
            payments,
            events,
        };
        Ok(summarize(from, to, &input))
    }

    /// Active products at or below their threshold, lowest stock first.
    pub async fn low_stock(&self) -> DbResult<Vec<ProductWithStock>> {
        let mut rows = super::product::ProductRepository::new(self.pool.clone()).low_stock().await?;
        rows.sort_by(|a, b| {
            a.total_stock
                .cmp(&b.total_stock)
                .then_with(|| a.product.sku.cmp(&b.product.sku))
        });
        Ok(rows)
    }

    /// Stocked batches expiring on or before `today + days`, soonest first.
    pub async fn expiring(&self, today: NaiveDate, days: i64) -> DbResult<Vec<ExpiringBatch>> {
        let rows = sqlx::query_as::<_, ExpiringBatch>(
            "SELECT b.id AS batch_id, b.batch_number, b.product_id, p.sku, p.name, b.quantity,
                    b.expiry_date
             FROM product_batches b
             JOIN products p ON p.id = b.product_id
             WHERE b.quantity > 0 AND b.expiry_date IS NOT NULL
             ORDER BY b.expiry_date, p.sku",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter(|b| expiring_within(Some(b.expiry_date), today, days))
            .map(|b| b.with_days_left(today))
            .collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::order::{PaymentRequest, RefundRequest};
    use crate::repository::test_support::{batch, date, product, test_db};
    use chrono::Utc;
    use harvest_core::recurrence::EventType;
    use harvest_core::{NewMarketEvent, NewOrder, NewOrderItem, PaymentMethod};

    #[tokio::test]
    async fn test_sales_summary_counts_paid_orders_only() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        batch(&db, &honey.product.id, 20, None).await;

        let today = Utc::now().date_naive();
        let event = db
            .events()
            .create(&NewMarketEvent {
                name: "Harvest Festival".into(),
                location: None,
                event_type: EventType::MultiDay,
                start_date: today,
                end_date: Some(today + chrono::Duration::days(1)),
                start_time: None,
                end_time: None,
                recurrence_pattern: None,
                recurrence_end_date: None,
                stall_fee_cents: 1000,
                notes: None,
            })
            .await
            .unwrap();

        let order = |qty| NewOrder {
            items: vec![NewOrderItem {
                product_id: honey.product.id.clone(),
                quantity: qty,
                unit_price_cents: None,
            }],
            market_event_id: Some(event.event.id.clone()),
            ..Default::default()
        };

        let paid = db.orders().create_order(&order(2), None).await.unwrap();
        db.orders()
            .pay_order(&paid.order.id, &PaymentRequest::new(PaymentMethod::Cash))
            .await
            .unwrap();
        db.orders()
            .refund_order(
                &paid.order.id,
                &RefundRequest {
                    amount_cents: 1000,
                    reason: None,
                    restock: false,
                    actor: None,
                },
            )
            .await
            .unwrap();
        // Pending orders are not sales.
        db.orders().create_order(&order(1), None).await.unwrap();

        let summary = db.reports().sales_summary(today, today).await.unwrap();

        assert_eq!(summary.order_count, 1);
        assert_eq!(summary.items_sold, 2);
        assert_eq!(summary.gross_revenue_cents, 17000);
        assert_eq!(summary.refunds_cents, 1000);
        assert_eq!(summary.net_revenue_cents, 16000);
        assert_eq!(summary.cost_of_goods_cents, 8500);
        assert_eq!(summary.gross_profit_cents, 7500);
        assert_eq!(summary.by_payment_method[0].method, PaymentMethod::Cash);

        let event_row = &summary.by_event[0];
        assert_eq!(event_row.order_count, 1);
        assert_eq!(event_row.stall_fee_cents, 1000);
        assert_eq!(event_row.net_after_fee_cents, 15000);

        let yesterday = today - chrono::Duration::days(1);
        assert!(db.reports().sales_summary(today, yesterday).await.is_err());
    }

    #[tokio::test]
    async fn test_low_stock_and_expiring() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        let jam = product(&db, "JAM-250", 4500).await;
        batch(&db, &honey.product.id, 2, Some("2024-03-05")).await;
        batch(&db, &jam.product.id, 30, Some("2024-06-01")).await;

        let low = db.reports().low_stock().await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].product.sku, "HONEY-500");

        let expiring = db.reports().expiring(date("2024-03-01"), 14).await.unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].sku, "HONEY-500");
        assert_eq!(expiring[0].days_left, 4);
    }
}
