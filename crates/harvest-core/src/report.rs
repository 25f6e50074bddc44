//! # Report Module
//!
//! Sales, margin and profit aggregation over rows loaded by harvest-db.
//!
//! ## Figures
//! ```text
//! gross revenue   = Σ order totals (after discount, VAT-inclusive)
//! net revenue     = gross revenue - refunds
//! cost of goods   = Σ quantity × cost snapshot
//! gross profit    = net revenue - cost of goods
//! margin (bps)    = gross profit × 10000 / net revenue   (0 when no revenue)
//! event net       = event revenue - stall fee × event days in range
//! ```
//!
//! Only paid, partially refunded and refunded orders are reported; pending
//! and cancelled orders never reach this module.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ts_rs::TS;

use crate::payment::PaymentMethod;

// =============================================================================
// Inputs
// =============================================================================

/// One reported order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderFigure {
    pub order_id: String,
    pub market_event_id: Option<String>,
    pub discount_cents: i64,
    pub total_cents: i64,
}

/// One sold line with its cost snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SoldLine {
    pub order_id: String,
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub revenue_cents: i64,
    pub cost_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct RefundFigure {
    pub order_id: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PaymentFigure {
    pub method: PaymentMethod,
    pub amount_cents: i64,
}

/// An event with the number of its days inside the report range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct EventFee {
    pub event_id: String,
    pub name: String,
    pub stall_fee_cents: i64,
    pub day_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ReportInput {
    pub orders: Vec<OrderFigure>,
    pub lines: Vec<SoldLine>,
    pub refunds: Vec<RefundFigure>,
    pub payments: Vec<PaymentFigure>,
    pub events: Vec<EventFee>,
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductSales {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub revenue_cents: i64,
    pub cost_cents: i64,
    pub profit_cents: i64,
    pub margin_bps: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EventSales {
    pub event_id: String,
    pub name: String,
    pub order_count: i64,
    pub revenue_cents: i64,
    pub stall_fee_cents: i64,
    pub net_after_fee_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentMethodTotal {
    pub method: PaymentMethod,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SalesSummary {
    #[ts(as = "String")]
    pub from: NaiveDate,
    #[ts(as = "String")]
    pub to: NaiveDate,
    pub order_count: i64,
    pub items_sold: i64,
    pub gross_revenue_cents: i64,
    pub discount_cents: i64,
    pub refunds_cents: i64,
    pub net_revenue_cents: i64,
    pub cost_of_goods_cents: i64,
    pub gross_profit_cents: i64,
    pub margin_bps: i64,
    pub average_order_cents: i64,
    pub by_product: Vec<ProductSales>,
    pub by_event: Vec<EventSales>,
    pub by_payment_method: Vec<PaymentMethodTotal>,
}

// =============================================================================
// Aggregation
// =============================================================================

/// Profit as basis points of revenue, rounded half away from zero.
///
/// ```rust
/// use harvest_core::report::margin_bps;
///
/// assert_eq!(margin_bps(2500, 10000), 2500);
/// assert_eq!(margin_bps(1, 3), 3333);
/// assert_eq!(margin_bps(500, 0), 0);
/// ```
pub fn margin_bps(profit_cents: i64, revenue_cents: i64) -> i64 {
    if revenue_cents <= 0 {
        return 0;
    }
    let scaled = profit_cents as i128 * 10_000;
    let revenue = revenue_cents as i128;
    let rounded = if scaled >= 0 {
        (scaled + revenue / 2) / revenue
    } else {
        (scaled - revenue / 2) / revenue
    };
    rounded as i64
}

/// Builds the sales summary for `from..=to`.
pub fn summarize(from: NaiveDate, to: NaiveDate, input: &ReportInput) -> SalesSummary {
    let order_count = input.orders.len() as i64;
    let gross: i64 = input.orders.iter().map(|o| o.total_cents).sum();
    let discount: i64 = input.orders.iter().map(|o| o.discount_cents).sum();
    let refunds: i64 = input.refunds.iter().map(|r| r.amount_cents).sum();
    let items_sold: i64 = input.lines.iter().map(|l| l.quantity).sum();
    let cost: i64 = input.lines.iter().map(|l| l.cost_cents).sum();
    let net = gross - refunds;
    let profit = net - cost;

    SalesSummary {
        from,
        to,
        order_count,
        items_sold,
        gross_revenue_cents: gross,
        discount_cents: discount,
        refunds_cents: refunds,
        net_revenue_cents: net,
        cost_of_goods_cents: cost,
        gross_profit_cents: profit,
        margin_bps: margin_bps(profit, net),
        average_order_cents: if order_count > 0 { gross / order_count } else { 0 },
        by_product: by_product(&input.lines),
        by_event: by_event(input),
        by_payment_method: by_payment_method(&input.payments),
    }
}

fn by_product(lines: &[SoldLine]) -> Vec<ProductSales> {
    let mut rows: HashMap<&str, ProductSales> = HashMap::new();
    for line in lines {
        let entry = rows.entry(line.product_id.as_str()).or_insert_with(|| ProductSales {
            product_id: line.product_id.clone(),
            sku: line.sku.clone(),
            name: line.name.clone(),
            quantity: 0,
            revenue_cents: 0,
            cost_cents: 0,
            profit_cents: 0,
            margin_bps: 0,
        });
        entry.quantity += line.quantity;
        entry.revenue_cents += line.revenue_cents;
        entry.cost_cents += line.cost_cents;
    }

    let mut products: Vec<ProductSales> = rows
        .into_values()
        .map(|mut p| {
            p.profit_cents = p.revenue_cents - p.cost_cents;
            p.margin_bps = margin_bps(p.profit_cents, p.revenue_cents);
            p
        })
        .collect();
    products.sort_by(|a, b| {
        b.revenue_cents
            .cmp(&a.revenue_cents)
            .then_with(|| a.sku.cmp(&b.sku))
    });
    products
}

fn by_event(input: &ReportInput) -> Vec<EventSales> {
    let refunds_by_order: HashMap<&str, i64> =
        input.refunds.iter().fold(HashMap::new(), |mut acc, r| {
            *acc.entry(r.order_id.as_str()).or_default() += r.amount_cents;
            acc
        });

    let mut events: Vec<EventSales> = input
        .events
        .iter()
        .map(|event| {
            let orders: Vec<&OrderFigure> = input
                .orders
                .iter()
                .filter(|o| o.market_event_id.as_deref() == Some(event.event_id.as_str()))
                .collect();
            let revenue: i64 = orders
                .iter()
                .map(|o| {
                    let refunded = refunds_by_order.get(o.order_id.as_str()).copied();
                    o.total_cents - refunded.unwrap_or(0)
                })
                .sum();
            let fee = event.stall_fee_cents * event.day_count.max(0);
            EventSales {
                event_id: event.event_id.clone(),
                name: event.name.clone(),
                order_count: orders.len() as i64,
                revenue_cents: revenue,
                stall_fee_cents: fee,
                net_after_fee_cents: revenue - fee,
            }
        })
        .collect();

    events.sort_by(|a, b| {
        b.revenue_cents
            .cmp(&a.revenue_cents)
            .then_with(|| a.name.cmp(&b.name))
    });
    events
}

fn by_payment_method(payments: &[PaymentFigure]) -> Vec<PaymentMethodTotal> {
    PaymentMethod::ALL
        .into_iter()
        .filter_map(|method| {
            let amount: i64 = payments
                .iter()
                .filter(|p| p.method == method)
                .map(|p| p.amount_cents)
                .sum();
            (amount != 0).then_some(PaymentMethodTotal {
                method,
                amount_cents: amount,
            })
        })
        .collect()
}

// =============================================================================
// Expiry
// =============================================================================

/// A stocked batch close to (or past) its expiry date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ExpiringBatch {
    pub batch_id: String,
    pub batch_number: String,
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    #[ts(as = "String")]
    pub expiry_date: NaiveDate,
    /// Negative once expired. Filled in by [`ExpiringBatch::with_days_left`].
    #[cfg_attr(feature = "sqlx", sqlx(default))]
    pub days_left: i64,
}

impl ExpiringBatch {
    pub fn with_days_left(mut self, today: NaiveDate) -> Self {
        self.days_left = (self.expiry_date - today).num_days();
        self
    }

    pub fn is_expired(&self) -> bool {
        self.days_left < 0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn line(order: &str, product: &str, qty: i64, revenue: i64, cost: i64) -> SoldLine {
        SoldLine {
            order_id: order.to_string(),
            product_id: product.to_string(),
            sku: product.to_uppercase(),
            name: product.to_string(),
            quantity: qty,
            revenue_cents: revenue,
            cost_cents: cost,
        }
    }

    fn sample() -> ReportInput {
        ReportInput {
            orders: vec![
                OrderFigure {
                    order_id: "o1".into(),
                    market_event_id: Some("e1".into()),
                    discount_cents: 0,
                    total_cents: 17000,
                },
                OrderFigure {
                    order_id: "o2".into(),
                    market_event_id: None,
                    discount_cents: 500,
                    total_cents: 4000,
                },
            ],
            lines: vec![
                line("o1", "honey", 2, 17000, 8000),
                line("o2", "jam", 1, 4500, 2000),
            ],
            refunds: vec![RefundFigure { order_id: "o1".into(), amount_cents: 1000 }],
            payments: vec![
                PaymentFigure { method: PaymentMethod::Cash, amount_cents: 17000 },
                PaymentFigure { method: PaymentMethod::Card, amount_cents: 4000 },
            ],
            events: vec![EventFee {
                event_id: "e1".into(),
                name: "Saturday Market".into(),
                stall_fee_cents: 2500,
                day_count: 2,
            }],
        }
    }

    #[test]
    fn test_summary_totals() {
        let summary = summarize(d("2024-03-01"), d("2024-03-31"), &sample());
        assert_eq!(summary.order_count, 2);
        assert_eq!(summary.items_sold, 3);
        assert_eq!(summary.gross_revenue_cents, 21000);
        assert_eq!(summary.discount_cents, 500);
        assert_eq!(summary.refunds_cents, 1000);
        assert_eq!(summary.net_revenue_cents, 20000);
        assert_eq!(summary.cost_of_goods_cents, 10000);
        assert_eq!(summary.gross_profit_cents, 10000);
        assert_eq!(summary.margin_bps, 5000);
        assert_eq!(summary.average_order_cents, 10500);
    }

    #[test]
    fn test_breakdowns() {
        let summary = summarize(d("2024-03-01"), d("2024-03-31"), &sample());

        assert_eq!(summary.by_product[0].product_id, "honey");
        assert_eq!(summary.by_product[0].profit_cents, 9000);
        assert_eq!(summary.by_product[1].product_id, "jam");

        let event = &summary.by_event[0];
        assert_eq!(event.order_count, 1);
        assert_eq!(event.revenue_cents, 16000);
        assert_eq!(event.stall_fee_cents, 5000);
        assert_eq!(event.net_after_fee_cents, 11000);

        assert_eq!(summary.by_payment_method.len(), 2);
        assert_eq!(summary.by_payment_method[0].method, PaymentMethod::Cash);
    }

    #[test]
    fn test_empty_report() {
        let summary = summarize(d("2024-03-01"), d("2024-03-31"), &ReportInput::default());
        assert_eq!(summary.margin_bps, 0);
        assert_eq!(summary.average_order_cents, 0);
        assert!(summary.by_product.is_empty());
    }

    #[test]
    fn test_expiring_days_left() {
        let batch = ExpiringBatch {
            batch_id: "b1".into(),
            batch_number: "B-20240301-0001".into(),
            product_id: "p1".into(),
            sku: "JAM-250".into(),
            name: "Jam".into(),
            quantity: 4,
            expiry_date: d("2024-03-10"),
            days_left: 0,
        };
        assert_eq!(batch.clone().with_days_left(d("2024-03-01")).days_left, 9);
        assert!(batch.with_days_left(d("2024-03-12")).is_expired());
    }

    #[test]
    fn test_negative_margin() {
        assert_eq!(margin_bps(-500, 1000), -5000);
    }
}
