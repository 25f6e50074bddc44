//! # Inventory Module
//!
//! FIFO-by-expiry batch depletion, and the reverse operation used by
//! cancellations and restocking refunds.
//!
//! ## Depletion Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Sell 7 × HONEY-500                                                     │
//! │                                                                         │
//! │   batch   expiry        qty          take                               │
//! │   ─────   ──────────    ───          ────                               │
//! │   B-2     2024-04-01     3    ──►     3   (earliest expiry first)       │
//! │   B-1     2024-06-01     2    ──►     2                                 │
//! │   B-3     2024-06-01     5    ──►     2   (same expiry: older prod.)    │
//! │   B-4     (none)         9            0   (undated batches go last)     │
//! │                                                                         │
//! │  Allocations are stored per order item so a reversal returns every      │
//! │  unit to the batch it came from.                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::ProductBatch;

// =============================================================================
// Types
// =============================================================================

/// The parts of a batch that matter for allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStock {
    pub batch_id: String,
    pub quantity: i64,
    pub expiry_date: Option<NaiveDate>,
    pub production_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub cost_price_cents: Option<i64>,
}

impl From<&ProductBatch> for BatchStock {
    fn from(batch: &ProductBatch) -> Self {
        BatchStock {
            batch_id: batch.id.clone(),
            quantity: batch.quantity,
            expiry_date: batch.expiry_date,
            production_date: batch.production_date,
            created_at: batch.created_at,
            cost_price_cents: batch.cost_price_cents,
        }
    }
}

/// Quantity taken from (or returned to) one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Allocation {
    pub batch_id: String,
    pub quantity: i64,
}

// =============================================================================
// FIFO Ordering
// =============================================================================

/// Compares two batches in depletion order.
fn fifo_cmp(a: &BatchStock, b: &BatchStock) -> Ordering {
    // `None` sorts after every date.
    fn dated_first(x: Option<NaiveDate>, y: Option<NaiveDate>) -> Ordering {
        match (x, y) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    dated_first(a.expiry_date, b.expiry_date)
        .then_with(|| dated_first(a.production_date, b.production_date))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.batch_id.cmp(&b.batch_id))
}

/// Sorts batches into depletion order.
pub fn fifo_order(batches: &mut [BatchStock]) {
    batches.sort_by(fifo_cmp);
}

/// Sum of the quantities on hand.
pub fn total_available(batches: &[BatchStock]) -> i64 {
    batches.iter().map(|b| b.quantity.max(0)).sum()
}

// =============================================================================
// Depletion & Reversal
// =============================================================================

/// Plans which batches a sale of `requested` units draws from.
///
/// Nothing is written here; the caller applies the plan inside its
/// transaction. No allocation ever exceeds the batch's quantity.
///
/// ## Example
/// ```rust
/// use chrono::{NaiveDate, Utc};
/// use harvest_core::inventory::{plan_depletion, BatchStock};
///
/// let batch = |id: &str, qty, expiry: &str| BatchStock {
///     batch_id: id.to_string(),
///     quantity: qty,
///     expiry_date: NaiveDate::parse_from_str(expiry, "%Y-%m-%d").ok(),
///     production_date: None,
///     created_at: Utc::now(),
///     cost_price_cents: None,
/// };
///
/// let batches = vec![batch("late", 10, "2024-09-01"), batch("early", 2, "2024-05-01")];
/// let plan = plan_depletion("JAM-250", &batches, 5).unwrap();
/// assert_eq!(plan[0].batch_id, "early");
/// assert_eq!(plan[0].quantity, 2);
/// assert_eq!(plan[1].quantity, 3);
/// ```
pub fn plan_depletion(
    sku: &str,
    batches: &[BatchStock],
    requested: i64,
) -> CoreResult<Vec<Allocation>> {
    let available = total_available(batches);
    if requested > available {
        return Err(CoreError::InsufficientStock {
            sku: sku.to_string(),
            available,
            requested,
        });
    }

    let mut ordered = batches.to_vec();
    fifo_order(&mut ordered);

    let mut remaining = requested;
    let mut plan = Vec::new();
    for batch in ordered.iter().filter(|b| b.quantity > 0) {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.quantity);
        plan.push(Allocation {
            batch_id: batch.batch_id.clone(),
            quantity: take,
        });
        remaining -= take;
    }

    Ok(plan)
}

/// Like [`plan_depletion`] but takes whatever is on hand instead of failing.
///
/// Used for imported sales, which already happened: the second value is the
/// number of units no batch could cover.
pub fn plan_best_effort(batches: &[BatchStock], requested: i64) -> (Vec<Allocation>, i64) {
    let available = total_available(batches);
    let covered = requested.min(available).max(0);
    let plan = match plan_depletion("", batches, covered) {
        Ok(plan) => plan,
        Err(_) => Vec::new(),
    };
    (plan, requested - covered)
}

/// Merges allocations per batch for restocking, keeping first-seen order.
pub fn plan_reversal(allocations: &[Allocation]) -> Vec<Allocation> {
    let mut merged: Vec<Allocation> = Vec::new();
    for allocation in allocations.iter().filter(|a| a.quantity > 0) {
        match merged.iter_mut().find(|m| m.batch_id == allocation.batch_id) {
            Some(existing) => existing.quantity += allocation.quantity,
            None => merged.push(allocation.clone()),
        }
    }
    merged
}

/// Weighted per-unit cost of a set of allocations.
///
/// Batches without their own cost use `fallback` (the product's cost).
pub fn allocated_unit_cost(
    allocations: &[Allocation],
    batches: &[BatchStock],
    fallback: Money,
) -> Money {
    let units: i64 = allocations.iter().map(|a| a.quantity).sum();
    if units == 0 {
        return fallback;
    }

    let total: i64 = allocations
        .iter()
        .map(|a| {
            let unit = batches
                .iter()
                .find(|b| b.batch_id == a.batch_id)
                .and_then(|b| b.cost_price_cents)
                .unwrap_or(fallback.cents());
            unit * a.quantity
        })
        .sum();

    Money::from_cents((total + units / 2) / units)
}

// =============================================================================
// Stock Levels
// =============================================================================

/// Traffic-light stock state for product lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    OutOfStock,
    Low,
    InStock,
}

impl StockLevel {
    pub fn classify(total: i64, threshold: i64) -> Self {
        if total <= 0 {
            StockLevel::OutOfStock
        } else if is_low_stock(total, threshold) {
            StockLevel::Low
        } else {
            StockLevel::InStock
        }
    }
}

/// Stock at or below the threshold counts as low.
#[inline]
pub fn is_low_stock(total: i64, threshold: i64) -> bool {
    total <= threshold
}

/// Whether a batch expires on or before `today + days`.
///
/// Already-expired batches count; undated batches never do.
pub fn expiring_within(expiry_date: Option<NaiveDate>, today: NaiveDate, days: i64) -> bool {
    match expiry_date {
        Some(expiry) => expiry <= today + Duration::days(days),
        None => false,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(s: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
    }

    fn batch(id: &str, qty: i64, expiry: &str, produced: &str, minute: u32) -> BatchStock {
        BatchStock {
            batch_id: id.to_string(),
            quantity: qty,
            expiry_date: date(expiry),
            production_date: date(produced),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 8, minute, 0).unwrap(),
            cost_price_cents: None,
        }
    }

    #[test]
    fn test_fifo_order_by_expiry_then_production() {
        let mut batches = vec![
            batch("undated", 9, "", "", 0),
            batch("june-new", 5, "2024-06-01", "2024-02-01", 1),
            batch("april", 3, "2024-04-01", "", 2),
            batch("june-old", 2, "2024-06-01", "2024-01-01", 3),
        ];
        fifo_order(&mut batches);
        let ids: Vec<_> = batches.iter().map(|b| b.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["april", "june-old", "june-new", "undated"]);
    }

    #[test]
    fn test_ties_fall_back_to_created_at() {
        let mut batches = vec![batch("second", 1, "", "", 5), batch("first", 1, "", "", 1)];
        fifo_order(&mut batches);
        assert_eq!(batches[0].batch_id, "first");
    }

    #[test]
    fn test_plan_spans_batches_and_skips_empty() {
        let batches = vec![
            batch("empty", 0, "2024-03-01", "", 0),
            batch("a", 3, "2024-04-01", "", 1),
            batch("b", 2, "2024-06-01", "2024-01-01", 2),
            batch("c", 5, "2024-06-01", "2024-02-01", 3),
        ];
        let plan = plan_depletion("HONEY-500", &batches, 7).unwrap();
        assert_eq!(
            plan,
            vec![
                Allocation { batch_id: "a".into(), quantity: 3 },
                Allocation { batch_id: "b".into(), quantity: 2 },
                Allocation { batch_id: "c".into(), quantity: 2 },
            ]
        );
    }

    #[test]
    fn test_plan_exact_total_empties_every_batch() {
        let batches = vec![batch("a", 3, "2024-04-01", "", 0), batch("b", 2, "", "", 1)];
        let plan = plan_depletion("X", &batches, 5).unwrap();
        for (alloc, batch) in plan.iter().zip(batches.iter()) {
            assert_eq!(alloc.quantity, batch.quantity);
        }
    }

    #[test]
    fn test_insufficient_stock() {
        let batches = vec![batch("a", 3, "2024-04-01", "", 0)];
        let err = plan_depletion("HONEY-500", &batches, 5).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientStock { available: 3, requested: 5, .. }
        ));
    }

    #[test]
    fn test_best_effort_reports_shortfall() {
        let batches = vec![batch("a", 3, "2024-04-01", "", 0)];
        let (plan, shortfall) = plan_best_effort(&batches, 5);
        assert_eq!(plan, vec![Allocation { batch_id: "a".into(), quantity: 3 }]);
        assert_eq!(shortfall, 2);

        let (plan, shortfall) = plan_best_effort(&[], 2);
        assert!(plan.is_empty());
        assert_eq!(shortfall, 2);
    }

    #[test]
    fn test_plan_reversal_merges_per_batch() {
        let allocations = vec![
            Allocation { batch_id: "a".into(), quantity: 2 },
            Allocation { batch_id: "b".into(), quantity: 1 },
            Allocation { batch_id: "a".into(), quantity: 3 },
        ];
        let reversal = plan_reversal(&allocations);
        assert_eq!(reversal.len(), 2);
        assert_eq!(reversal[0], Allocation { batch_id: "a".into(), quantity: 5 });
    }

    #[test]
    fn test_allocated_unit_cost() {
        let mut cheap = batch("cheap", 10, "2024-04-01", "", 0);
        cheap.cost_price_cents = Some(1000);
        let plain = batch("plain", 10, "2024-05-01", "", 1);
        let allocations = vec![
            Allocation { batch_id: "cheap".into(), quantity: 1 },
            Allocation { batch_id: "plain".into(), quantity: 1 },
        ];
        let cost = allocated_unit_cost(&allocations, &[cheap, plain], Money::from_cents(2000));
        assert_eq!(cost.cents(), 1500);
    }

    #[test]
    fn test_stock_levels() {
        assert!(is_low_stock(5, 5));
        assert!(!is_low_stock(6, 5));
        assert_eq!(StockLevel::classify(0, 5), StockLevel::OutOfStock);
        assert_eq!(StockLevel::classify(3, 5), StockLevel::Low);
        assert_eq!(StockLevel::classify(30, 5), StockLevel::InStock);
    }

    #[test]
    fn test_expiring_within() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(expiring_within(date("2024-03-15"), today, 14));
        assert!(!expiring_within(date("2024-03-16"), today, 14));
        assert!(expiring_within(date("2024-02-01"), today, 14));
        assert!(!expiring_within(None, today, 14));
    }
}
