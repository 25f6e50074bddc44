//! # Order Module
//!
//! Order math and the order lifecycle state machine.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │                ┌──────────┐  pay   ┌──────┐  refund  ┌──────────────┐    │
//! │   create ────► │ pending  │ ─────► │ paid │ ───────► │  partially_  │    │
//! │                └────┬─────┘        └──┬───┘          │  refunded    │    │
//! │                     │ cancel          │ full refund  └──────┬───────┘    │
//! │                     ▼                 ▼                     │           │
//! │                ┌──────────┐      ┌──────────┐  rest refunded│           │
//! │                │cancelled │      │ refunded │ ◄─────────────┘           │
//! │                └──────────┘      └──────────┘                           │
//! │                                                                         │
//! │  cancelled and refunded are terminal.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Totals
//! Prices are VAT-inclusive. `total = subtotal - discount` and `tax` is the
//! VAT contained in `total`, not added on top of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::payment::PaymentStatus;
use crate::types::{NewOrderItem, Payment, Refund, TaxRate};

// =============================================================================
// Order Status
// =============================================================================

/// The status of an order.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, stock reserved, awaiting payment.
    Pending,
    /// Fully paid.
    Paid,
    /// Paid, with some of the amount refunded.
    PartiallyRefunded,
    /// Paid amount refunded in full.
    Refunded,
    /// Cancelled before payment; stock returned.
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::PartiallyRefunded,
        OrderStatus::Refunded,
        OrderStatus::Cancelled,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::PartiallyRefunded => "partially_refunded",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Parses a status filter from a query string.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_lowercase();
        OrderStatus::ALL
            .into_iter()
            .find(|s| s.as_str() == normalized)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: OrderStatus::ALL
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            })
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub const fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::PartiallyRefunded)
                | (OrderStatus::Paid, OrderStatus::Refunded)
                | (OrderStatus::PartiallyRefunded, OrderStatus::PartiallyRefunded)
                | (OrderStatus::PartiallyRefunded, OrderStatus::Refunded)
        )
    }

    /// No further transitions are possible.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Refunded | OrderStatus::Cancelled)
    }

    /// Money has been taken for this order at some point.
    pub const fn is_paid(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::PartiallyRefunded | OrderStatus::Refunded
        )
    }

    /// Returns `InvalidOrderStatus` unless `self → next` is allowed.
    pub fn ensure_transition(
        &self,
        order_id: &str,
        next: OrderStatus,
        action: &str,
    ) -> CoreResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidOrderStatus {
                order_id: order_id.to_string(),
                current_status: self.as_str().to_string(),
                action: action.to_string(),
            })
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Totals
// =============================================================================

/// A line as far as the totals are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub quantity: i64,
    pub unit_price: Money,
}

impl PricedLine {
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply_quantity(self.quantity)
    }
}

/// Computed order amounts, all VAT-inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderTotals {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
}

impl OrderTotals {
    /// Computes the totals of an order.
    ///
    /// ## Example
    /// ```rust
    /// use harvest_core::money::Money;
    /// use harvest_core::order::{OrderTotals, PricedLine};
    /// use harvest_core::types::TaxRate;
    ///
    /// let lines = [PricedLine { quantity: 2, unit_price: Money::from_cents(6000) }];
    /// let totals = OrderTotals::compute(&lines, Money::from_cents(500), TaxRate::from_bps(1500)).unwrap();
    /// assert_eq!(totals.subtotal_cents, 12000);
    /// assert_eq!(totals.total_cents, 11500);
    /// assert_eq!(totals.tax_cents, 1500);
    /// ```
    pub fn compute(lines: &[PricedLine], discount: Money, vat_rate: TaxRate) -> CoreResult<Self> {
        if discount.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "discount_cents".to_string(),
            }
            .into());
        }

        let subtotal: Money = lines.iter().map(PricedLine::line_total).sum();
        if discount > subtotal {
            return Err(CoreError::DiscountExceedsSubtotal {
                discount: discount.cents(),
                subtotal: subtotal.cents(),
            });
        }

        let total = subtotal - discount;
        let tax = total.vat_inclusive_portion(vat_rate);

        Ok(OrderTotals {
            subtotal_cents: subtotal.cents(),
            discount_cents: discount.cents(),
            tax_cents: tax.cents(),
            total_cents: total.cents(),
        })
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// Folds repeated lines for the same product (at the same price) into one.
///
/// First-seen order is kept so receipts read the way the cashier rang them up.
pub fn merge_duplicate_items(items: &[NewOrderItem]) -> Vec<NewOrderItem> {
    let mut merged: Vec<NewOrderItem> = Vec::with_capacity(items.len());
    let mut index: HashMap<(String, Option<i64>), usize> = HashMap::new();

    for item in items {
        let key = (item.product_id.trim().to_string(), item.unit_price_cents);
        match index.get(&key) {
            Some(&i) => merged[i].quantity += item.quantity,
            None => {
                index.insert(key, merged.len());
                merged.push(NewOrderItem {
                    product_id: item.product_id.trim().to_string(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                });
            }
        }
    }

    merged
}

// =============================================================================
// Refund Ledger
// =============================================================================

/// What has been paid and refunded on one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundLedger {
    pub total_paid_cents: i64,
    pub total_refunded_cents: i64,
}

impl RefundLedger {
    pub fn new(total_paid: Money, total_refunded: Money) -> Self {
        RefundLedger {
            total_paid_cents: total_paid.cents(),
            total_refunded_cents: total_refunded.cents(),
        }
    }

    /// Builds the ledger from stored rows. Only completed payments count.
    pub fn from_records(payments: &[Payment], refunds: &[Refund]) -> Self {
        let paid: Money = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Completed)
            .map(|p| Money::from_cents(p.amount_cents))
            .sum();
        let refunded: Money = refunds
            .iter()
            .map(|r| Money::from_cents(r.amount_cents))
            .sum();
        RefundLedger::new(paid, refunded)
    }

    pub fn total_paid(&self) -> Money {
        Money::from_cents(self.total_paid_cents)
    }

    pub fn total_refunded(&self) -> Money {
        Money::from_cents(self.total_refunded_cents)
    }

    /// Amount still available for refunds (never negative).
    pub fn refundable(&self) -> Money {
        let remaining = self.total_paid() - self.total_refunded();
        if remaining.is_negative() {
            Money::zero()
        } else {
            remaining
        }
    }

    /// Checks a refund request against the remaining balance.
    pub fn validate_refund(&self, amount: Money) -> CoreResult<()> {
        if !amount.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "amount_cents".to_string(),
            }
            .into());
        }

        let refundable = self.refundable();
        if amount > refundable {
            return Err(CoreError::RefundExceedsBalance {
                requested: amount.cents(),
                refundable: refundable.cents(),
            });
        }

        Ok(())
    }

    /// Status of the order once `amount` has been refunded.
    pub fn status_after_refund(&self, amount: Money) -> OrderStatus {
        if self.total_refunded() + amount >= self.total_paid() {
            OrderStatus::Refunded
        } else {
            OrderStatus::PartiallyRefunded
        }
    }
}

// =============================================================================
// Allowed Actions
// =============================================================================

/// Buttons the frontend may offer for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderActions {
    pub can_pay: bool,
    pub can_cancel: bool,
    pub can_refund: bool,
    pub can_invoice: bool,
}

impl OrderActions {
    pub fn for_order(status: OrderStatus, ledger: &RefundLedger) -> Self {
        let has_completed_payment = ledger.total_paid().is_positive();
        OrderActions {
            can_pay: status == OrderStatus::Pending,
            can_cancel: status == OrderStatus::Pending && !has_completed_payment,
            can_refund: matches!(status, OrderStatus::Paid | OrderStatus::PartiallyRefunded)
                && ledger.refundable().is_positive(),
            can_invoice: status.is_paid(),
        }
    }
}

// =============================================================================
// Order Numbers
// =============================================================================

/// Generates a human-readable order number: `ORD-YYYYMMDD-XXXXXX`.
///
/// The suffix is the first six hex digits of a fresh UUID, upper-cased.
pub fn generate_order_number(at: DateTime<Utc>) -> String {
    let token = Uuid::new_v4().simple().to_string()[..6].to_ascii_uppercase();
    format_order_number(at, &token)
}

/// Formats an order number from a timestamp and suffix token.
pub fn format_order_number(at: DateTime<Utc>, token: &str) -> String {
    format!("ORD-{}-{}", at.format("%Y%m%d"), token)
}

// =============================================================================
// Unit Tests
// =============================================================================
