//! # harvest-core: Pure Business Logic for Harvest POS
//!
//! This crate holds every business rule of the point of sale as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Harvest POS Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Web frontend (SPA)                           │   │
//! │  │   Sales ──► Checkout ──► Inventory ──► Events ──► Reports       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ JSON over HTTP                         │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                apps/api (function endpoints)                    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ harvest-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │  money · inventory (FIFO) · order · payment · recurrence        │   │
//! │  │  import (CSV) · report · invoice · validation                   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  harvest-db (Database Layer)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain rows (Product, ProductBatch, Order, Payment, ...)
//! - [`money`] - Money type with integer arithmetic and VAT helpers
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//! - [`inventory`] - FIFO-by-expiry batch depletion and reversal
//! - [`order`] - Order totals, lifecycle and refund ledger
//! - [`payment`] - Payment methods and statuses
//! - [`recurrence`] - Market-event day expansion
//! - [`import`] - Vendor CSV sales import
//! - [`report`] - Sales, margin and profit aggregation
//! - [`invoice`] - Invoice numbering and totals
//!
//! ## Example Usage
//!
//! ```rust
//! use harvest_core::money::Money;
//! use harvest_core::types::TaxRate;
//!
//! // R115.00 including 15% VAT contains R15.00 of VAT
//! let total = Money::from_cents(11500);
//! let vat = total.vat_inclusive_portion(TaxRate::from_bps(1500));
//! assert_eq!(vat.cents(), 1500);
//! ```

pub mod error;
pub mod import;
pub mod inventory;
pub mod invoice;
pub mod money;
pub mod order;
pub mod payment;
pub mod recurrence;
pub mod report;
pub mod types;
pub mod validation;

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use order::{OrderActions, OrderStatus, OrderTotals, RefundLedger};
pub use payment::{PaymentMethod, PaymentStatus};
pub use types::*;

/// Maximum quantity of a single product on one order line.
///
/// Market stalls sell by the unit; anything larger is almost always a typo.
pub const MAX_ITEM_QUANTITY: i64 = 9_999;

/// Maximum number of distinct lines on one order.
pub const MAX_ORDER_LINES: usize = 200;

/// Default VAT rate in basis points (15%).
pub const DEFAULT_VAT_RATE_BPS: u32 = 1_500;

/// Default ISO 4217 currency code.
pub const DEFAULT_CURRENCY: &str = "ZAR";

/// Upper bound on generated market-event days.
pub const MAX_EVENT_OCCURRENCES: usize = 366;
