//! # Domain Types
//!
//! Core domain types used throughout Harvest POS.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │──►│  ProductBatch   │──►│ StockMovement   │       │
//! │  │  sku, prices    │   │  qty, expiry    │   │ in/out + reason │       │
//! │  └─────────────────┘   └────────▲────────┘   └─────────────────┘       │
//! │                                 │ allocation                            │
//! │  ┌─────────────────┐   ┌────────┴────────┐   ┌─────────────────┐       │
//! │  │     Order       │──►│   OrderItem     │   │    Payment      │       │
//! │  │  status, totals │   │  snapshots      │   │  method, status │       │
//! │  └──┬──────┬───────┘   └─────────────────┘   └─────────────────┘       │
//! │     │      │                                                            │
//! │     ▼      ▼                                                            │
//! │  Customer  MarketEvent ──► EventDay        Invoice ◄── BusinessSettings │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID: (sku, order_number, invoice_number) - human-readable
//!
//! Request payloads (`New*`, `*Update`) live next to the rows they create;
//! their `validate()` methods are in [`crate::validation`].

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;
use crate::order::{OrderActions, OrderStatus, RefundLedger};
use crate::payment::{PaymentMethod, PaymentStatus};
use crate::recurrence::{EventSchedule, EventType, RecurrencePattern};

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 1500 bps = 15% (South African VAT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::from_bps(crate::DEFAULT_VAT_RATE_BPS)
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product available for sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    /// Display name shown on receipts and invoices.
    pub name: String,

    pub description: Option<String>,

    /// Free-form grouping used by reports ("Honey", "Preserves", ...).
    pub category: Option<String>,

    /// VAT-inclusive selling price in cents.
    pub unit_price_cents: i64,

    /// Default cost per unit in cents (batches may override).
    pub cost_price_cents: i64,

    /// Stock at or below this level is reported as low.
    pub low_stock_threshold: i64,

    /// Whether product is active (soft delete).
    pub is_active: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn cost(&self) -> Money {
        Money::from_cents(self.cost_price_cents)
    }
}

/// A product together with the sum of its batch quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ProductWithStock {
    #[serde(flatten)]
    #[cfg_attr(feature = "sqlx", sqlx(flatten))]
    pub product: Product,

    pub total_stock: i64,

    /// Filled in from [`crate::inventory::is_low_stock`] after loading.
    #[cfg_attr(feature = "sqlx", sqlx(default))]
    pub is_low_stock: bool,
}

/// Product detail: stock summary plus the batches in FIFO order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductDetail {
    pub product: ProductWithStock,
    pub batches: Vec<ProductBatch>,
}

/// Payload for creating a product.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub cost_price_cents: i64,
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i64,
}

fn default_low_stock_threshold() -> i64 {
    5
}

/// Partial product update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductUpdate {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit_price_cents: Option<i64>,
    pub cost_price_cents: Option<i64>,
    pub low_stock_threshold: Option<i64>,
    pub is_active: Option<bool>,
}

// =============================================================================
// Batches & Stock Movements
// =============================================================================

/// A dated lot of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ProductBatch {
    pub id: String,
    pub product_id: String,
    pub batch_number: String,
    /// Units currently on hand. Never negative.
    pub quantity: i64,
    /// Units received when the batch was created.
    pub initial_quantity: i64,
    #[ts(as = "Option<String>")]
    pub production_date: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub expiry_date: Option<NaiveDate>,
    /// Overrides the product's cost for units from this batch.
    pub cost_price_cents: Option<i64>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Payload for receiving a new batch.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewBatch {
    pub product_id: String,
    /// Generated as `B-YYYYMMDD-XXXX` when omitted.
    #[serde(default)]
    pub batch_number: Option<String>,
    pub quantity: i64,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub production_date: Option<NaiveDate>,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub cost_price_cents: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Manual stock count correction: sets the batch to `quantity`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BatchAdjustment {
    pub quantity: i64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub expiry_date: Option<NaiveDate>,
}

/// Direction of a stock movement.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
}

/// Why stock moved.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    BatchCreated,
    Sale,
    Cancellation,
    Refund,
    Adjustment,
    BatchRemoved,
    Import,
}

/// One row of the stock audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,
    pub batch_id: Option<String>,
    pub movement_type: MovementType,
    /// Always positive; direction is in `movement_type`.
    pub quantity: i64,
    pub reason: MovementReason,
    /// Order id for sales, cancellations and refunds.
    pub reference_id: Option<String>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Customers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub marketing_opt_in: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating or replacing a customer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub marketing_opt_in: bool,
}

/// Lifetime purchase figures for a customer (paid orders only).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CustomerSummary {
    pub order_count: i64,
    pub total_spent_cents: i64,
    #[ts(as = "Option<String>")]
    pub last_order_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CustomerDetail {
    pub customer: Customer,
    pub summary: CustomerSummary,
    pub recent_orders: Vec<Order>,
}

// =============================================================================
// Market Events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct MarketEvent {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub event_type: EventType,
    #[ts(as = "String")]
    pub start_date: NaiveDate,
    #[ts(as = "Option<String>")]
    pub end_date: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub start_time: Option<NaiveTime>,
    #[ts(as = "Option<String>")]
    pub end_time: Option<NaiveTime>,
    pub recurrence_pattern: Option<RecurrencePattern>,
    #[ts(as = "Option<String>")]
    pub recurrence_end_date: Option<NaiveDate>,
    /// Fee paid for the stall, deducted in per-event reports.
    pub stall_fee_cents: i64,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// A concrete day on which an event takes place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct EventDay {
    pub id: String,
    pub event_id: String,
    #[ts(as = "String")]
    pub event_date: NaiveDate,
    #[ts(as = "Option<String>")]
    pub start_time: Option<NaiveTime>,
    #[ts(as = "Option<String>")]
    pub end_time: Option<NaiveTime>,
}

/// Payload for creating or replacing a market event.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewMarketEvent {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub event_type: EventType,
    #[ts(as = "String")]
    pub start_date: NaiveDate,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub recurrence_pattern: Option<RecurrencePattern>,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub recurrence_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub stall_fee_cents: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewMarketEvent {
    /// The date fields as a schedule for expansion.
    pub fn schedule(&self) -> EventSchedule {
        EventSchedule {
            event_type: self.event_type,
            start_date: self.start_date,
            end_date: self.end_date,
            start_time: self.start_time,
            end_time: self.end_time,
            pattern: self.recurrence_pattern,
            until: self.recurrence_end_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MarketEventDetail {
    pub event: MarketEvent,
    pub days: Vec<EventDay>,
}

/// One line of the calendar view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CalendarEntry {
    pub event_id: String,
    pub event_day_id: String,
    pub name: String,
    pub location: Option<String>,
    pub event_type: EventType,
    #[ts(as = "String")]
    pub date: NaiveDate,
    #[ts(as = "Option<String>")]
    pub start_time: Option<NaiveTime>,
    #[ts(as = "Option<String>")]
    pub end_time: Option<NaiveTime>,
}

// =============================================================================
// Orders
// =============================================================================

/// Where an order came from.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    /// Rung up at the point of sale.
    Pos,
    /// Created from a vendor CSV export.
    Import,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub customer_id: Option<String>,
    pub market_event_id: Option<String>,
    pub status: OrderStatus,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    /// VAT contained in `total_cents`.
    pub tax_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,
    pub source: OrderSource,
    /// Receipt number of an imported sale; unique so re-imports are detected.
    pub external_reference: Option<String>,
    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A line item. Uses snapshot pattern to freeze product data at time of sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    /// SKU at time of sale (frozen).
    pub sku_snapshot: String,
    /// Product name at time of sale (frozen).
    pub name_snapshot: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// Weighted cost of the allocated batches, per unit.
    pub cost_price_cents: i64,
    pub line_total_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// The quantity one order item took from one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderItemBatch {
    pub id: String,
    pub order_item_id: String,
    pub batch_id: String,
    pub quantity: i64,
}

/// A payment towards an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    /// Checkout id at the payment provider.
    pub provider_reference: Option<String>,
    pub checkout_url: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Refund {
    pub id: String,
    pub order_id: String,
    pub amount_cents: i64,
    pub reason: Option<String>,
    /// Stock was returned to the allocated batches.
    pub restocked: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// One entry of an order's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderStatusChange {
    pub id: String,
    pub order_id: String,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub note: Option<String>,
    pub changed_by: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Payload for creating an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewOrder {
    #[serde(default)]
    pub items: Vec<NewOrderItem>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub market_event_id: Option<String>,
    #[serde(default)]
    pub discount_cents: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewOrderItem {
    pub product_id: String,
    pub quantity: i64,
    /// Price override; the product's current price when omitted.
    #[serde(default)]
    pub unit_price_cents: Option<i64>,
}

/// Filters for listing orders.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderFilter {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub market_event_id: Option<String>,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Everything the order screen shows.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub allocations: Vec<OrderItemBatch>,
    pub payments: Vec<Payment>,
    pub refunds: Vec<Refund>,
    pub history: Vec<OrderStatusChange>,
    pub ledger: RefundLedger,
    pub actions: OrderActions,
}

// =============================================================================
// Invoices
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Issued,
    Sent,
    Void,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    pub order_id: String,
    pub customer_id: Option<String>,
    pub business_profile_id: Option<String>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub status: InvoiceStatus,
    pub sent_to: Option<String>,
    #[ts(as = "Option<String>")]
    pub sent_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// An invoice with everything needed to render or email it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub customer: Option<Customer>,
    pub business: Option<BusinessSettings>,
}

// =============================================================================
// Business Settings
// =============================================================================

/// A business profile (trading name, VAT details, invoice numbering).
///
/// Several profiles may exist; at most one is the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BusinessSettings {
    pub id: String,
    pub profile_name: String,
    pub business_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub vat_number: Option<String>,
    pub vat_rate_bps: i64,
    pub currency: String,
    pub invoice_prefix: String,
    pub next_invoice_number: i64,
    pub auto_send_invoice: bool,
    pub is_default: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl BusinessSettings {
    pub fn vat_rate(&self) -> TaxRate {
        TaxRate::from_bps(u32::try_from(self.vat_rate_bps).unwrap_or(0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewBusinessSettings {
    pub profile_name: String,
    pub business_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub vat_number: Option<String>,
    #[serde(default)]
    pub vat_rate_bps: Option<u32>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub invoice_prefix: Option<String>,
    #[serde(default)]
    pub auto_send_invoice: bool,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BusinessSettingsUpdate {
    pub profile_name: Option<String>,
    pub business_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub vat_number: Option<String>,
    pub vat_rate_bps: Option<u32>,
    pub currency: Option<String>,
    pub invoice_prefix: Option<String>,
    pub auto_send_invoice: Option<bool>,
    pub is_default: Option<bool>,
}

// =============================================================================
// User Roles
// =============================================================================

/// Access level of a signed-in user.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access.
    Viewer,
    /// Sells, refunds, receives stock.
    Staff,
    /// Everything, including settings and role management.
    Admin,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct UserRoleAssignment {
    pub id: String,
    pub user_id: String,
    pub role: Role,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewUserRole {
    pub user_id: String,
    pub role: Role,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_rate_from_bps() {
        let rate = TaxRate::from_bps(1500);
        assert_eq!(rate.bps(), 1500);
        assert!((rate.percentage() - 15.0).abs() < 0.001);
        assert_eq!(TaxRate::default().bps(), crate::DEFAULT_VAT_RATE_BPS);
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::Admin > Role::Staff);
        assert!(Role::Staff > Role::Viewer);
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn test_new_order_defaults() {
        let order: NewOrder =
            serde_json::from_str(r#"{"items":[{"product_id":"p","quantity":2}]}"#).unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.discount_cents, 0);
        assert!(order.items[0].unit_price_cents.is_none());

        let empty: NewOrder = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
    }

    #[test]
    fn test_enums_serialize_snake_case() {
        let json = |value: serde_json::Value| value.as_str().unwrap_or_default().to_string();
        assert_eq!(json(serde_json::json!(MovementReason::BatchRemoved)), "batch_removed");
        assert_eq!(json(serde_json::json!(OrderStatus::PartiallyRefunded)), "partially_refunded");
        assert_eq!(json(serde_json::json!(EventType::MultiDay)), "multi_day");
    }

    #[test]
    fn test_new_market_event_schedule() {
        let event: NewMarketEvent = serde_json::from_str(
            r#"{"name":"Saturday Market","start_date":"2024-03-02","event_type":"recurring",
                "recurrence_pattern":"weekly","recurrence_end_date":"2024-03-30"}"#,
        )
        .unwrap();
        let schedule = event.schedule();
        assert_eq!(schedule.pattern, Some(RecurrencePattern::Weekly));
        assert_eq!(schedule.event_type, EventType::Recurring);
    }
}
