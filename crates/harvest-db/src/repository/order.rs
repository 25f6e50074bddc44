//! # Order Repository
//!
//! Orders, payments and refunds. Every workflow here runs in a single
//! transaction: either all of its rows are written or none are.
//!
//! ## Create Order Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        create_order                                     │
//! │                                                                         │
//! │  NewOrder ──► validate ──► merge duplicate lines                       │
//! │                                  │                                      │
//! │  BEGIN ◄─────────────────────────┘                                      │
//! │    │                                                                    │
//! │    ├── customer / event exist?                           (404)          │
//! │    ├── for each line: product exists & active?           (404 / 400)    │
//! │    │     └── plan FIFO depletion over stocked batches    (422)          │
//! │    │         (every line is planned before anything is written)         │
//! │    ├── totals (VAT from default profile)                                │
//! │    ├── INSERT orders, order_items, order_item_batches                  │
//! │    ├── UPDATE product_batches … WHERE quantity >= ?      (422 on race)  │
//! │    ├── INSERT stock_movements (out / sale)                              │
//! │    └── INSERT order_status_history (→ pending)                          │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Payment Flow
//! ```text
//! pay_order(cash | card | eft)            pay_order(yoco | payment_link)
//!      │                                        │
//!      ▼                                        ▼
//! payment: completed                      payment: pending + provider ref
//! order:   pending → paid                 order:   stays pending
//!                                               │
//!                                  complete_payment(ref, completed)
//!                                               │
//!                                               ▼
//!                                  payment: completed, order → paid
//! ```

use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use super::settings::default_vat_rate;
use super::{
    begin_write, fetch_product, fetch_stocked_batches, generate_id, now, record_movement,
    record_status_change, restore_order_allocations, take_from_batch, MovementEntry,
};
use crate::error::{DbError, DbResult};
use harvest_core::inventory::{allocated_unit_cost, plan_depletion, Allocation, BatchStock};
use harvest_core::order::{generate_order_number, merge_duplicate_items, PricedLine};
use harvest_core::validation::validate_amount_cents;
use harvest_core::{
    CoreError, Money, MovementReason, MovementType, NewOrder, Order, OrderActions, OrderDetail,
    OrderFilter, OrderItem, OrderItemBatch, OrderSource, OrderStatus, OrderStatusChange,
    OrderTotals, Payment, PaymentMethod, PaymentStatus, Refund, RefundLedger, ValidationError,
};

pub(crate) const ORDER_COLUMNS: &str = "id, order_number, customer_id, market_event_id, status, \
     subtotal_cents, discount_cents, tax_cents, total_cents, notes, source, external_reference, \
     paid_at, cancelled_at, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, sku_snapshot, name_snapshot, quantity, \
     unit_price_cents, cost_price_cents, line_total_cents, created_at";

const PAYMENT_COLUMNS: &str = "id, order_id, method, status, amount_cents, provider_reference, \
     checkout_url, created_at, completed_at";

/// Default page size for order lists.
const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

// =============================================================================
// Requests & Outcomes
// =============================================================================

/// A tender against a pending order.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    /// Defaults to the outstanding balance; must equal it when given.
    pub amount_cents: Option<i64>,
    /// Checkout id, required for provider methods.
    pub provider_reference: Option<String>,
    pub checkout_url: Option<String>,
    pub actor: Option<String>,
}

impl PaymentRequest {
    pub fn new(method: PaymentMethod) -> Self {
        PaymentRequest {
            method,
            amount_cents: None,
            provider_reference: None,
            checkout_url: None,
            actor: None,
        }
    }
}

/// What a payment call did.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub order: Order,
    /// `None` only for zero-total orders settled without a tender.
    pub payment: Option<Payment>,
    /// The order moved to `paid` during this call (triggers invoicing).
    pub order_became_paid: bool,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub amount_cents: i64,
    pub reason: Option<String>,
    /// Return the allocated units to their batches once the order is fully refunded.
    pub restock: bool,
    pub actor: Option<String>,
}

// =============================================================================
// Row Writers
// =============================================================================

pub(crate) async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO orders
            (id, order_number, customer_id, market_event_id, status, subtotal_cents, discount_cents,
             tax_cents, total_cents, notes, source, external_reference, paid_at, cancelled_at,
             created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&order.id)
    .bind(&order.order_number)
    .bind(&order.customer_id)
    .bind(&order.market_event_id)
    .bind(order.status)
    .bind(order.subtotal_cents)
    .bind(order.discount_cents)
    .bind(order.tax_cents)
    .bind(order.total_cents)
    .bind(&order.notes)
    .bind(order.source)
    .bind(&order.external_reference)
    .bind(order.paid_at)
    .bind(order.cancelled_at)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn insert_item(conn: &mut SqliteConnection, item: &OrderItem) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO order_items
            (id, order_id, product_id, sku_snapshot, name_snapshot, quantity, unit_price_cents,
             cost_price_cents, line_total_cents, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&item.id)
    .bind(&item.order_id)
    .bind(&item.product_id)
    .bind(&item.sku_snapshot)
    .bind(&item.name_snapshot)
    .bind(item.quantity)
    .bind(item.unit_price_cents)
    .bind(item.cost_price_cents)
    .bind(item.line_total_cents)
    .bind(item.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Takes the allocated units from their batches and records where they went.
///
/// A batch that no longer holds the planned units (a concurrent sale got
/// there first) turns into `InsufficientStock`.
pub(crate) async fn apply_allocations(
    conn: &mut SqliteConnection,
    order_id: &str,
    item: &OrderItem,
    allocations: &[Allocation],
    reason: MovementReason,
) -> DbResult<()> {
    for allocation in allocations {
        if let Err(err) = take_from_batch(conn, allocation).await {
            return Err(match err {
                DbError::Conflict(_) => {
                    let available: i64 = sqlx::query_scalar(
                        "SELECT COALESCE(SUM(quantity), 0) FROM product_batches
                         WHERE product_id = ?",
                    )
                    .bind(&item.product_id)
                    .fetch_one(&mut *conn)
                    .await?;
                    CoreError::InsufficientStock {
                        sku: item.sku_snapshot.clone(),
                        available,
                        requested: item.quantity,
                    }
                    .into()
                }
                other => other,
            });
        }

        sqlx::query(
            "INSERT INTO order_item_batches (id, order_item_id, batch_id, quantity)
             VALUES (?, ?, ?, ?)",
        )
        .bind(generate_id())
        .bind(&item.id)
        .bind(&allocation.batch_id)
        .bind(allocation.quantity)
        .execute(&mut *conn)
        .await?;

        record_movement(
            conn,
            MovementEntry {
                product_id: &item.product_id,
                batch_id: Some(&allocation.batch_id),
                movement_type: MovementType::Out,
                quantity: allocation.quantity,
                reason,
                reference_id: Some(order_id),
                notes: None,
            },
        )
        .await?;
    }
    Ok(())
}

pub(crate) async fn insert_payment(conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO payments
            (id, order_id, method, status, amount_cents, provider_reference, checkout_url,
             created_at, completed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&payment.id)
    .bind(&payment.order_id)
    .bind(payment.method)
    .bind(payment.status)
    .bind(payment.amount_cents)
    .bind(&payment.provider_reference)
    .bind(&payment.checkout_url)
    .bind(payment.created_at)
    .bind(payment.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| match DbError::from(e) {
        DbError::UniqueViolation { .. } => DbError::duplicate(
            "provider_reference",
            payment.provider_reference.clone().unwrap_or_default(),
        ),
        other => other,
    })?;
    Ok(())
}

// =============================================================================
// Row Loaders
// =============================================================================

async fn fetch_order(conn: &mut SqliteConnection, id: &str) -> DbResult<Order> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?");
    sqlx::query_as::<_, Order>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Order", id))
}

async fn fetch_payments(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<Payment>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = ? ORDER BY created_at, id"
    );
    let payments = sqlx::query_as::<_, Payment>(&sql)
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(payments)
}

async fn fetch_refunds(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<Refund>> {
    let refunds = sqlx::query_as::<_, Refund>(
        "SELECT id, order_id, amount_cents, reason, restocked, created_at
         FROM refunds WHERE order_id = ? ORDER BY created_at, id",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(refunds)
}

async fn fetch_ledger(conn: &mut SqliteConnection, order_id: &str) -> DbResult<RefundLedger> {
    let payments = fetch_payments(conn, order_id).await?;
    let refunds = fetch_refunds(conn, order_id).await?;
    Ok(RefundLedger::from_records(&payments, &refunds))
}

/// Moves an order to a new status and writes the history row.
async fn set_status(
    conn: &mut SqliteConnection,
    order: &Order,
    next: OrderStatus,
    note: Option<&str>,
    actor: Option<&str>,
) -> DbResult<()> {
    let now = now();
    let paid_at = if next == OrderStatus::Paid { Some(now) } else { order.paid_at };
    let cancelled_at = if next == OrderStatus::Cancelled { Some(now) } else { order.cancelled_at };

    // Guarded on the status we read so a concurrent transition loses cleanly.
    let result = sqlx::query(
        "UPDATE orders SET status = ?, paid_at = ?, cancelled_at = ?, updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(next)
    .bind(paid_at)
    .bind(cancelled_at)
    .bind(now)
    .bind(&order.id)
    .bind(order.status)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::conflict(format!("order {} changed while updating", order.id)));
    }

    record_status_change(conn, &order.id, Some(order.status), next, note, actor).await
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for orders and their payment lifecycle.
///
/// ## Usage
/// ```rust,ignore
/// let detail = db.orders().create_order(&new_order, Some(user_id)).await?;
/// let outcome = db.orders()
///     .pay_order(&detail.order.id, &PaymentRequest::new(PaymentMethod::Cash))
///     .await?;
/// assert!(outcome.order_became_paid);
/// ```
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Creates a pending order and takes its stock from batches, FIFO by expiry.
    ///
    /// ## Errors
    /// - `Validation`: no items, bad quantity, negative price or discount
    /// - `NotFound`: unknown product, customer or market event
    /// - `ProductInactive`: product has been deactivated
    /// - `InsufficientStock`: batches can't cover a line
    /// - `DiscountExceedsSubtotal`
    pub async fn create_order(
        &self,
        input: &NewOrder,
        actor: Option<&str>,
    ) -> DbResult<OrderDetail> {
        input.validate()?;
        let lines = merge_duplicate_items(&input.items);

        let mut tx = begin_write(&self.pool).await?;

        if let Some(customer_id) = &input.customer_id {
            let exists: Option<String> = sqlx::query_scalar("SELECT id FROM customers WHERE id = ?")
                .bind(customer_id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(DbError::not_found("Customer", customer_id));
            }
        }
        if let Some(event_id) = &input.market_event_id {
            let exists: Option<String> =
                sqlx::query_scalar("SELECT id FROM market_events WHERE id = ?")
                    .bind(event_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if exists.is_none() {
                return Err(DbError::not_found("Market event", event_id));
            }
        }

        // Plan every line first. Lines for the same product at different
        // prices draw from the same batches, so plans reduce a shared copy.
        let mut stock: HashMap<String, Vec<BatchStock>> = HashMap::new();
        let mut planned = Vec::with_capacity(lines.len());
        let mut priced = Vec::with_capacity(lines.len());

        for line in &lines {
            let product = fetch_product(&mut tx, &line.product_id).await?;
            if !product.is_active {
                return Err(CoreError::ProductInactive(product.sku).into());
            }

            if !stock.contains_key(&product.id) {
                let batches = fetch_stocked_batches(&mut tx, &product.id).await?;
                stock.insert(product.id.clone(), batches);
            }
            let batches = stock.get_mut(&product.id).ok_or_else(|| {
                DbError::Internal(format!("batch cache missing product {}", product.id))
            })?;

            let allocations = plan_depletion(&product.sku, batches, line.quantity)?;
            let unit_cost = allocated_unit_cost(&allocations, batches, product.cost());
            for allocation in &allocations {
                let batch = batches.iter_mut().find(|b| b.batch_id == allocation.batch_id);
                if let Some(batch) = batch {
                    batch.quantity -= allocation.quantity;
                }
            }

            let unit_price = line
                .unit_price_cents
                .map(Money::from_cents)
                .unwrap_or_else(|| product.price());
            priced.push(PricedLine {
                quantity: line.quantity,
                unit_price,
            });
            planned.push((product, line.quantity, unit_price, unit_cost, allocations));
        }

        let vat_rate = default_vat_rate(&mut tx).await?;
        let discount = Money::from_cents(input.discount_cents);
        let totals = OrderTotals::compute(&priced, discount, vat_rate)?;

        let now = now();
        let order = Order {
            id: generate_id(),
            order_number: generate_order_number(now),
            customer_id: input.customer_id.clone(),
            market_event_id: input.market_event_id.clone(),
            status: OrderStatus::Pending,
            subtotal_cents: totals.subtotal_cents,
            discount_cents: totals.discount_cents,
            tax_cents: totals.tax_cents,
            total_cents: totals.total_cents,
            notes: input.notes.clone(),
            source: OrderSource::Pos,
            external_reference: None,
            paid_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        insert_order(&mut tx, &order).await?;

        for (product, quantity, unit_price, unit_cost, allocations) in &planned {
            let item = OrderItem {
                id: generate_id(),
                order_id: order.id.clone(),
                product_id: product.id.clone(),
                sku_snapshot: product.sku.clone(),
                name_snapshot: product.name.clone(),
                quantity: *quantity,
                unit_price_cents: unit_price.cents(),
                cost_price_cents: unit_cost.cents(),
                line_total_cents: unit_price.multiply_quantity(*quantity).cents(),
                created_at: now,
            };
            insert_item(&mut tx, &item).await?;
            apply_allocations(&mut tx, &order.id, &item, allocations, MovementReason::Sale).await?;
        }

        record_status_change(&mut tx, &order.id, None, OrderStatus::Pending, None, actor).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            lines = planned.len(),
            total_cents = order.total_cents,
            "Order created"
        );
        self.get_detail(&order.id).await
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Cancels a pending order and returns its stock to the same batches.
    ///
    /// Only possible before any payment completed. Pending provider
    /// payments are marked failed.
    pub async fn cancel_order(
        &self,
        id: &str,
        reason: Option<&str>,
        actor: Option<&str>,
    ) -> DbResult<OrderDetail> {
        let mut tx = begin_write(&self.pool).await?;
        let order = fetch_order(&mut tx, id).await?;
        order.status.ensure_transition(id, OrderStatus::Cancelled, "cancel")?;

        let ledger = fetch_ledger(&mut tx, id).await?;
        if ledger.total_paid().is_positive() {
            warn!(order_id = %id, "Cancel rejected: order has a completed payment");
            return Err(CoreError::InvalidOrderStatus {
                order_id: id.to_string(),
                current_status: "paid".to_string(),
                action: "cancel".to_string(),
            }
            .into());
        }

        let restored = restore_order_allocations(&mut tx, id, MovementReason::Cancellation).await?;

        sqlx::query("UPDATE payments SET status = ? WHERE order_id = ? AND status = ?")
            .bind(PaymentStatus::Failed)
            .bind(id)
            .bind(PaymentStatus::Pending)
            .execute(&mut *tx)
            .await?;

        set_status(&mut tx, &order, OrderStatus::Cancelled, reason, actor).await?;
        tx.commit().await?;

        info!(order_id = %id, units_restored = restored, "Order cancelled");
        self.get_detail(id).await
    }

    // =========================================================================
    // Pay
    // =========================================================================

    /// What is still owed on a pending order.
    pub async fn outstanding(&self, id: &str) -> DbResult<Money> {
        let mut conn = self.pool.acquire().await?;
        let order = fetch_order(&mut conn, id).await?;
        order.status.ensure_transition(id, OrderStatus::Paid, "pay")?;
        let ledger = fetch_ledger(&mut conn, id).await?;
        Ok(order.total() - ledger.total_paid())
    }

    /// Takes a payment for a pending order.
    ///
    /// Cash, card and EFT settle at once and mark the order paid. Provider
    /// methods store a pending payment with its checkout reference; the
    /// webhook completes it later.
    pub async fn pay_order(&self, id: &str, request: &PaymentRequest) -> DbResult<PaymentOutcome> {
        if let Some(amount) = request.amount_cents {
            validate_amount_cents("amount_cents", amount)?;
        }

        let mut tx = begin_write(&self.pool).await?;
        let order = fetch_order(&mut tx, id).await?;
        order.status.ensure_transition(id, OrderStatus::Paid, "pay")?;

        let ledger = fetch_ledger(&mut tx, id).await?;
        let outstanding = order.total() - ledger.total_paid();
        let amount = request
            .amount_cents
            .map(Money::from_cents)
            .unwrap_or(outstanding);
        if amount != outstanding {
            return Err(CoreError::InvalidPaymentAmount {
                reason: format!(
                    "amount {} does not match outstanding balance {}",
                    amount.cents(),
                    outstanding.cents()
                ),
            }
            .into());
        }

        let now = now();

        if outstanding.is_zero() {
            if request.method.requires_provider() {
                return Err(CoreError::InvalidPaymentAmount {
                    reason: "nothing to collect on a zero-total order".to_string(),
                }
                .into());
            }
            set_status(&mut tx, &order, OrderStatus::Paid, None, request.actor.as_deref()).await?;
            tx.commit().await?;
            info!(order_id = %id, "Zero-total order settled");
            return Ok(PaymentOutcome {
                order: self.get(id).await?,
                payment: None,
                order_became_paid: true,
            });
        }

        let settles = request.method.settles_immediately();
        if !settles && request.provider_reference.is_none() {
            return Err(ValidationError::required("provider_reference").into());
        }

        let payment = Payment {
            id: generate_id(),
            order_id: id.to_string(),
            method: request.method,
            status: if settles { PaymentStatus::Completed } else { PaymentStatus::Pending },
            amount_cents: amount.cents(),
            provider_reference: request.provider_reference.clone(),
            checkout_url: request.checkout_url.clone(),
            created_at: now,
            completed_at: if settles { Some(now) } else { None },
        };
        insert_payment(&mut tx, &payment).await?;

        if settles {
            // An abandoned checkout must not complete the order a second time.
            sqlx::query(
                "UPDATE payments SET status = ? WHERE order_id = ? AND status = ? AND id != ?",
            )
            .bind(PaymentStatus::Failed)
            .bind(id)
            .bind(PaymentStatus::Pending)
            .bind(&payment.id)
            .execute(&mut *tx)
            .await?;

            let note = format!("{} payment", payment.method);
            let actor = request.actor.as_deref();
            set_status(&mut tx, &order, OrderStatus::Paid, Some(&note), actor).await?;
        }
        tx.commit().await?;

        if settles {
            info!(
                order_id = %id,
                method = %payment.method,
                amount_cents = payment.amount_cents,
                "Order paid"
            );
        } else {
            info!(order_id = %id, method = %payment.method, "Awaiting provider payment");
        }

        Ok(PaymentOutcome {
            order: self.get(id).await?,
            payment: Some(payment),
            order_became_paid: settles,
        })
    }

    /// Applies a provider callback to the payment with `provider_reference`.
    ///
    /// ## Behaviour
    /// - pending + completed → payment completed, order paid
    /// - pending + failed → payment failed, order stays pending
    /// - already in the reported state → no change (retries are safe)
    /// - failed + completed → `Conflict` (the order was cancelled meanwhile)
    pub async fn complete_payment(
        &self,
        provider_reference: &str,
        status: PaymentStatus,
    ) -> DbResult<PaymentOutcome> {
        let mut tx = begin_write(&self.pool).await?;

        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider_reference = ?");
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(provider_reference)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Payment", provider_reference))?;
        let order = fetch_order(&mut tx, &payment.order_id).await?;

        let unchanged = |payment: Payment, order: Order| PaymentOutcome {
            order,
            payment: Some(payment),
            order_became_paid: false,
        };

        match (payment.status, status) {
            (_, PaymentStatus::Pending) => {
                debug!(reference = %provider_reference, "Provider reports payment still pending");
                Ok(unchanged(payment, order))
            }
            (current, reported) if current == reported => {
                debug!(
                    reference = %provider_reference,
                    status = %reported,
                    "Duplicate webhook ignored"
                );
                Ok(unchanged(payment, order))
            }
            (PaymentStatus::Completed, PaymentStatus::Failed) => {
                warn!(
                    reference = %provider_reference,
                    "Failure reported for a completed payment; ignored"
                );
                Ok(unchanged(payment, order))
            }
            (PaymentStatus::Failed, PaymentStatus::Completed) => Err(DbError::conflict(format!(
                "payment {provider_reference} was already marked failed"
            ))),
            (_, PaymentStatus::Failed) => {
                sqlx::query("UPDATE payments SET status = ? WHERE id = ?")
                    .bind(PaymentStatus::Failed)
                    .bind(&payment.id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;

                info!(
                    order_id = %order.id,
                    reference = %provider_reference,
                    "Provider payment failed"
                );
                let payment = Payment {
                    status: PaymentStatus::Failed,
                    ..payment
                };
                Ok(unchanged(payment, order))
            }
            (_, PaymentStatus::Completed) => {
                order
                    .status
                    .ensure_transition(&order.id, OrderStatus::Paid, "complete payment")?;

                let now = now();
                sqlx::query("UPDATE payments SET status = ?, completed_at = ? WHERE id = ?")
                    .bind(PaymentStatus::Completed)
                    .bind(now)
                    .bind(&payment.id)
                    .execute(&mut *tx)
                    .await?;

                let note = format!("{} payment confirmed", payment.method);
                set_status(&mut tx, &order, OrderStatus::Paid, Some(&note), None).await?;
                tx.commit().await?;

                info!(
                    order_id = %order.id,
                    reference = %provider_reference,
                    "Order paid via provider"
                );
                let payment = Payment {
                    status: PaymentStatus::Completed,
                    completed_at: Some(now),
                    ..payment
                };
                Ok(PaymentOutcome {
                    order: self.get(&payment.order_id).await?,
                    payment: Some(payment),
                    order_became_paid: true,
                })
            }
        }
    }

    /// Marks a pending provider payment failed; the order stays pending.
    pub async fn fail_payment(&self, provider_reference: &str) -> DbResult<PaymentOutcome> {
        self.complete_payment(provider_reference, PaymentStatus::Failed).await
    }

    // =========================================================================
    // Refund
    // =========================================================================

    /// Refunds part or all of a paid order.
    ///
    /// With `restock`, the refund that completes the order returns every
    /// allocated unit to its batch; partial refunds never restock.
    pub async fn refund_order(&self, id: &str, request: &RefundRequest) -> DbResult<OrderDetail> {
        let amount = Money::from_cents(request.amount_cents);

        let mut tx = begin_write(&self.pool).await?;
        let order = fetch_order(&mut tx, id).await?;
        if !matches!(order.status, OrderStatus::Paid | OrderStatus::PartiallyRefunded) {
            warn!(order_id = %id, status = %order.status, "Refund rejected");
            return Err(CoreError::InvalidOrderStatus {
                order_id: id.to_string(),
                current_status: order.status.as_str().to_string(),
                action: "refund".to_string(),
            }
            .into());
        }

        let ledger = fetch_ledger(&mut tx, id).await?;
        ledger.validate_refund(amount)?;
        let next = ledger.status_after_refund(amount);
        order.status.ensure_transition(id, next, "refund")?;

        let restock = request.restock && next == OrderStatus::Refunded;
        if restock {
            restore_order_allocations(&mut tx, id, MovementReason::Refund).await?;
        }

        sqlx::query(
            "INSERT INTO refunds (id, order_id, amount_cents, reason, restocked, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(generate_id())
        .bind(id)
        .bind(amount.cents())
        .bind(&request.reason)
        .bind(restock)
        .bind(now())
        .execute(&mut *tx)
        .await?;

        let (reason, actor) = (request.reason.as_deref(), request.actor.as_deref());
        set_status(&mut tx, &order, next, reason, actor).await?;
        tx.commit().await?;

        info!(
            order_id = %id,
            amount_cents = amount.cents(),
            status = %next,
            restocked = restock,
            "Order refunded"
        );
        self.get_detail(id).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, id: &str) -> DbResult<Order> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id).await
    }

    /// Order with items, allocations, payments, refunds, history and the
    /// actions the frontend may offer.
    pub async fn get_detail(&self, id: &str) -> DbResult<OrderDetail> {
        let mut conn = self.pool.acquire().await?;
        let order = fetch_order(&mut conn, id).await?;

        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ? ORDER BY created_at, id"
        );
        let items = sqlx::query_as::<_, OrderItem>(&sql)
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;

        let allocations = sqlx::query_as::<_, OrderItemBatch>(
            "SELECT oib.id, oib.order_item_id, oib.batch_id, oib.quantity
             FROM order_item_batches oib
             JOIN order_items oi ON oi.id = oib.order_item_id
             WHERE oi.order_id = ?
             ORDER BY oi.created_at, oib.id",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        let payments = fetch_payments(&mut conn, id).await?;
        let refunds = fetch_refunds(&mut conn, id).await?;

        let history = sqlx::query_as::<_, OrderStatusChange>(
            "SELECT id, order_id, from_status, to_status, note, changed_by, created_at
             FROM order_status_history WHERE order_id = ? ORDER BY created_at, rowid",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        let ledger = RefundLedger::from_records(&payments, &refunds);
        let actions = OrderActions::for_order(order.status, &ledger);

        Ok(OrderDetail {
            order,
            items,
            allocations,
            payments,
            refunds,
            history,
            ledger,
            actions,
        })
    }

    /// Lists orders, newest first.
    pub async fn list(&self, filter: &OrderFilter) -> DbResult<Vec<Order>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ORDER_COLUMNS} FROM orders WHERE 1 = 1"));

        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(customer_id) = &filter.customer_id {
            query.push(" AND customer_id = ").push_bind(customer_id.clone());
        }
        if let Some(event_id) = &filter.market_event_id {
            query.push(" AND market_event_id = ").push_bind(event_id.clone());
        }
        if let Some(from) = filter.from {
            query.push(" AND substr(created_at, 1, 10) >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(" AND substr(created_at, 1, 10) <= ").push_bind(to);
        }

        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let offset = filter.offset.unwrap_or(0).max(0);
        query
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let orders = query.build_query_as::<Order>().fetch_all(&self.pool).await?;

        debug!(count = orders.len(), "Listed orders");
        Ok(orders)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{batch, product, test_db};
    use crate::{Database, DbConfig};
    use harvest_core::{NewCustomer, NewOrderItem};

    fn order_of(items: Vec<(&str, i64)>) -> NewOrder {
        NewOrder {
            items: items
                .into_iter()
                .map(|(product_id, quantity)| NewOrderItem {
                    product_id: product_id.to_string(),
                    quantity,
                    unit_price_cents: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    async fn batch_quantity(db: &Database, id: &str) -> i64 {
        db.batches().get(id).await.unwrap().quantity
    }

    #[tokio::test]
    async fn test_create_order_depletes_fifo_by_expiry() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        let id = honey.product.id.as_str();
        let late = batch(&db, id, 10, Some("2024-09-01")).await;
        let early = batch(&db, id, 3, Some("2024-05-01")).await;
        let undated = batch(&db, id, 10, None).await;

        let detail = db.orders().create_order(&order_of(vec![(id, 5)]), None).await.unwrap();

        assert_eq!(detail.order.status, OrderStatus::Pending);
        assert_eq!(detail.order.total_cents, 42500);
        assert_eq!(detail.items.len(), 1);
        assert_eq!(detail.allocations.len(), 2);
        assert_eq!(batch_quantity(&db, &early.id).await, 0);
        assert_eq!(batch_quantity(&db, &late.id).await, 8);
        assert_eq!(batch_quantity(&db, &undated.id).await, 10);
        assert_eq!(detail.history.len(), 1);
        assert!(detail.actions.can_pay);
        assert!(detail.actions.can_cancel);
        assert!(detail.order.order_number.starts_with("ORD-"));
    }

    #[tokio::test]
    async fn test_create_order_merges_duplicate_lines() {
        let db = test_db().await;
        let jam = product(&db, "JAM-250", 4500).await;
        batch(&db, &jam.product.id, 10, None).await;

        let id = jam.product.id.as_str();
        let detail = db
            .orders()
            .create_order(&order_of(vec![(id, 2), (id, 3)]), None)
            .await
            .unwrap();

        assert_eq!(detail.items.len(), 1);
        assert_eq!(detail.items[0].quantity, 5);
    }

    #[tokio::test]
    async fn test_create_order_rejects_empty_items() {
        let db = test_db().await;
        let err = db.orders().create_order(&NewOrder::default(), None).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::Validation(ValidationError::Required { .. }))
        ));
    }

    #[tokio::test]
    async fn test_create_order_rejects_zero_quantity() {
        let db = test_db().await;
        let jam = product(&db, "JAM-250", 4500).await;
        let err = db
            .orders()
            .create_order(&order_of(vec![(&jam.product.id, 0)]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_insufficient_stock_writes_nothing() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        let jam = product(&db, "JAM-250", 4500).await;
        let honey_batch = batch(&db, &honey.product.id, 10, None).await;
        batch(&db, &jam.product.id, 1, None).await;

        let err = db
            .orders()
            .create_order(&order_of(vec![(&honey.product.id, 2), (&jam.product.id, 2)]), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::Core(CoreError::InsufficientStock { available: 1, requested: 2, .. })
        ));
        assert_eq!(batch_quantity(&db, &honey_batch.id).await, 10);
        assert!(db.orders().list(&OrderFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_order_unknown_product_and_inactive() {
        let db = test_db().await;
        let err = db
            .orders()
            .create_order(&order_of(vec![("no-such-product", 1)]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));

        let jam = product(&db, "JAM-250", 4500).await;
        batch(&db, &jam.product.id, 5, None).await;
        db.products().deactivate(&jam.product.id).await.unwrap();
        let err = db
            .orders()
            .create_order(&order_of(vec![(&jam.product.id, 1)]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::ProductInactive(_))));
    }

    #[tokio::test]
    async fn test_cancel_restores_exact_batches() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        let early = batch(&db, &honey.product.id, 2, Some("2024-05-01")).await;
        let late = batch(&db, &honey.product.id, 10, Some("2024-09-01")).await;

        let detail = db
            .orders()
            .create_order(&order_of(vec![(&honey.product.id, 4)]), None)
            .await
            .unwrap();
        let cancelled = db
            .orders()
            .cancel_order(&detail.order.id, Some("customer left"), None)
            .await
            .unwrap();

        assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
        assert!(cancelled.order.cancelled_at.is_some());
        assert_eq!(batch_quantity(&db, &early.id).await, 2);
        assert_eq!(batch_quantity(&db, &late.id).await, 10);

        let err = db.orders().cancel_order(&detail.order.id, None, None).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvalidOrderStatus { .. })));
    }

    #[tokio::test]
    async fn test_cash_payment_marks_paid_and_blocks_cancel() {
        let db = test_db().await;
        let jam = product(&db, "JAM-250", 4500).await;
        batch(&db, &jam.product.id, 5, None).await;
        let detail = db
            .orders()
            .create_order(&order_of(vec![(&jam.product.id, 2)]), None)
            .await
            .unwrap();

        let outcome = db
            .orders()
            .pay_order(&detail.order.id, &PaymentRequest::new(PaymentMethod::Cash))
            .await
            .unwrap();

        assert!(outcome.order_became_paid);
        assert_eq!(outcome.order.status, OrderStatus::Paid);
        assert!(outcome.order.paid_at.is_some());
        assert_eq!(outcome.payment.unwrap().amount_cents, 9000);

        let err = db.orders().cancel_order(&detail.order.id, None, None).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvalidOrderStatus { .. })));

        let err = db
            .orders()
            .pay_order(&detail.order.id, &PaymentRequest::new(PaymentMethod::Cash))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvalidOrderStatus { .. })));
    }

    #[tokio::test]
    async fn test_payment_amount_must_match_balance() {
        let db = test_db().await;
        let jam = product(&db, "JAM-250", 4500).await;
        batch(&db, &jam.product.id, 5, None).await;
        let detail = db
            .orders()
            .create_order(&order_of(vec![(&jam.product.id, 1)]), None)
            .await
            .unwrap();

        let mut request = PaymentRequest::new(PaymentMethod::Card);
        request.amount_cents = Some(100);
        let err = db.orders().pay_order(&detail.order.id, &request).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvalidPaymentAmount { .. })));

        let err = db
            .orders()
            .pay_order("no-such-order", &PaymentRequest::new(PaymentMethod::Cash))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_provider_payment_completed_by_webhook() {
        let db = test_db().await;
        let jam = product(&db, "JAM-250", 4500).await;
        batch(&db, &jam.product.id, 5, None).await;
        let detail = db
            .orders()
            .create_order(&order_of(vec![(&jam.product.id, 1)]), None)
            .await
            .unwrap();

        let mut request = PaymentRequest::new(PaymentMethod::Yoco);
        request.provider_reference = Some("ch_123".into());
        request.checkout_url = Some("https://pay.example/ch_123".into());
        let pending = db.orders().pay_order(&detail.order.id, &request).await.unwrap();
        assert!(!pending.order_became_paid);
        assert_eq!(pending.order.status, OrderStatus::Pending);

        let done = db
            .orders()
            .complete_payment("ch_123", PaymentStatus::Completed)
            .await
            .unwrap();
        assert!(done.order_became_paid);
        assert_eq!(done.order.status, OrderStatus::Paid);

        let again = db
            .orders()
            .complete_payment("ch_123", PaymentStatus::Completed)
            .await
            .unwrap();
        assert!(!again.order_became_paid);

        let err = db
            .orders()
            .complete_payment("ch_unknown", PaymentStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_provider_payment_requires_reference() {
        let db = test_db().await;
        let jam = product(&db, "JAM-250", 4500).await;
        batch(&db, &jam.product.id, 5, None).await;
        let detail = db
            .orders()
            .create_order(&order_of(vec![(&jam.product.id, 1)]), None)
            .await
            .unwrap();

        let err = db
            .orders()
            .pay_order(&detail.order.id, &PaymentRequest::new(PaymentMethod::PaymentLink))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_failed_webhook_leaves_order_pending() {
        let db = test_db().await;
        let jam = product(&db, "JAM-250", 4500).await;
        batch(&db, &jam.product.id, 5, None).await;
        let detail = db
            .orders()
            .create_order(&order_of(vec![(&jam.product.id, 1)]), None)
            .await
            .unwrap();

        let mut request = PaymentRequest::new(PaymentMethod::Yoco);
        request.provider_reference = Some("ch_fail".into());
        db.orders().pay_order(&detail.order.id, &request).await.unwrap();

        let outcome = db.orders().fail_payment("ch_fail").await.unwrap();
        assert_eq!(outcome.order.status, OrderStatus::Pending);
        assert_eq!(outcome.payment.unwrap().status, PaymentStatus::Failed);

        // Cancellable again since nothing was collected.
        db.orders().cancel_order(&detail.order.id, None, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_refunds_against_balance() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        let b = batch(&db, &honey.product.id, 10, None).await;
        let detail = db
            .orders()
            .create_order(&order_of(vec![(&honey.product.id, 2)]), None)
            .await
            .unwrap();
        let order_id = detail.order.id.clone();

        let refund = |amount_cents, restock| RefundRequest {
            amount_cents,
            reason: Some("damaged jar".into()),
            restock,
            actor: None,
        };

        // Not paid yet.
        let err = db.orders().refund_order(&order_id, &refund(1000, false)).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvalidOrderStatus { .. })));

        db.orders()
            .pay_order(&order_id, &PaymentRequest::new(PaymentMethod::Cash))
            .await
            .unwrap();

        let partial = db.orders().refund_order(&order_id, &refund(5000, true)).await.unwrap();
        assert_eq!(partial.order.status, OrderStatus::PartiallyRefunded);
        assert_eq!(partial.ledger.refundable().cents(), 12000);
        assert_eq!(batch_quantity(&db, &b.id).await, 8);

        let err = db.orders().refund_order(&order_id, &refund(12001, true)).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::RefundExceedsBalance { refundable: 12000, .. })
        ));

        let full = db.orders().refund_order(&order_id, &refund(12000, true)).await.unwrap();
        assert_eq!(full.order.status, OrderStatus::Refunded);
        assert!(full.refunds.iter().any(|r| r.restocked));
        assert_eq!(batch_quantity(&db, &b.id).await, 10);
        assert!(!full.actions.can_refund);

        let err = db.orders().refund_order(&order_id, &refund(1, false)).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvalidOrderStatus { .. })));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let db = test_db().await;
        let jam = product(&db, "JAM-250", 4500).await;
        batch(&db, &jam.product.id, 10, None).await;
        let customer = db
            .customers()
            .create(&NewCustomer {
                name: "Thandi".into(),
                email: None,
                phone: None,
                notes: None,
                marketing_opt_in: false,
            })
            .await
            .unwrap();

        let mut with_customer = order_of(vec![(&jam.product.id, 1)]);
        with_customer.customer_id = Some(customer.id.clone());
        db.orders().create_order(&with_customer, None).await.unwrap();
        let other = db
            .orders()
            .create_order(&order_of(vec![(&jam.product.id, 1)]), None)
            .await
            .unwrap();
        db.orders()
            .pay_order(&other.order.id, &PaymentRequest::new(PaymentMethod::Eft))
            .await
            .unwrap();

        let all = db.orders().list(&OrderFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let paid = db
            .orders()
            .list(&OrderFilter {
                status: Some(OrderStatus::Paid),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].id, other.order.id);

        let for_customer = db
            .orders()
            .list(&OrderFilter {
                customer_id: Some(customer.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(for_customer.len(), 1);

        let mut unknown_customer = order_of(vec![(&jam.product.id, 1)]);
        unknown_customer.customer_id = Some("nobody".into());
        let err = db.orders().create_order(&unknown_customer, None).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancel_merges_price_lines_into_one_restock() {
        let db = test_db().await;
        let honey = product(&db, "HONEY-500", 8500).await;
        let only = batch(&db, &honey.product.id, 10, None).await;
        let line = |quantity, price| NewOrderItem {
            product_id: honey.product.id.clone(),
            quantity,
            unit_price_cents: Some(price),
        };
        let order = NewOrder {
            items: vec![line(2, 8500), line(3, 7000)],
            ..Default::default()
        };

        let detail = db.orders().create_order(&order, None).await.unwrap();
        assert_eq!(detail.items.len(), 2);
        assert_eq!(batch_quantity(&db, &only.id).await, 5);

        db.orders().cancel_order(&detail.order.id, None, None).await.unwrap();

        assert_eq!(batch_quantity(&db, &only.id).await, 10);
        let restocks: Vec<_> = db
            .batches()
            .movements(&honey.product.id, 50)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.reason == MovementReason::Cancellation)
            .collect();
        assert_eq!(restocks.len(), 1);
        assert_eq!(restocks[0].quantity, 5);
        assert_eq!(restocks[0].batch_id.as_deref(), Some(only.id.as_str()));
    }

    async fn file_db(dir: &tempfile::TempDir) -> Database {
        Database::new(DbConfig::new(dir.path().join("harvest.db")).max_connections(8))
            .await
            .unwrap()
    }

    /// Fires `sales` single-unit orders at once and sorts the outcomes.
    async fn race_sales(db: &Database, product_id: &str, sales: usize) -> (usize, usize) {
        let handles: Vec<_> = (0..sales)
            .map(|_| {
                let orders = db.orders();
                let order = order_of(vec![(product_id, 1)]);
                tokio::spawn(async move { orders.create_order(&order, None).await })
            })
            .collect();

        let (mut sold, mut short) = (0, 0);
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => sold += 1,
                Err(DbError::Core(CoreError::InsufficientStock { .. })) => short += 1,
                Err(other) => panic!("unexpected error under contention: {other:?}"),
            }
        }
        (sold, short)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sales_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir).await;
        let jam = product(&db, "JAM-250", 4500).await;
        let last = batch(&db, &jam.product.id, 3, None).await;

        let (sold, short) = race_sales(&db, &jam.product.id, 8).await;

        assert_eq!(sold, 3);
        assert_eq!(short, 5);
        assert_eq!(batch_quantity(&db, &last.id).await, 0);
        db.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sales_with_ample_stock_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir).await;
        let honey = product(&db, "HONEY-500", 8500).await;
        let stocked = batch(&db, &honey.product.id, 100, None).await;

        let (sold, short) = race_sales(&db, &honey.product.id, 8).await;

        assert_eq!((sold, short), (8, 0));
        assert_eq!(batch_quantity(&db, &stocked.id).await, 92);
        db.close().await;
    }
}
