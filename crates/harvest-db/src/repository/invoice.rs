//! # Invoice Repository
//!
//! One invoice per paid order, numbered from the default business profile.
//!
//! ## Numbering
//! ```text
//! BEGIN
//!   SELECT default profile            prefix "INV", next_invoice_number 42
//!   INSERT invoices (INV-000042, …)   UNIQUE(order_id) rejects a second invoice
//!   UPDATE profile SET next = 43
//! COMMIT
//! ```
//!
//! Without any profile, numbers continue from the invoice count under the
//! `INV` prefix and the default VAT rate applies.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use super::order::ORDER_COLUMNS;
use super::settings::fetch_default;
use super::{begin_write, generate_id, now};
use crate::error::{DbError, DbResult};
use harvest_core::invoice::{format_invoice_number, InvoiceTotals};
use harvest_core::{
    BusinessSettings, CoreError, Customer, Invoice, InvoiceDetail, InvoiceStatus, Order, OrderItem,
    TaxRate,
};

const INVOICE_COLUMNS: &str = "id, invoice_number, order_id, customer_id, business_profile_id, \
     subtotal_cents, tax_cents, total_cents, status, sent_to, sent_at, created_at";

const FALLBACK_PREFIX: &str = "INV";

async fn fetch_invoice(conn: &mut SqliteConnection, id: &str) -> DbResult<Invoice> {
    let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?");
    sqlx::query_as::<_, Invoice>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Invoice", id))
}

async fn fetch_invoice_for_order(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> DbResult<Option<Invoice>> {
    let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE order_id = ?");
    let invoice = sqlx::query_as::<_, Invoice>(&sql)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(invoice)
}

#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    /// Issues the invoice for a paid order.
    ///
    /// ## Errors
    /// - `NotFound`: unknown order
    /// - `InvalidOrderStatus`: order was never paid
    /// - `UniqueViolation`: the order already has an invoice
    pub async fn generate(&self, order_id: &str) -> DbResult<InvoiceDetail> {
        let mut tx = begin_write(&self.pool).await?;

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))?;

        if !order.status.is_paid() {
            warn!(order_id = %order_id, status = %order.status, "Invoice rejected: order not paid");
            return Err(CoreError::InvalidOrderStatus {
                order_id: order_id.to_string(),
                current_status: order.status.as_str().to_string(),
                action: "invoice".to_string(),
            }
            .into());
        }

        let profile = fetch_default(&mut tx).await?;
        let (prefix, number, vat_rate) = match &profile {
            Some(p) => (p.invoice_prefix.clone(), p.next_invoice_number, p.vat_rate()),
            None => {
                let issued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices")
                    .fetch_one(&mut *tx)
                    .await?;
                (FALLBACK_PREFIX.to_string(), issued + 1, TaxRate::default())
            }
        };

        let totals = InvoiceTotals::from_order(&order, vat_rate);
        let id = generate_id();
        let invoice_number = format_invoice_number(&prefix, number);

        sqlx::query(
            "INSERT INTO invoices
                (id, invoice_number, order_id, customer_id, business_profile_id, subtotal_cents,
                 tax_cents, total_cents, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&invoice_number)
        .bind(order_id)
        .bind(&order.customer_id)
        .bind(profile.as_ref().map(|p| p.id.as_str()))
        .bind(totals.subtotal_cents)
        .bind(totals.tax_cents)
        .bind(totals.total_cents)
        .bind(InvoiceStatus::Issued)
        .bind(now())
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } if field.contains("order_id") => {
                DbError::duplicate("order_id", order_id)
            }
            DbError::UniqueViolation { .. } => {
                DbError::duplicate("invoice_number", invoice_number.as_str())
            }
            other => other,
        })?;

        if let Some(p) = &profile {
            sqlx::query(
                "UPDATE business_settings SET next_invoice_number = next_invoice_number + 1
                 WHERE id = ?",
            )
            .bind(&p.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            invoice_id = %id,
            invoice_number = %invoice_number,
            order_id = %order_id,
            "Invoice issued"
        );
        self.detail(&id).await
    }

    /// The order's invoice, issuing it first if there is none yet.
    pub async fn ensure_for_order(&self, order_id: &str) -> DbResult<InvoiceDetail> {
        let existing = {
            let mut conn = self.pool.acquire().await?;
            fetch_invoice_for_order(&mut conn, order_id).await?
        };
        match existing {
            Some(invoice) => self.detail(&invoice.id).await,
            None => self.generate(order_id).await,
        }
    }

    pub async fn get(&self, id: &str) -> DbResult<Invoice> {
        let mut conn = self.pool.acquire().await?;
        fetch_invoice(&mut conn, id).await
    }

    /// Invoice with its order lines, customer and issuing profile.
    pub async fn detail(&self, id: &str) -> DbResult<InvoiceDetail> {
        let mut conn = self.pool.acquire().await?;
        let invoice = fetch_invoice(&mut conn, id).await?;

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(&invoice.order_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("Order", &invoice.order_id))?;

        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT id, order_id, product_id, sku_snapshot, name_snapshot, quantity,
                    unit_price_cents, cost_price_cents, line_total_cents, created_at
             FROM order_items WHERE order_id = ? ORDER BY created_at, id",
        )
        .bind(&order.id)
        .fetch_all(&mut *conn)
        .await?;

        let customer = match &invoice.customer_id {
            Some(customer_id) => {
                sqlx::query_as::<_, Customer>(
                    "SELECT id, name, email, phone, notes, marketing_opt_in, created_at, updated_at
                     FROM customers WHERE id = ?",
                )
                .bind(customer_id)
                .fetch_optional(&mut *conn)
                .await?
            }
            None => None,
        };

        let business = match &invoice.business_profile_id {
            Some(profile_id) => {
                let sql = format!(
                    "SELECT {} FROM business_settings WHERE id = ?",
                    super::settings::SETTINGS_COLUMNS
                );
                sqlx::query_as::<_, BusinessSettings>(&sql)
                    .bind(profile_id)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            None => fetch_default(&mut conn).await?,
        };

        Ok(InvoiceDetail {
            invoice,
            order,
            items,
            customer,
            business,
        })
    }

    /// Lists invoices, newest first.
    pub async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<Invoice>> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY created_at DESC, id LIMIT ? OFFSET ?"
        );
        let invoices = sqlx::query_as::<_, Invoice>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = invoices.len(), "Listed invoices");
        Ok(invoices)
    }

    /// Records that the invoice was emailed to `to`.
    pub async fn mark_sent(&self, id: &str, to: &str) -> DbResult<Invoice> {
        let result = sqlx::query(
            "UPDATE invoices SET status = ?, sent_to = ?, sent_at = ?
             WHERE id = ? AND status != 'void'",
        )
        .bind(InvoiceStatus::Sent)
        .bind(to)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let invoice = self.get(id).await?;
            return Err(DbError::conflict(format!(
                "invoice {} is void and cannot be sent",
                invoice.invoice_number
            )));
        }

        info!(invoice_id = %id, "Invoice marked sent");
        self.get(id).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::order::PaymentRequest;
    use crate::repository::test_support::{batch, product, test_db};
    use crate::Database;
    use harvest_core::{NewBusinessSettings, NewOrder, NewOrderItem, PaymentMethod};

    async fn paid_order(db: &Database) -> String {
        let jam = product(db, "JAM-250", 11500).await;
        batch(db, &jam.product.id, 5, None).await;
        let detail = db
            .orders()
            .create_order(
                &NewOrder {
                    items: vec![NewOrderItem {
                        product_id: jam.product.id.clone(),
                        quantity: 1,
                        unit_price_cents: None,
                    }],
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        db.orders()
            .pay_order(&detail.order.id, &PaymentRequest::new(PaymentMethod::Cash))
            .await
            .unwrap();
        detail.order.id
    }

    fn profile(prefix: &str) -> NewBusinessSettings {
        NewBusinessSettings {
            profile_name: "Main".into(),
            business_name: "Fynbos Honey Co".into(),
            email: None,
            phone: None,
            address: None,
            vat_number: None,
            vat_rate_bps: None,
            currency: None,
            invoice_prefix: Some(prefix.into()),
            auto_send_invoice: false,
            is_default: true,
        }
    }

    #[tokio::test]
    async fn test_generate_uses_profile_counter() {
        let db = test_db().await;
        let settings = db.settings().create(&profile("FH")).await.unwrap();
        let order_id = paid_order(&db).await;

        let detail = db.invoices().generate(&order_id).await.unwrap();

        assert_eq!(detail.invoice.invoice_number, "FH-000001");
        assert_eq!(detail.invoice.total_cents, 11500);
        assert_eq!(detail.invoice.tax_cents, 1500);
        assert_eq!(detail.invoice.subtotal_cents, 10000);
        assert_eq!(detail.items.len(), 1);
        assert_eq!(detail.business.unwrap().id, settings.id);
        assert_eq!(db.settings().get(&settings.id).await.unwrap().next_invoice_number, 2);
    }

    #[tokio::test]
    async fn test_second_invoice_for_order_rejected() {
        let db = test_db().await;
        let order_id = paid_order(&db).await;

        let first = db.invoices().generate(&order_id).await.unwrap();
        assert_eq!(first.invoice.invoice_number, "INV-000001");

        let err = db.invoices().generate(&order_id).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        let again = db.invoices().ensure_for_order(&order_id).await.unwrap();
        assert_eq!(again.invoice.id, first.invoice.id);
    }

    #[tokio::test]
    async fn test_unpaid_order_not_invoiced() {
        let db = test_db().await;
        let jam = product(&db, "JAM-250", 4500).await;
        batch(&db, &jam.product.id, 5, None).await;
        let detail = db
            .orders()
            .create_order(
                &NewOrder {
                    items: vec![NewOrderItem {
                        product_id: jam.product.id.clone(),
                        quantity: 1,
                        unit_price_cents: None,
                    }],
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        let err = db.invoices().generate(&detail.order.id).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::InvalidOrderStatus { .. })));

        let err = db.invoices().generate("missing").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_mark_sent() {
        let db = test_db().await;
        let order_id = paid_order(&db).await;
        let detail = db.invoices().generate(&order_id).await.unwrap();

        let sent = db
            .invoices()
            .mark_sent(&detail.invoice.id, "thandi@example.co.za")
            .await
            .unwrap();
        assert_eq!(sent.status, InvoiceStatus::Sent);
        assert_eq!(sent.sent_to.as_deref(), Some("thandi@example.co.za"));
        assert!(sent.sent_at.is_some());
        assert_eq!(db.invoices().list(50, 0).await.unwrap().len(), 1);
    }
}
