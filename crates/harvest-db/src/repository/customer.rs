//! # Customer Repository
//!
//! Customers and their purchase history.

use sqlx::SqlitePool;
use tracing::{debug, info};

use super::{generate_id, now};
use crate::error::{DbError, DbResult};
use crate::repository::order::ORDER_COLUMNS;
use harvest_core::validation::validate_search_query;
use harvest_core::{Customer, CustomerDetail, CustomerSummary, NewCustomer, Order};

const CUSTOMER_COLUMNS: &str =
    "id, name, email, phone, notes, marketing_opt_in, created_at, updated_at";

/// Orders shown on the customer screen.
const RECENT_ORDER_LIMIT: i64 = 20;

fn normalize_email(email: Option<&str>) -> Option<String> {
    email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
}

#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    pub async fn create(&self, input: &NewCustomer) -> DbResult<Customer> {
        input.validate()?;

        let id = generate_id();
        let now = now();

        sqlx::query(
            "INSERT INTO customers
                (id, name, email, phone, notes, marketing_opt_in, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(input.name.trim())
        .bind(normalize_email(input.email.as_deref()))
        .bind(&input.phone)
        .bind(&input.notes)
        .bind(input.marketing_opt_in)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(customer_id = %id, "Customer created");
        self.get(&id).await
    }

    pub async fn get(&self, id: &str) -> DbResult<Customer> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?");
        sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Customer", id))
    }

    /// Lists customers by name, optionally filtered by name, email or phone.
    pub async fn list(
        &self,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<Customer>> {
        let query = validate_search_query(search.unwrap_or(""))?;

        let customers = if query.is_empty() {
            let sql =
                format!("SELECT {CUSTOMER_COLUMNS} FROM customers ORDER BY name LIMIT ? OFFSET ?");
            sqlx::query_as::<_, Customer>(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
        } else {
            let pattern = format!("%{query}%");
            let sql = format!(
                "SELECT {CUSTOMER_COLUMNS} FROM customers
                 WHERE name LIKE ? OR email LIKE ? OR phone LIKE ?
                 ORDER BY name LIMIT ? OFFSET ?"
            );
            sqlx::query_as::<_, Customer>(&sql)
                .bind(&pattern)
                .bind(&pattern)
                .bind(&pattern)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
        };

        debug!(count = customers.len(), "Listed customers");
        Ok(customers)
    }

    /// Lifetime figures over paid orders, net of refunds.
    pub async fn summary(&self, id: &str) -> DbResult<CustomerSummary> {
        let summary = sqlx::query_as::<_, CustomerSummary>(
            "SELECT COUNT(*) AS order_count,
                    COALESCE(SUM(o.total_cents - COALESCE(
                        (SELECT SUM(r.amount_cents) FROM refunds r WHERE r.order_id = o.id), 0
                    )), 0) AS total_spent_cents,
                    MAX(o.created_at) AS last_order_at
             FROM orders o
             WHERE o.customer_id = ? AND o.status IN ('paid', 'partially_refunded', 'refunded')",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(summary)
    }

    /// Customer with purchase summary and most recent orders.
    pub async fn get_detail(&self, id: &str) -> DbResult<CustomerDetail> {
        let customer = self.get(id).await?;
        let summary = self.summary(id).await?;

        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE customer_id = ?
             ORDER BY created_at DESC
             LIMIT ?"
        );
        let recent_orders = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .bind(RECENT_ORDER_LIMIT)
            .fetch_all(&self.pool)
            .await?;

        Ok(CustomerDetail {
            customer,
            summary,
            recent_orders,
        })
    }

    /// Replaces a customer's details.
    pub async fn update(&self, id: &str, input: &NewCustomer) -> DbResult<Customer> {
        input.validate()?;

        let result = sqlx::query(
            "UPDATE customers
             SET name = ?, email = ?, phone = ?, notes = ?, marketing_opt_in = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(input.name.trim())
        .bind(normalize_email(input.email.as_deref()))
        .bind(&input.phone)
        .bind(&input.notes)
        .bind(input.marketing_opt_in)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Customer", id));
        }

        info!(customer_id = %id, "Customer updated");
        self.get(id).await
    }

    /// Deletes a customer. Their orders and invoices are kept, unlinked.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM customers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Customer", id));
        }

        info!(customer_id = %id, "Customer deleted");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::test_db;

    fn thandi() -> NewCustomer {
        NewCustomer {
            name: "Thandi Nkosi".into(),
            email: Some(" Thandi@Example.co.za ".into()),
            phone: Some("082 555 0101".into()),
            notes: None,
            marketing_opt_in: true,
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_email() {
        let db = test_db().await;
        let customer = db.customers().create(&thandi()).await.unwrap();
        assert_eq!(customer.email.as_deref(), Some("thandi@example.co.za"));
        assert!(customer.marketing_opt_in);
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let db = test_db().await;
        let mut input = thandi();
        input.email = Some("not-an-email".into());
        assert!(db.customers().create(&input).await.is_err());
    }

    #[tokio::test]
    async fn test_search_and_summary() {
        let db = test_db().await;
        let customer = db.customers().create(&thandi()).await.unwrap();
        db.customers()
            .create(&NewCustomer {
                name: "Pieter".into(),
                email: None,
                phone: None,
                notes: None,
                marketing_opt_in: false,
            })
            .await
            .unwrap();

        let found = db.customers().list(Some("thandi"), 50, 0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(db.customers().list(None, 50, 0).await.unwrap().len(), 2);

        let detail = db.customers().get_detail(&customer.id).await.unwrap();
        assert_eq!(detail.summary, CustomerSummary::default());
        assert!(detail.recent_orders.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let db = test_db().await;
        let customer = db.customers().create(&thandi()).await.unwrap();

        let mut input = thandi();
        input.name = "Thandi M. Nkosi".into();
        let updated = db.customers().update(&customer.id, &input).await.unwrap();
        assert_eq!(updated.name, "Thandi M. Nkosi");

        db.customers().delete(&customer.id).await.unwrap();
        assert!(matches!(db.customers().get(&customer.id).await, Err(DbError::NotFound { .. })));
        assert!(matches!(db.customers().delete(&customer.id).await, Err(DbError::NotFound { .. })));
    }
}
