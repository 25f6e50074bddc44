//! # Settings Repository
//!
//! Business profiles: trading details, VAT rate and invoice numbering.
//!
//! At most one profile is the default (partial unique index). Making a
//! profile the default clears the flag on the others in the same
//! transaction. Orders take their VAT rate from the default profile and
//! fall back to 15% when none exists.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::{begin_write, generate_id, now};
use crate::error::{DbError, DbResult};
use harvest_core::{
    BusinessSettings, BusinessSettingsUpdate, NewBusinessSettings, TaxRate, DEFAULT_CURRENCY,
    DEFAULT_VAT_RATE_BPS,
};

pub(crate) const SETTINGS_COLUMNS: &str = "id, profile_name, business_name, email, phone, address, \
     vat_number, vat_rate_bps, currency, invoice_prefix, next_invoice_number, auto_send_invoice, \
     is_default, created_at, updated_at";

/// The default profile, if any.
pub(crate) async fn fetch_default(
    conn: &mut SqliteConnection,
) -> DbResult<Option<BusinessSettings>> {
    let sql = format!("SELECT {SETTINGS_COLUMNS} FROM business_settings WHERE is_default = 1");
    let settings = sqlx::query_as::<_, BusinessSettings>(&sql)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(settings)
}

/// VAT rate for new orders.
pub(crate) async fn default_vat_rate(conn: &mut SqliteConnection) -> DbResult<TaxRate> {
    Ok(fetch_default(conn)
        .await?
        .map(|s| s.vat_rate())
        .unwrap_or_default())
}

async fn clear_default(conn: &mut SqliteConnection) -> DbResult<()> {
    sqlx::query("UPDATE business_settings SET is_default = 0 WHERE is_default = 1")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Creates a profile. The first profile always becomes the default.
    pub async fn create(&self, input: &NewBusinessSettings) -> DbResult<BusinessSettings> {
        input.validate()?;

        let id = generate_id();
        let now = now();
        let mut tx = begin_write(&self.pool).await?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM business_settings")
            .fetch_one(&mut *tx)
            .await?;
        let is_default = input.is_default || existing == 0;
        if is_default {
            clear_default(&mut tx).await?;
        }

        sqlx::query(
            "INSERT INTO business_settings
                (id, profile_name, business_name, email, phone, address, vat_number, vat_rate_bps,
                 currency, invoice_prefix, next_invoice_number, auto_send_invoice, is_default,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(input.profile_name.trim())
        .bind(input.business_name.trim())
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.address)
        .bind(&input.vat_number)
        .bind(i64::from(input.vat_rate_bps.unwrap_or(DEFAULT_VAT_RATE_BPS)))
        .bind(input.currency.as_deref().unwrap_or(DEFAULT_CURRENCY))
        .bind(input.invoice_prefix.as_deref().unwrap_or("INV"))
        .bind(input.auto_send_invoice)
        .bind(is_default)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(profile_id = %id, is_default, "Business profile created");
        self.get(&id).await
    }

    pub async fn get(&self, id: &str) -> DbResult<BusinessSettings> {
        let sql = format!("SELECT {SETTINGS_COLUMNS} FROM business_settings WHERE id = ?");
        sqlx::query_as::<_, BusinessSettings>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Business profile", id))
    }

    /// The default profile, if one has been set up.
    pub async fn get_default(&self) -> DbResult<Option<BusinessSettings>> {
        let mut conn = self.pool.acquire().await?;
        fetch_default(&mut conn).await
    }

    /// Lists profiles, default first.
    pub async fn list(&self) -> DbResult<Vec<BusinessSettings>> {
        let sql = format!(
            "SELECT {SETTINGS_COLUMNS} FROM business_settings
             ORDER BY is_default DESC, profile_name"
        );
        let profiles = sqlx::query_as::<_, BusinessSettings>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(profiles)
    }

    /// Applies a partial update. `is_default: false` on the current default
    /// is ignored; promote another profile instead.
    pub async fn update(
        &self,
        id: &str,
        update: &BusinessSettingsUpdate,
    ) -> DbResult<BusinessSettings> {
        update.validate()?;

        let mut tx = begin_write(&self.pool).await?;
        let sql = format!("SELECT {SETTINGS_COLUMNS} FROM business_settings WHERE id = ?");
        let current = sqlx::query_as::<_, BusinessSettings>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Business profile", id))?;

        let make_default = update.is_default == Some(true) && !current.is_default;
        if make_default {
            clear_default(&mut tx).await?;
        }

        sqlx::query(
            "UPDATE business_settings SET
                profile_name = ?, business_name = ?, email = ?, phone = ?, address = ?,
                vat_number = ?, vat_rate_bps = ?, currency = ?, invoice_prefix = ?,
                auto_send_invoice = ?, is_default = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(update.profile_name.as_deref().map(str::trim).unwrap_or(&current.profile_name))
        .bind(update.business_name.as_deref().map(str::trim).unwrap_or(&current.business_name))
        .bind(update.email.as_ref().or(current.email.as_ref()))
        .bind(update.phone.as_ref().or(current.phone.as_ref()))
        .bind(update.address.as_ref().or(current.address.as_ref()))
        .bind(update.vat_number.as_ref().or(current.vat_number.as_ref()))
        .bind(update.vat_rate_bps.map(i64::from).unwrap_or(current.vat_rate_bps))
        .bind(update.currency.as_deref().unwrap_or(&current.currency))
        .bind(update.invoice_prefix.as_deref().unwrap_or(&current.invoice_prefix))
        .bind(update.auto_send_invoice.unwrap_or(current.auto_send_invoice))
        .bind(current.is_default || make_default)
        .bind(now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(profile_id = %id, "Business profile updated");
        self.get(id).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::test_db;

    fn profile(name: &str, is_default: bool) -> NewBusinessSettings {
        NewBusinessSettings {
            profile_name: name.into(),
            business_name: "Fynbos Honey Co".into(),
            email: Some("hello@fynbos.example".into()),
            phone: None,
            address: None,
            vat_number: Some("4123456789".into()),
            vat_rate_bps: None,
            currency: None,
            invoice_prefix: None,
            auto_send_invoice: false,
            is_default,
        }
    }

    #[tokio::test]
    async fn test_first_profile_is_default() {
        let db = test_db().await;
        let first = db.settings().create(&profile("Main", false)).await.unwrap();

        assert!(first.is_default);
        assert_eq!(first.vat_rate_bps, 1500);
        assert_eq!(first.currency, "ZAR");
        assert_eq!(first.invoice_prefix, "INV");
        assert_eq!(first.next_invoice_number, 1);
    }

    #[tokio::test]
    async fn test_single_default() {
        let db = test_db().await;
        let first = db.settings().create(&profile("Main", true)).await.unwrap();
        let second = db.settings().create(&profile("Markets", true)).await.unwrap();

        assert!(second.is_default);
        assert!(!db.settings().get(&first.id).await.unwrap().is_default);

        db.settings()
            .update(
                &first.id,
                &BusinessSettingsUpdate {
                    is_default: Some(true),
                    vat_rate_bps: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let default = db.settings().get_default().await.unwrap().unwrap();
        assert_eq!(default.id, first.id);
        assert!(default.vat_rate().is_zero());
        assert_eq!(db.settings().list().await.unwrap()[0].id, first.id);
    }

    #[tokio::test]
    async fn test_invalid_prefix_rejected() {
        let db = test_db().await;
        let mut input = profile("Main", true);
        input.invoice_prefix = Some("IN V".into());
        assert!(db.settings().create(&input).await.is_err());
    }
}
