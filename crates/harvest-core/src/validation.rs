//! # Validation Module
//!
//! Input validation utilities for Harvest POS.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP handler (apps/api)                                      │
//! │  ├── JSON shape (deserialization → 400 on failure)                     │
//! │  └── Required ids present                                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Field rules (lengths, ranges, formats)                            │
//! │  └── Payload `validate()` methods                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (quantity >= 0) on batches                                  │
//! │  ├── UNIQUE constraints (sku, order_number, invoice_number)            │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use harvest_core::validation::{validate_sku, validate_quantity};
//!
//! validate_sku("HONEY-500").unwrap();
//! validate_quantity(5).unwrap();
//! ```

use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::recurrence::EventSchedule;
use crate::types::{
    BatchAdjustment, BusinessSettingsUpdate, NewBatch, NewBusinessSettings, NewCustomer,
    NewMarketEvent, NewOrder, NewProduct, NewUserRole, ProductUpdate,
};
use crate::{MAX_ITEM_QUANTITY, MAX_ORDER_LINES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a SKU (Stock Keeping Unit).
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Only letters, digits, hyphens and underscores
///
/// ## Example
/// ```rust
/// use harvest_core::validation::validate_sku;
///
/// assert!(validate_sku("HONEY-500").is_ok());
/// assert!(validate_sku("").is_err());
/// assert!(validate_sku("A".repeat(100).as_str()).is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    if sku.is_empty() {
        return Err(ValidationError::required("sku"));
    }

    if sku.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: 50,
        });
    }

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a required display name (product, customer, event, profile).
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 200 characters
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::required(field));
    }

    if name.chars().count() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates an optional free-text field (notes, address, description).
pub fn validate_optional_text(
    field: &str,
    value: Option<&str>,
    max: usize,
) -> ValidationResult<()> {
    match value {
        Some(v) if v.chars().count() > max => Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        }),
        _ => Ok(()),
    }
}

/// Validates an email address.
///
/// Deliberately loose: one `@`, something before it, a dot after it.
///
/// ```rust
/// use harvest_core::validation::validate_email;
///
/// assert!(validate_email("thandi@example.co.za").is_ok());
/// assert!(validate_email("not-an-email").is_err());
/// ```
pub fn validate_email(email: &str) -> ValidationResult<()> {
    let email = email.trim();
    let invalid = || ValidationError::InvalidFormat {
        field: "email".to_string(),
        reason: "must be a valid email address".to_string(),
    };

    if email.is_empty() {
        return Err(ValidationError::required("email"));
    }
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}

/// Validates a search query and returns it trimmed.
pub fn validate_search_query(query: &str) -> ValidationResult<String> {
    let query = query.trim();

    if query.len() > 100 {
        return Err(ValidationError::TooLong {
            field: "query".to_string(),
            max: 100,
        });
    }

    Ok(query.to_string())
}

/// Validates an ISO 4217 currency code (three uppercase letters).
pub fn validate_currency(code: &str) -> ValidationResult<()> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFormat {
            field: "currency".to_string(),
            reason: "must be a three-letter ISO code such as ZAR".to_string(),
        })
    }
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a quantity on an order line.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (9999)
///
/// ## User Workflow
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  POST /orders  { items: [{ product_id, quantity: 5 }] }                 │
/// │       │                                                                 │
/// │       ▼                                                                 │
/// │  validate_quantity(5) ← THIS FUNCTION                                  │
/// │       │                                                                 │
/// │       ├── qty <= 0?    → 400 "quantity must be positive"               │
/// │       ├── qty > 9999?  → 400 "quantity must be between 1 and 9999"     │
/// │       └── OK → FIFO allocation                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a batch quantity. Zero is allowed (an emptied batch).
pub fn validate_batch_quantity(qty: i64) -> ValidationResult<()> {
    if qty < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "quantity".to_string(),
        });
    }
    Ok(())
}

/// Validates a price in cents.
///
/// ## Example
/// ```rust
/// use harvest_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents("unit_price_cents", 4500).is_ok());
/// assert!(validate_price_cents("unit_price_cents", 0).is_ok());
/// assert!(validate_price_cents("unit_price_cents", -100).is_err());
/// ```
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a payment or refund amount in cents (must be > 0).
pub fn validate_amount_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a VAT rate in basis points (0% to 100%).
pub fn validate_tax_rate_bps(bps: u32) -> ValidationResult<()> {
    if bps > 10000 {
        return Err(ValidationError::OutOfRange {
            field: "vat_rate_bps".to_string(),
            min: 0,
            max: 10000,
        });
    }

    Ok(())
}

// =============================================================================
// Identifier & Date Validators
// =============================================================================

/// Validates a UUID string.
///
/// ```rust
/// use harvest_core::validation::validate_uuid;
///
/// assert!(validate_uuid("order_id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("order_id", "not-a-uuid").is_err());
/// ```
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::required(field));
    }

    uuid::Uuid::parse_str(id.trim()).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

/// Validates that `to` is not before `from`.
pub fn validate_date_range(from: NaiveDate, to: NaiveDate) -> ValidationResult<()> {
    if to < from {
        return Err(ValidationError::Inconsistent {
            field: "to".to_string(),
            reason: "must not be before from".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Payload Validators
// =============================================================================

impl NewProduct {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_sku(&self.sku)?;
        validate_name("name", &self.name)?;
        validate_optional_text("description", self.description.as_deref(), 2000)?;
        validate_price_cents("unit_price_cents", self.unit_price_cents)?;
        validate_price_cents("cost_price_cents", self.cost_price_cents)?;
        if self.low_stock_threshold < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "low_stock_threshold".to_string(),
            });
        }
        Ok(())
    }
}

impl ProductUpdate {
    pub fn validate(&self) -> ValidationResult<()> {
        if let Some(sku) = &self.sku {
            validate_sku(sku)?;
        }
        if let Some(name) = &self.name {
            validate_name("name", name)?;
        }
        validate_optional_text("description", self.description.as_deref(), 2000)?;
        if let Some(price) = self.unit_price_cents {
            validate_price_cents("unit_price_cents", price)?;
        }
        if let Some(cost) = self.cost_price_cents {
            validate_price_cents("cost_price_cents", cost)?;
        }
        if matches!(self.low_stock_threshold, Some(t) if t < 0) {
            return Err(ValidationError::MustNotBeNegative {
                field: "low_stock_threshold".to_string(),
            });
        }
        Ok(())
    }
}

impl NewBatch {
    pub fn validate(&self) -> ValidationResult<()> {
        if self.product_id.trim().is_empty() {
            return Err(ValidationError::required("product_id"));
        }
        validate_batch_quantity(self.quantity)?;
        if let Some(number) = &self.batch_number {
            if number.trim().is_empty() {
                return Err(ValidationError::required("batch_number"));
            }
            if number.len() > 50 {
                return Err(ValidationError::TooLong {
                    field: "batch_number".to_string(),
                    max: 50,
                });
            }
        }
        if let Some(cost) = self.cost_price_cents {
            validate_price_cents("cost_price_cents", cost)?;
        }
        if let (Some(produced), Some(expires)) = (self.production_date, self.expiry_date) {
            if expires < produced {
                return Err(ValidationError::Inconsistent {
                    field: "expiry_date".to_string(),
                    reason: "must not be before production_date".to_string(),
                });
            }
        }
        validate_optional_text("notes", self.notes.as_deref(), 1000)
    }
}

impl BatchAdjustment {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_batch_quantity(self.quantity)?;
        validate_optional_text("notes", self.notes.as_deref(), 1000)
    }
}

impl NewCustomer {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_name("name", &self.name)?;
        if let Some(email) = self.email.as_deref().filter(|e| !e.trim().is_empty()) {
            validate_email(email)?;
        }
        validate_optional_text("phone", self.phone.as_deref(), 30)?;
        validate_optional_text("notes", self.notes.as_deref(), 2000)
    }
}

impl NewMarketEvent {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_name("name", &self.name)?;
        validate_optional_text("location", self.location.as_deref(), 200)?;
        validate_price_cents("stall_fee_cents", self.stall_fee_cents)?;
        let schedule: EventSchedule = self.schedule();
        schedule.validate()
    }
}

impl NewOrder {
    /// Checks the shape of an order before any stock is looked at.
    ///
    /// ## Rules
    /// - At least one item, at most MAX_ORDER_LINES
    /// - Every item names a product and has a valid quantity
    /// - Price overrides and discount are not negative
    pub fn validate(&self) -> ValidationResult<()> {
        if self.items.is_empty() {
            return Err(ValidationError::required("items"));
        }
        if self.items.len() > MAX_ORDER_LINES {
            return Err(ValidationError::OutOfRange {
                field: "items".to_string(),
                min: 1,
                max: MAX_ORDER_LINES as i64,
            });
        }

        for item in &self.items {
            if item.product_id.trim().is_empty() {
                return Err(ValidationError::required("product_id"));
            }
            validate_quantity(item.quantity)?;
            if let Some(price) = item.unit_price_cents {
                validate_price_cents("unit_price_cents", price)?;
            }
        }

        if self.discount_cents < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "discount_cents".to_string(),
            });
        }
        validate_optional_text("notes", self.notes.as_deref(), 2000)
    }
}

impl NewBusinessSettings {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_name("profile_name", &self.profile_name)?;
        validate_name("business_name", &self.business_name)?;
        if let Some(email) = self.email.as_deref().filter(|e| !e.trim().is_empty()) {
            validate_email(email)?;
        }
        if let Some(bps) = self.vat_rate_bps {
            validate_tax_rate_bps(bps)?;
        }
        if let Some(currency) = &self.currency {
            validate_currency(currency)?;
        }
        if let Some(prefix) = &self.invoice_prefix {
            validate_invoice_prefix(prefix)?;
        }
        Ok(())
    }
}

impl BusinessSettingsUpdate {
    pub fn validate(&self) -> ValidationResult<()> {
        if let Some(name) = &self.profile_name {
            validate_name("profile_name", name)?;
        }
        if let Some(name) = &self.business_name {
            validate_name("business_name", name)?;
        }
        if let Some(email) = self.email.as_deref().filter(|e| !e.trim().is_empty()) {
            validate_email(email)?;
        }
        if let Some(bps) = self.vat_rate_bps {
            validate_tax_rate_bps(bps)?;
        }
        if let Some(currency) = &self.currency {
            validate_currency(currency)?;
        }
        if let Some(prefix) = &self.invoice_prefix {
            validate_invoice_prefix(prefix)?;
        }
        Ok(())
    }
}

impl NewUserRole {
    pub fn validate(&self) -> ValidationResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::required("user_id"));
        }
        Ok(())
    }
}

fn validate_invoice_prefix(prefix: &str) -> ValidationResult<()> {
    let alphanumeric = prefix.chars().all(|c| c.is_ascii_alphanumeric());
    if prefix.is_empty() || prefix.len() > 10 || !alphanumeric {
        return Err(ValidationError::InvalidFormat {
            field: "invoice_prefix".to_string(),
            reason: "must be 1-10 letters or digits".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewOrderItem;

    fn item(product_id: &str, quantity: i64) -> NewOrderItem {
        NewOrderItem {
            product_id: product_id.to_string(),
            quantity,
            unit_price_cents: None,
        }
    }

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("HONEY-500").is_ok());
        assert!(validate_sku("jam_01").is_ok());

        assert!(validate_sku("").is_err());
        assert!(validate_sku("   ").is_err());
        assert!(validate_sku("has space").is_err());
        assert!(validate_sku(&"A".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(9_999).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(10_000).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("@b.co").is_err());
        assert!(validate_email("a b@c.co").is_err());
        assert!(validate_email("a@b@c.co").is_err());
    }

    #[test]
    fn test_validate_uuid_names_field() {
        let err = validate_uuid("order_id", "123").unwrap_err();
        assert!(err.to_string().starts_with("order_id has invalid format"));
        assert_eq!(validate_uuid("order_id", "").unwrap_err().to_string(), "order_id is required");
    }

    #[test]
    fn test_new_order_rejects_empty_and_invalid_items() {
        let empty = NewOrder::default();
        assert_eq!(empty.validate().unwrap_err().to_string(), "items is required");

        let zero_qty = NewOrder {
            items: vec![item("p", 0)],
            ..NewOrder::default()
        };
        assert_eq!(zero_qty.validate().unwrap_err().to_string(), "quantity must be positive");

        let no_product = NewOrder {
            items: vec![item(" ", 1)],
            ..NewOrder::default()
        };
        assert!(no_product.validate().is_err());

        let negative_discount = NewOrder {
            items: vec![item("p", 1)],
            discount_cents: -5,
            ..NewOrder::default()
        };
        assert!(negative_discount.validate().is_err());
    }

    #[test]
    fn test_new_batch_rejects_negative_quantity() {
        let batch = NewBatch {
            product_id: "p".into(),
            batch_number: None,
            quantity: -1,
            production_date: None,
            expiry_date: None,
            cost_price_cents: None,
            notes: None,
        };
        assert_eq!(batch.validate().unwrap_err().to_string(), "quantity must not be negative");

        let zero = NewBatch { quantity: 0, ..batch };
        assert!(zero.validate().is_ok());
    }

    #[test]
    fn test_business_settings_validation() {
        let settings = NewBusinessSettings {
            profile_name: "Main".into(),
            business_name: "Hillside Honey".into(),
            email: None,
            phone: None,
            address: None,
            vat_number: None,
            vat_rate_bps: Some(10_001),
            currency: None,
            invoice_prefix: None,
            auto_send_invoice: false,
            is_default: true,
        };
        assert!(settings.validate().is_err());

        let bad_currency = NewBusinessSettings {
            vat_rate_bps: Some(1500),
            currency: Some("rand".into()),
            ..settings
        };
        assert!(bad_currency.validate().is_err());
    }
}
