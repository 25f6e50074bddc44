//! # Error Types
//!
//! Domain-specific error types for harvest-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  harvest-core errors (this file)                                       │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  harvest-core::import                                                  │
//! │  └── ImportError      - Unreadable CSV exports                         │
//! │                                                                         │
//! │  harvest-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  apps/api                                                              │
//! │  └── ApiError         - HTTP status + { "error": ... } body            │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ApiError → Client       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Product exists but has been archived.
    #[error("Product {0} is inactive and cannot be sold")]
    ProductInactive(String),

    /// Insufficient batch stock to complete a sale.
    ///
    /// ## User Workflow
    /// ```text
    /// Add line (qty: 5)
    ///      │
    ///      ▼
    /// Sum of batch quantities: 3
    ///      │
    ///      ▼
    /// InsufficientStock { sku: "HONEY-500", available: 3, requested: 5 }
    /// ```
    #[error("Insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Order is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Cancelling an order that already has a completed payment
    /// - Paying an order that is cancelled or already paid
    /// - Refunding an order that was never paid
    #[error("Order {order_id} is {current_status}, cannot {action}")]
    InvalidOrderStatus {
        order_id: String,
        current_status: String,
        action: String,
    },

    /// Refund would exceed what is left to refund.
    #[error(
        "Refund of {requested} cents exceeds remaining refundable balance of {refundable} cents"
    )]
    RefundExceedsBalance { requested: i64, refundable: i64 },

    /// Payment amount does not reconcile with the order.
    #[error("Invalid payment amount: {reason}")]
    InvalidPaymentAmount { reason: String },

    /// Discount larger than the order subtotal.
    #[error("Discount of {discount} cents exceeds subtotal of {subtotal} cents")]
    DiscountExceedsSubtotal { discount: i64, subtotal: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when request input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, invalid date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {}", allowed.join(", "))]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Two fields contradict each other (e.g. end date before start date).
    #[error("{field}: {reason}")]
    Inconsistent { field: String, reason: String },
}

impl ValidationError {
    /// Shorthand for a missing required field.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            sku: "HONEY-500".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for HONEY-500: available 3, requested 5"
        );

        let err = CoreError::InvalidOrderStatus {
            order_id: "o-1".to_string(),
            current_status: "paid".to_string(),
            action: "cancel".to_string(),
        };
        assert_eq!(err.to_string(), "Order o-1 is paid, cannot cancel");
    }

    #[test]
    fn test_not_allowed_lists_values() {
        let err = ValidationError::NotAllowed {
            field: "payment_method".to_string(),
            allowed: vec!["cash".to_string(), "card".to_string()],
        };
        assert_eq!(err.to_string(), "payment_method must be one of: cash, card");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::required("items").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
