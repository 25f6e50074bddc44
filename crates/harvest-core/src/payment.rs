//! # Payment Module
//!
//! Payment methods, payment statuses and the rules attached to them.
//!
//! ## Settlement Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  cash / card / eft          yoco / payment_link                         │
//! │        │                           │                                    │
//! │        ▼                           ▼                                    │
//! │  payment: completed         payment: pending ── provider checkout       │
//! │  order:   paid                     │                                    │
//! │                                    ▼  webhook                           │
//! │                             completed → order paid                      │
//! │                             failed    → order stays pending             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;

// =============================================================================
// Payment Method
// =============================================================================

/// How an order was (or is being) paid.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash at the stall.
    Cash,
    /// Card on an external terminal (the terminal settles, we only record).
    Card,
    /// Bank transfer confirmed by the cashier.
    Eft,
    /// Online checkout through the Yoco provider.
    Yoco,
    /// Checkout link emailed to the customer.
    PaymentLink,
}

impl PaymentMethod {
    /// Every accepted method, in display order.
    pub const ALL: [PaymentMethod; 5] = [
        PaymentMethod::Cash,
        PaymentMethod::Card,
        PaymentMethod::Eft,
        PaymentMethod::Yoco,
        PaymentMethod::PaymentLink,
    ];

    /// Wire/database name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Eft => "eft",
            PaymentMethod::Yoco => "yoco",
            PaymentMethod::PaymentLink => "payment_link",
        }
    }

    /// Whether the payment is final as soon as it is recorded.
    ///
    /// Provider methods stay `pending` until the webhook arrives.
    pub const fn settles_immediately(&self) -> bool {
        matches!(
            self,
            PaymentMethod::Cash | PaymentMethod::Card | PaymentMethod::Eft
        )
    }

    /// Whether a checkout has to be created with the payment provider.
    pub const fn requires_provider(&self) -> bool {
        !self.settles_immediately()
    }

    /// Parses a method name, case-insensitively.
    ///
    /// ```rust
    /// use harvest_core::payment::PaymentMethod;
    ///
    /// assert_eq!(PaymentMethod::parse(" CASH ").unwrap(), PaymentMethod::Cash);
    /// assert_eq!(PaymentMethod::parse("payment-link").unwrap(), PaymentMethod::PaymentLink);
    /// assert!(PaymentMethod::parse("bitcoin").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        if normalized.is_empty() {
            return Err(ValidationError::required("payment_method"));
        }

        PaymentMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "payment_method".to_string(),
                allowed: PaymentMethod::ALL
                    .iter()
                    .map(|m| m.as_str().to_string())
                    .collect(),
            })
    }

    /// Maps the free-text tender column of a vendor export to a method.
    ///
    /// ## Mapping
    /// ```text
    /// "Cash"                         → cash
    /// "EFT", "Bank Transfer"         → eft
    /// "Card", "Credit", "Debit",
    /// "Yoco", anything else          → card
    /// ```
    pub fn from_import_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        if label.contains("cash") {
            PaymentMethod::Cash
        } else if label.contains("eft") || label.contains("transfer") {
            PaymentMethod::Eft
        } else {
            PaymentMethod::Card
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::parse(s)
    }
}

// =============================================================================
// Payment Status
// =============================================================================

/// Lifecycle of a single payment attempt.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Interprets the status string sent by the payment provider.
    ///
    /// Providers are not consistent about wording, so the common synonyms
    /// for success and failure are accepted.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" | "succeeded" | "successful" | "success" | "paid" => {
                Some(PaymentStatus::Completed)
            }
            "failed" | "cancelled" | "canceled" | "expired" | "declined" => {
                Some(PaymentStatus::Failed)
            }
            "pending" | "created" | "processing" => Some(PaymentStatus::Pending),
            _ => None,
        }
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Pending
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement() {
        assert!(PaymentMethod::Cash.settles_immediately());
        assert!(PaymentMethod::Card.settles_immediately());
        assert!(PaymentMethod::Eft.settles_immediately());
        assert!(PaymentMethod::Yoco.requires_provider());
        assert!(PaymentMethod::PaymentLink.requires_provider());
    }

    #[test]
    fn test_parse_rejects_unknown_with_allowed_list() {
        let err = PaymentMethod::parse("cheque").unwrap_err();
        assert_eq!(
            err.to_string(),
            "payment_method must be one of: cash, card, eft, yoco, payment_link"
        );
        assert!(matches!(
            PaymentMethod::parse("  ").unwrap_err(),
            ValidationError::Required { .. }
        ));
    }

    #[test]
    fn test_parse_roundtrips_wire_names() {
        for method in PaymentMethod::ALL {
            assert_eq!(method.as_str().parse::<PaymentMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_import_label_mapping() {
        assert_eq!(PaymentMethod::from_import_label("Cash"), PaymentMethod::Cash);
        assert_eq!(PaymentMethod::from_import_label("Credit Card"), PaymentMethod::Card);
        assert_eq!(PaymentMethod::from_import_label("debit"), PaymentMethod::Card);
        assert_eq!(PaymentMethod::from_import_label("Yoco"), PaymentMethod::Card);
        assert_eq!(PaymentMethod::from_import_label("EFT"), PaymentMethod::Eft);
        assert_eq!(PaymentMethod::from_import_label("Bank Transfer"), PaymentMethod::Eft);
        assert_eq!(PaymentMethod::from_import_label("voucher"), PaymentMethod::Card);
        assert_eq!(PaymentMethod::from_import_label(""), PaymentMethod::Card);
    }

    #[test]
    fn test_provider_status() {
        assert_eq!(PaymentStatus::from_provider("succeeded"), Some(PaymentStatus::Completed));
        assert_eq!(PaymentStatus::from_provider("FAILED"), Some(PaymentStatus::Failed));
        assert_eq!(PaymentStatus::from_provider("mystery"), None);
    }
}
