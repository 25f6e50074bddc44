//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Representation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Money(i64) = whole cents, signed                                       │
//! │                                                                         │
//! │  R45.00 shelf price   ──► 4500                                          │
//! │  refund of R10.00     ──► -1000 when booked against revenue             │
//! │  VAT inside R115.00   ──► 1500   (15% inclusive, half-up rounding)      │
//! │                                                                         │
//! │  Decimals only exist at the edges: CSV import parses them in,           │
//! │  Display formats "R12.50" out. Nothing in between is fractional.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use harvest_core::money::Money;
//!
//! let price = Money::from_cents(4500); // R45.00
//! let line = price * 3;                // R135.00
//! assert_eq!(line.cents(), 13500);
//!
//! // Amounts coming from CSV exports
//! let parsed = Money::parse_decimal("R 1 234,50").unwrap();
//! assert_eq!(parsed.cents(), 123450);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// An amount in cents. Signed, so refunds and shortfalls can be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units (rands and cents).
    ///
    /// For negative amounts only the major unit should be negative:
    /// `from_major_minor(-5, 50)` is -R5.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Calculates tax on top of this amount (tax-exclusive pricing).
    ///
    /// ## Implementation
    /// Integer math: `(amount * rate + 5000) / 10000`, i.e. round half up.
    ///
    /// ```rust
    /// use harvest_core::money::Money;
    /// use harvest_core::types::TaxRate;
    ///
    /// let tax = Money::from_cents(1000).calculate_tax(TaxRate::from_bps(825));
    /// assert_eq!(tax.cents(), 83);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        let tax_cents = (self.0 as i128 * rate.bps() as i128 + 5000) / 10000;
        Money::from_cents(tax_cents as i64)
    }

    /// Returns the VAT contained in a VAT-inclusive amount.
    ///
    /// Market prices are displayed VAT-inclusive, so invoices back the tax
    /// out of the total: `amount × rate / (10000 + rate)`, rounded half up.
    ///
    /// ```rust
    /// use harvest_core::money::Money;
    /// use harvest_core::types::TaxRate;
    ///
    /// let vat = Money::from_cents(11500).vat_inclusive_portion(TaxRate::from_bps(1500));
    /// assert_eq!(vat.cents(), 1500);
    /// ```
    pub fn vat_inclusive_portion(&self, rate: TaxRate) -> Money {
        if rate.is_zero() {
            return Money::zero();
        }
        let denominator = 10_000i128 + rate.bps() as i128;
        let numerator = self.0 as i128 * rate.bps() as i128;
        let half = denominator / 2;
        let rounded = if numerator >= 0 {
            (numerator + half) / denominator
        } else {
            (numerator - half) / denominator
        };
        Money::from_cents(rounded as i64)
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// `multiply_quantity` for untrusted input; `None` on overflow.
    #[inline]
    pub fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        self.0.checked_mul(qty).map(Money)
    }

    /// Applies a percentage discount and returns the discounted amount.
    ///
    /// `discount_bps` is in basis points (1000 = 10%).
    pub fn apply_percentage_discount(&self, discount_bps: u32) -> Money {
        let discount_amount = (self.0 as i128 * discount_bps as i128 + 5000) / 10000;
        Money::from_cents(self.0 - discount_amount as i64)
    }

    /// Parses a human-formatted decimal amount, as found in vendor exports.
    ///
    /// ## Accepted Shapes
    /// ```text
    /// "45"          → 4500
    /// "45.5"        → 4550
    /// "R 1 234,50"  → 123450   (space thousands, comma decimal)
    /// "1,234.50"    → 123450   (comma thousands, dot decimal)
    /// "-R12.00"     → -1200
    /// "12.345"      → 1235     (third decimal rounds half up)
    /// ```
    ///
    /// Returns `None` for anything that is not a number.
    pub fn parse_decimal(input: &str) -> Option<Money> {
        let compact: String = input
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
            .collect();

        let mut rest = compact.as_str();
        let mut negative = false;
        if let Some(r) = rest.strip_prefix('-') {
            negative = true;
            rest = r;
        }
        for prefix in ["ZAR", "R", "$"] {
            if let Some(r) = rest.strip_prefix(prefix) {
                rest = r;
                break;
            }
        }
        if let Some(r) = rest.strip_prefix('-') {
            negative = true;
            rest = r;
        }

        let normalized = normalize_separators(rest)?;
        let (int_part, frac_part) = match normalized.split_once('.') {
            Some((i, f)) => (i.to_string(), f.to_string()),
            None => (normalized.clone(), String::new()),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }

        let major: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().ok()?
        };

        let digits: Vec<i64> = frac_part
            .chars()
            .filter_map(|c| c.to_digit(10).map(i64::from))
            .collect();
        let digit = |i: usize| digits.get(i).copied().unwrap_or(0);
        let mut minor = digit(0) * 10 + digit(1);
        if digit(2) >= 5 {
            minor += 1;
        }

        let cents = major.checked_mul(100)?.checked_add(minor)?;
        Some(Money(if negative { -cents } else { cents }))
    }
}

/// Rewrites thousands/decimal separators so that only a single `.` remains
/// as the decimal point.
fn normalize_separators(s: &str) -> Option<String> {
    let has_dot = s.contains('.');
    let has_comma = s.contains(',');

    match (has_dot, has_comma) {
        (true, true) => {
            let last_dot = s.rfind('.')?;
            let last_comma = s.rfind(',')?;
            if last_dot > last_comma {
                Some(s.replace(',', ""))
            } else {
                Some(s.replace('.', "").replace(',', "."))
            }
        }
        (false, true) => {
            let commas = s.matches(',').count();
            let after = s.rsplit(',').next().unwrap_or("");
            if commas == 1 && !after.is_empty() && after.len() <= 2 {
                Some(s.replace(',', "."))
            } else {
                Some(s.replace(',', ""))
            }
        }
        (true, false) => {
            if s.matches('.').count() > 1 {
                None
            } else {
                Some(s.to_string())
            }
        }
        (false, false) => Some(s.to_string()),
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display is for logs and tests; the frontend handles localized formatting.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}R{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
