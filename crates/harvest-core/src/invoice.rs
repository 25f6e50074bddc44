//! # Invoice Module
//!
//! Invoice numbering, totals and the plain-text body used for email.
//!
//! ```text
//! profile.invoice_prefix = "INV", next_invoice_number = 42
//!        │
//!        ▼
//! "INV-000042"   (profile counter then advances to 43 in the same transaction)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use ts_rs::TS;

use crate::money::Money;
use crate::types::{InvoiceDetail, Order, TaxRate};

/// Digits in the numeric part of an invoice number.
pub const INVOICE_NUMBER_WIDTH: usize = 6;

/// Formats an invoice number.
///
/// ```rust
/// use harvest_core::invoice::format_invoice_number;
///
/// assert_eq!(format_invoice_number("INV", 42), "INV-000042");
/// assert_eq!(format_invoice_number("HH", 1234567), "HH-1234567");
/// ```
pub fn format_invoice_number(prefix: &str, n: i64) -> String {
    format!("{}-{:0width$}", prefix, n, width = INVOICE_NUMBER_WIDTH)
}

/// Invoice amounts: `total` is what the customer paid, `subtotal` is the
/// amount excluding the VAT contained in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceTotals {
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
}

impl InvoiceTotals {
    pub fn from_order(order: &Order, vat_rate: TaxRate) -> Self {
        InvoiceTotals::from_total(order.total(), vat_rate)
    }

    pub fn from_total(total: Money, vat_rate: TaxRate) -> Self {
        let tax = total.vat_inclusive_portion(vat_rate);
        InvoiceTotals {
            subtotal_cents: (total - tax).cents(),
            tax_cents: tax.cents(),
            total_cents: total.cents(),
        }
    }
}

/// Email subject line for an invoice.
pub fn invoice_subject(detail: &InvoiceDetail) -> String {
    let business = detail
        .business
        .as_ref()
        .map(|b| b.business_name.as_str())
        .unwrap_or("Your order");
    format!("{} - Invoice {}", business, detail.invoice.invoice_number)
}

/// Plain-text invoice for email bodies.
pub fn render_invoice_text(detail: &InvoiceDetail) -> String {
    let mut out = String::new();
    let invoice = &detail.invoice;

    if let Some(business) = &detail.business {
        let _ = writeln!(out, "{}", business.business_name);
        if let Some(address) = &business.address {
            let _ = writeln!(out, "{address}");
        }
        if let Some(vat) = &business.vat_number {
            let _ = writeln!(out, "VAT No: {vat}");
        }
        out.push('\n');
    }

    let _ = writeln!(out, "TAX INVOICE {}", invoice.invoice_number);
    let _ = writeln!(out, "Date: {}", invoice.created_at.format("%Y-%m-%d"));
    let _ = writeln!(out, "Order: {}", detail.order.order_number);
    if let Some(customer) = &detail.customer {
        let _ = writeln!(out, "Customer: {}", customer.name);
    }
    out.push('\n');

    for item in &detail.items {
        let _ = writeln!(
            out,
            "{:>4} x {:<32} {:>12}",
            item.quantity,
            item.name_snapshot,
            Money::from_cents(item.line_total_cents).to_string()
        );
    }
    out.push('\n');

    if detail.order.discount_cents > 0 {
        let _ = writeln!(
            out,
            "Discount: {:>12}",
            Money::from_cents(-detail.order.discount_cents).to_string()
        );
    }
    let subtotal = Money::from_cents(invoice.subtotal_cents).to_string();
    let _ = writeln!(out, "Excl. VAT: {:>12}", subtotal);
    let _ = writeln!(out, "VAT:       {:>12}", Money::from_cents(invoice.tax_cents).to_string());
    let _ = writeln!(out, "Total:     {:>12}", Money::from_cents(invoice.total_cents).to_string());

    out
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderStatus;
    use crate::types::{Invoice, InvoiceStatus, OrderItem, OrderSource};
    use chrono::Utc;

    fn order(total: i64) -> Order {
        Order {
            id: "o-1".into(),
            order_number: "ORD-20240302-ABC123".into(),
            customer_id: None,
            market_event_id: None,
            status: OrderStatus::Paid,
            subtotal_cents: total,
            discount_cents: 0,
            tax_cents: 0,
            total_cents: total,
            notes: None,
            source: OrderSource::Pos,
            external_reference: None,
            paid_at: Some(Utc::now()),
            cancelled_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_invoice_number_padding() {
        assert_eq!(format_invoice_number("INV", 1), "INV-000001");
        assert_eq!(format_invoice_number("INV", 42), "INV-000042");
    }

    #[test]
    fn test_totals_back_out_vat() {
        let totals = InvoiceTotals::from_order(&order(11500), TaxRate::from_bps(1500));
        assert_eq!(totals.total_cents, 11500);
        assert_eq!(totals.tax_cents, 1500);
        assert_eq!(totals.subtotal_cents, 10000);

        let untaxed = InvoiceTotals::from_total(Money::from_cents(5000), TaxRate::zero());
        assert_eq!(untaxed.subtotal_cents, 5000);
        assert_eq!(untaxed.tax_cents, 0);
    }

    #[test]
    fn test_render_text_contains_lines_and_totals() {
        let detail = InvoiceDetail {
            invoice: Invoice {
                id: "i-1".into(),
                invoice_number: "INV-000007".into(),
                order_id: "o-1".into(),
                customer_id: None,
                business_profile_id: None,
                subtotal_cents: 10000,
                tax_cents: 1500,
                total_cents: 11500,
                status: InvoiceStatus::Issued,
                sent_to: None,
                sent_at: None,
                created_at: Utc::now(),
            },
            order: order(11500),
            items: vec![OrderItem {
                id: "it-1".into(),
                order_id: "o-1".into(),
                product_id: "p-1".into(),
                sku_snapshot: "HONEY-500".into(),
                name_snapshot: "Raw Honey 500g".into(),
                quantity: 1,
                unit_price_cents: 11500,
                cost_price_cents: 5000,
                line_total_cents: 11500,
                created_at: Utc::now(),
            }],
            customer: None,
            business: None,
        };

        let text = render_invoice_text(&detail);
        assert!(text.contains("TAX INVOICE INV-000007"));
        assert!(text.contains("Raw Honey 500g"));
        assert!(text.contains("R115.00"));
        assert!(text.contains("R15.00"));
        assert_eq!(invoice_subject(&detail), "Your order - Invoice INV-000007");
    }
}
