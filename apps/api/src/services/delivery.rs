//! Invoice and payment-link delivery.
//!
//! ```text
//! order became paid ──► invoice wanted? ──no──► done
//!                        (send_invoice or       │
//!                         auto_send_invoice)    yes
//!                                               ▼
//!                                     ensure_for_order (one per order)
//!                                               │
//!                                     recipient known? ──no──► invoice only
//!                                               │ yes
//!                                               ▼
//!                                   mail ──ok──► mark_sent
//!                                     │
//!                                     └─err──► warn, payment unaffected
//! ```

use serde::Serialize;

use crate::error::ApiResult;
use crate::services::mailer::Email;
use crate::AppState;
use harvest_core::invoice::{invoice_subject, render_invoice_text};
use harvest_core::{BusinessSettings, Invoice, InvoiceDetail, Money, Order};

/// What happened to the invoice after a payment.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDelivery {
    pub invoice: Invoice,
    pub emailed_to: Option<String>,
}

/// Emails an invoice and marks it sent. Mail failures propagate.
pub async fn send_invoice(
    state: &AppState,
    detail: &InvoiceDetail,
    to: &str,
) -> ApiResult<Invoice> {
    let email = Email {
        to: to.to_string(),
        subject: invoice_subject(detail),
        text: render_invoice_text(detail),
    };
    state.mailer.send(&email).await?;
    Ok(state.db.invoices().mark_sent(&detail.invoice.id, to).await?)
}

/// Invoice side effect of an order becoming paid.
///
/// Never fails: the payment is already committed, so problems are logged.
pub async fn after_payment(
    state: &AppState,
    order: &Order,
    requested: bool,
    email: Option<&str>,
) -> Option<InvoiceDelivery> {
    let auto_send = match state.db.settings().get_default().await {
        Ok(profile) => profile.is_some_and(|p| p.auto_send_invoice),
        Err(e) => {
            tracing::error!(order_id = %order.id, error = %e, "Could not load business settings");
            false
        }
    };
    if !requested && !auto_send {
        return None;
    }

    let detail = match state.db.invoices().ensure_for_order(&order.id).await {
        Ok(detail) => detail,
        Err(e) => {
            tracing::error!(order_id = %order.id, error = %e, "Invoice generation failed");
            return None;
        }
    };

    let recipient = email
        .map(str::to_string)
        .or_else(|| detail.customer.as_ref().and_then(|c| c.email.clone()));

    let Some(to) = recipient else {
        tracing::debug!(order_id = %order.id, "No email address; invoice not sent");
        return Some(InvoiceDelivery {
            invoice: detail.invoice,
            emailed_to: None,
        });
    };

    match send_invoice(state, &detail, &to).await {
        Ok(invoice) => Some(InvoiceDelivery {
            invoice,
            emailed_to: Some(to),
        }),
        Err(e) => {
            tracing::warn!(
                order_id = %order.id,
                invoice = %detail.invoice.invoice_number,
                error = %e,
                "Invoice email failed"
            );
            Some(InvoiceDelivery {
                invoice: detail.invoice,
                emailed_to: None,
            })
        }
    }
}

/// Email carrying a checkout link.
pub fn payment_link_email(
    order: &Order,
    checkout_url: &str,
    business: Option<&BusinessSettings>,
    to: &str,
) -> Email {
    let sender = business.map(|b| b.business_name.as_str()).unwrap_or("Harvest POS");
    let text = format!(
        "Hello,\n\n\
         {sender} has sent you a payment request for order {number}.\n\n\
         Amount due: {amount}\n\n\
         Pay securely here:\n{checkout_url}\n\n\
         Thank you!\n",
        number = order.order_number,
        amount = Money::from_cents(order.total_cents),
    );

    Email {
        to: to.to_string(),
        subject: format!("{sender} - Payment request for order {}", order.order_number),
        text,
    }
}
