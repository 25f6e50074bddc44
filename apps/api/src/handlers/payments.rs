//! Payment, refund and provider-callback handlers.
//!
//! ## order-pay
//! ```text
//! {order_id, payment_method, amount_cents?, customer_email?, send_invoice?}
//!        │
//!        ├── cash / card / eft ──► completed payment ──► order paid ──► invoice?
//!        │
//!        └── yoco / payment_link ──► provider checkout ──► pending payment
//!                                          │                 (webhook completes it)
//!                                          └── payment_link: email the URL
//! ```

use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::services::delivery::{self, InvoiceDelivery};
use crate::services::payment_provider::{Checkout, CheckoutRequest};
use crate::AppState;
use harvest_core::validation::validate_email;
use harvest_core::{
    CoreError, Order, OrderDetail, OrderStatus, Payment, PaymentMethod, PaymentStatus, Role,
    ValidationError,
};
use harvest_db::{PaymentRequest, RefundRequest};

/// Header carrying the shared webhook secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

// =============================================================================
// order-pay
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    pub order_id: String,
    pub payment_method: String,
    #[serde(default)]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub send_invoice: bool,
}

#[derive(Debug, Serialize)]
pub struct PayResponse {
    pub order: Order,
    pub payment: Option<Payment>,
    /// Hosted checkout for provider methods.
    pub checkout_url: Option<String>,
    pub payment_link_sent_to: Option<String>,
    pub invoice: Option<InvoiceDelivery>,
}

/// POST /functions/v1/order-pay
pub async fn pay(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(body): ApiJson<PayRequest>,
) -> ApiResult<Json<PayResponse>> {
    user.require(Role::Staff)?;

    let order_id = body.order_id.trim();
    if order_id.is_empty() {
        return Err(ValidationError::required("order_id").into());
    }
    let method = PaymentMethod::parse(&body.payment_method)?;
    if let Some(email) = &body.customer_email {
        validate_email(email)?;
    }

    let mut request = PaymentRequest::new(method);
    request.amount_cents = body.amount_cents;
    request.actor = Some(user.user_id.clone());

    let checkout = if method.requires_provider() {
        let order = state.db.orders().get(order_id).await?;
        let checkout = open_checkout(&state, &order, body.amount_cents).await?;
        request.provider_reference = Some(checkout.id.clone());
        request.checkout_url = Some(checkout.redirect_url.clone());
        Some(checkout)
    } else {
        None
    };

    let outcome = state.db.orders().pay_order(order_id, &request).await?;

    let mut payment_link_sent_to = None;
    if let (PaymentMethod::PaymentLink, Some(checkout)) = (method, &checkout) {
        if let Some(to) = recipient(&state, &outcome.order, body.customer_email.as_deref()).await {
            match email_payment_link(&state, &outcome.order, &checkout.redirect_url, &to).await {
                Ok(()) => payment_link_sent_to = Some(to),
                Err(e) => {
                    tracing::warn!(order_id = %order_id, error = %e, "Payment link email failed")
                }
            }
        }
    }

    let invoice = if outcome.order_became_paid {
        let to = body.customer_email.as_deref();
        delivery::after_payment(&state, &outcome.order, body.send_invoice, to).await
    } else {
        None
    };

    Ok(Json(PayResponse {
        order: outcome.order,
        payment: outcome.payment,
        checkout_url: checkout.map(|c| c.redirect_url),
        payment_link_sent_to,
        invoice,
    }))
}

/// Creates a provider checkout for what is still owed on `order`.
///
/// The amount and status are checked before the provider is called so a
/// rejected payment never leaves a dangling checkout.
async fn open_checkout(
    state: &AppState,
    order: &Order,
    amount_cents: Option<i64>,
) -> ApiResult<Checkout> {
    let outstanding = state.db.orders().outstanding(&order.id).await?;
    if outstanding.is_zero() {
        return Err(CoreError::InvalidPaymentAmount {
            reason: "nothing to collect on a zero-total order".to_string(),
        }
        .into());
    }
    if let Some(amount) = amount_cents {
        if amount != outstanding.cents() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: format!(
                    "amount {} does not match outstanding balance {}",
                    amount,
                    outstanding.cents()
                ),
            }
            .into());
        }
    }

    let checkout = state
        .payments
        .create_checkout(&CheckoutRequest {
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            amount_cents: outstanding.cents(),
        })
        .await?;
    Ok(checkout)
}

/// Explicit address first, then the order's customer.
async fn recipient(state: &AppState, order: &Order, explicit: Option<&str>) -> Option<String> {
    if let Some(email) = explicit {
        return Some(email.to_string());
    }
    let customer_id = order.customer_id.as_deref()?;
    match state.db.customers().get(customer_id).await {
        Ok(customer) => customer.email,
        Err(e) => {
            tracing::warn!(order_id = %order.id, error = %e, "Could not load customer");
            None
        }
    }
}

async fn email_payment_link(
    state: &AppState,
    order: &Order,
    checkout_url: &str,
    to: &str,
) -> ApiResult<()> {
    let business = state.db.settings().get_default().await?;
    let email = delivery::payment_link_email(order, checkout_url, business.as_ref(), to);
    state.mailer.send(&email).await?;
    Ok(())
}

// =============================================================================
// send-payment-link
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PaymentLinkRequest {
    pub order_id: String,
    pub customer_email: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentLinkResponse {
    pub order_id: String,
    pub payment_id: Option<String>,
    pub checkout_url: String,
    pub sent_to: String,
}

/// POST /functions/v1/send-payment-link
///
/// Unlike order-pay, a mail failure here answers 502. The pending payment
/// stays; a retry opens a fresh checkout.
pub async fn send_link(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(body): ApiJson<PaymentLinkRequest>,
) -> ApiResult<Json<PaymentLinkResponse>> {
    user.require(Role::Staff)?;

    let order_id = body.order_id.trim();
    if order_id.is_empty() {
        return Err(ValidationError::required("order_id").into());
    }
    let to = body.customer_email.trim();
    validate_email(to)?;

    let order = state.db.orders().get(order_id).await?;
    let checkout = open_checkout(&state, &order, None).await?;

    let mut request = PaymentRequest::new(PaymentMethod::PaymentLink);
    request.provider_reference = Some(checkout.id.clone());
    request.checkout_url = Some(checkout.redirect_url.clone());
    request.actor = Some(user.user_id.clone());
    let outcome = state.db.orders().pay_order(order_id, &request).await?;

    email_payment_link(&state, &outcome.order, &checkout.redirect_url, to).await?;
    tracing::info!(order_id = %order_id, to = %to, "Payment link sent");

    Ok(Json(PaymentLinkResponse {
        order_id: order_id.to_string(),
        payment_id: outcome.payment.map(|p| p.id),
        checkout_url: checkout.redirect_url,
        sent_to: to.to_string(),
    }))
}

// =============================================================================
// order-refund
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub order_id: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub restock: bool,
}

/// POST /functions/v1/order-refund
pub async fn refund(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(body): ApiJson<RefundBody>,
) -> ApiResult<Json<OrderDetail>> {
    user.require(Role::Staff)?;

    let order_id = body.order_id.trim();
    if order_id.is_empty() {
        return Err(ValidationError::required("order_id").into());
    }

    let detail = state
        .db
        .orders()
        .refund_order(
            order_id,
            &RefundRequest {
                amount_cents: body.amount_cents,
                reason: body.reason,
                restock: body.restock,
                actor: Some(user.user_id.clone()),
            },
        )
        .await?;
    Ok(Json(detail))
}

// =============================================================================
// payment-webhook
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    pub provider_reference: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub order_id: String,
    pub order_status: OrderStatus,
    pub payment_status: Option<PaymentStatus>,
    pub invoice: Option<InvoiceDelivery>,
}

/// POST /functions/v1/payment-webhook
///
/// Called by the provider, not a signed-in user. When a webhook secret is
/// configured the `X-Webhook-Secret` header must match it. Repeated
/// deliveries of the same status are answered without changes.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<WebhookBody>,
) -> ApiResult<Json<WebhookResponse>> {
    if let Some(secret) = state.config.auth.webhook_secret.as_deref() {
        let presented = headers.get(WEBHOOK_SECRET_HEADER).and_then(|v| v.to_str().ok());
        if presented != Some(secret) {
            tracing::warn!(
                reference = %body.provider_reference,
                "Webhook with bad secret rejected"
            );
            return Err(ApiError::Unauthorized("Invalid webhook secret".to_string()));
        }
    }

    let reference = body.provider_reference.trim();
    if reference.is_empty() {
        return Err(ValidationError::required("provider_reference").into());
    }
    let status = PaymentStatus::from_provider(&body.status).ok_or_else(|| {
        ApiError::bad_request(format!("Unknown payment status: {}", body.status))
    })?;

    let outcome = state.db.orders().complete_payment(reference, status).await?;

    let invoice = if outcome.order_became_paid {
        delivery::after_payment(&state, &outcome.order, false, None).await
    } else {
        None
    };

    Ok(Json(WebhookResponse {
        order_id: outcome.order.id,
        order_status: outcome.order.status,
        payment_status: outcome.payment.map(|p| p.status),
        invoice,
    }))
}
