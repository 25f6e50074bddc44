//! Payment provider client.
//!
//! ## Checkout Flow
//! ```text
//! order-pay (yoco / payment_link)
//!     │
//!     ├──► POST {base}/checkouts      Authorization: Bearer <secret key>
//!     │        { amount, currency, metadata: { orderId, orderNumber } }
//!     │    ◄── { id, redirectUrl }
//!     │
//!     ├──► pending payment row (provider_reference = id)
//!     │
//!     ▼
//! customer pays on redirectUrl ──► provider ──► POST /payment-webhook
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::YocoConfig;

/// Payment provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Payment provider not configured")]
    NotConfigured,

    #[error("Payment provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Payment provider error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Payment provider rejected the secret key")]
    Unauthorized,
}

/// What to charge.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub order_id: String,
    pub order_number: String,
    pub amount_cents: i64,
}

/// A created hosted checkout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkout {
    pub id: String,
    pub redirect_url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<Checkout, ProviderError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutBody<'a> {
    amount: i64,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    success_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cancel_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_url: Option<&'a str>,
    metadata: CheckoutMetadata<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutMetadata<'a> {
    order_id: &'a str,
    order_number: &'a str,
}

/// Yoco online checkout client.
pub struct YocoClient {
    http: Client,
    config: YocoConfig,
}

impl YocoClient {
    pub fn new(config: YocoConfig) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(YocoClient { http, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl PaymentProvider for YocoClient {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<Checkout, ProviderError> {
        let secret_key = self
            .config
            .secret_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured)?;

        let body = CheckoutBody {
            amount: request.amount_cents,
            currency: &self.config.currency,
            success_url: self.config.success_url.as_deref(),
            cancel_url: self.config.cancel_url.as_deref(),
            failure_url: self.config.failure_url.as_deref(),
            metadata: CheckoutMetadata {
                order_id: &request.order_id,
                order_number: &request.order_number,
            },
        };

        let response = self
            .http
            .post(self.api_url("/checkouts"))
            .bearer_auth(secret_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let checkout: Checkout = response.json().await?;
            tracing::info!(
                order_id = %request.order_id,
                checkout_id = %checkout.id,
                "Checkout created"
            );
            Ok(checkout)
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            Err(ProviderError::Unauthorized)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_body_shape() {
        let body = CheckoutBody {
            amount: 11500,
            currency: "ZAR",
            success_url: Some("https://shop.example/paid"),
            cancel_url: None,
            failure_url: None,
            metadata: CheckoutMetadata {
                order_id: "o-1",
                order_number: "ORD-20240302-ABC123",
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["amount"], 11500);
        assert_eq!(json["successUrl"], "https://shop.example/paid");
        assert!(json.get("cancelUrl").is_none());
        assert_eq!(json["metadata"]["orderId"], "o-1");
    }

    #[test]
    fn test_checkout_response_parses() {
        let body =
            r#"{"id":"ch_123","redirectUrl":"https://c.yoco.com/ch_123","status":"created"}"#;
        let checkout: Checkout = serde_json::from_str(body).unwrap();
        assert_eq!(checkout.id, "ch_123");
        assert_eq!(checkout.redirect_url, "https://c.yoco.com/ch_123");
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let client = YocoClient::new(YocoConfig::default()).unwrap();
        let err = client
            .create_checkout(&CheckoutRequest {
                order_id: "o-1".into(),
                order_number: "ORD-1".into(),
                amount_cents: 100,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured));
    }
}
