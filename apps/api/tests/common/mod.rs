//! Shared harness for the HTTP contract tests.
//!
//! The router runs against an in-memory database with a fake payment
//! provider and a mailer that records what it was asked to send.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use harvest_api::config::ApiConfig;
use harvest_api::services::{
    Checkout, CheckoutRequest, Email, MailError, Mailer, PaymentProvider, ProviderError,
};
use harvest_api::{build_router, AppState};
use harvest_core::{NewUserRole, Role};
use harvest_db::{Database, DbConfig};

// ============================================================================
// Fakes
// ============================================================================

/// Hands out `chk_1`, `chk_2`, ... and remembers every request.
#[derive(Default)]
pub struct FakePaymentProvider {
    counter: AtomicUsize,
    requests: Arc<RwLock<Vec<CheckoutRequest>>>,
}

impl FakePaymentProvider {
    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests.read().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<Checkout, ProviderError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.write().unwrap().push(request.clone());
        Ok(Checkout {
            id: format!("chk_{n}"),
            redirect_url: format!("https://pay.example/checkout/chk_{n}"),
        })
    }
}

/// Records sent mail; fails every send when `failing` is set.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Arc<RwLock<Vec<Email>>>,
    failing: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        RecordingMailer {
            failing: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.read().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        if self.failing {
            return Err(MailError::Api {
                status: 503,
                message: "mail service unavailable".to_string(),
            });
        }
        self.sent.write().unwrap().push(email.clone());
        Ok(())
    }
}

// ============================================================================
// Test App
// ============================================================================

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub payments: Arc<FakePaymentProvider>,
    pub mailer: Arc<RecordingMailer>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_mailer(RecordingMailer::default()).await
    }

    pub async fn with_mailer(mailer: RecordingMailer) -> Self {
        Self::build(ApiConfig::default(), mailer).await
    }

    pub async fn with_config(config: ApiConfig) -> Self {
        Self::build(config, RecordingMailer::default()).await
    }

    async fn build(config: ApiConfig, mailer: RecordingMailer) -> Self {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let payments = Arc::new(FakePaymentProvider::default());
        let mailer = Arc::new(mailer);
        let state = AppState::new(db, config, payments.clone(), mailer.clone());
        let router = build_router(state.clone());
        TestApp {
            router,
            state,
            payments,
            mailer,
        }
    }

    /// Token for `user_id`, who is granted `role` first.
    pub async fn token(&self, user_id: &str, role: Role) -> String {
        self.state
            .db
            .roles()
            .assign(&NewUserRole {
                user_id: user_id.to_string(),
                role,
            })
            .await
            .unwrap();
        self.state.jwt.generate_token(user_id, None).unwrap()
    }

    pub async fn staff(&self) -> String {
        self.token("staff-1", Role::Staff).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(token), Some(body)).await
    }

    // ------------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------------

    /// Creates a product and returns its id.
    pub async fn product(&self, token: &str, sku: &str, price_cents: i64) -> String {
        let (status, body) = self
            .post(
                "/functions/v1/products",
                token,
                serde_json::json!({
                    "sku": sku,
                    "name": format!("Product {sku}"),
                    "unit_price_cents": price_cents,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn batch(&self, token: &str, product_id: &str, quantity: i64) -> String {
        let (status, body) = self
            .post(
                "/functions/v1/product-batches",
                token,
                serde_json::json!({
                    "product_id": product_id,
                    "quantity": quantity,
                    "expiry_date": "2099-01-31",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    /// Creates a pending order for `quantity` units and returns the order JSON.
    pub async fn order(&self, token: &str, product_id: &str, quantity: i64) -> Value {
        let (status, body) = self
            .post(
                "/functions/v1/orders",
                token,
                serde_json::json!({
                    "items": [{ "product_id": product_id, "quantity": quantity }],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["order"].clone()
    }

    /// Stocked product plus a pending order for two units of it.
    pub async fn pending_order(&self, token: &str) -> Value {
        let product_id = self.product(token, "HONEY-500", 8500).await;
        self.batch(token, &product_id, 10).await;
        self.order(token, &product_id, 2).await
    }
}
