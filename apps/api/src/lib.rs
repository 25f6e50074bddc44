//! # harvest-api
//!
//! JSON function endpoints for the Harvest POS web frontend.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         API Request Flow                                │
//! │                                                                         │
//! │  CorsLayer ─► TraceLayer ─► 405/404 → JSON ─► Router                    │
//! │                                                 │                       │
//! │       ┌─────────────────────────────────────────┼──────────────────┐    │
//! │       │                                         │                  │    │
//! │  GET /health                     POST /functions/v1/payment-webhook│    │
//! │  (no auth)                       (provider secret, no JWT)         │    │
//! │                                                 │                  │    │
//! │                         /functions/v1/* ── require_auth (JWT)      │    │
//! │                                                 │                  │    │
//! │                 ┌───────────────┬───────────────┼───────────────┐  │    │
//! │                 ▼               ▼               ▼               ▼  │    │
//! │             orders        order-pay       products …       reports │    │
//! │                 │         order-refund          │                  │    │
//! │                 │               │               │                  │    │
//! │                 └───────────────┴──── harvest-db ──────────────────┘    │
//! │                                 │                                       │
//! │                     PaymentProvider · Mailer (traits)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Roles
//! - `viewer`: every `GET`
//! - `staff`: sales, stock, customers, events, invoices, imports
//! - `admin`: business settings, user roles, product delete

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod services;

use std::sync::Arc;

use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::JwtManager;
use crate::handlers::{
    batches, customers, events, health, imports, invoices, orders, payments, products, reports,
    roles, settings,
};
use crate::services::{Mailer, PaymentProvider};
use harvest_db::Database;

// Re-exports
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub jwt: Arc<JwtManager>,
    pub payments: Arc<dyn PaymentProvider>,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(
        db: Database,
        config: ApiConfig,
        payments: Arc<dyn PaymentProvider>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let jwt = JwtManager::new(&config.auth.jwt_secret, config.auth.token_lifetime_secs);
        AppState {
            db,
            jwt: Arc::new(jwt),
            payments,
            mailer,
            config: Arc::new(config),
        }
    }
}

/// Builds the full router with middleware.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        // Orders
        .route("/orders", get(orders::list).post(orders::create))
        .route("/orders/:id", get(orders::detail))
        .route("/orders/:id/cancel", post(orders::cancel))
        // Payments and refunds
        .route("/order-pay", post(payments::pay))
        .route("/order-refund", post(payments::refund))
        .route("/send-payment-link", post(payments::send_link))
        // Products and stock
        .route("/products", get(products::list).post(products::create))
        .route(
            "/products/:id",
            get(products::detail).put(products::update).delete(products::remove),
        )
        .route("/products/:id/movements", get(products::movements))
        .route("/product-batches", get(batches::list).post(batches::create))
        .route("/product-batches/:id", patch(batches::adjust).delete(batches::remove))
        // Invoices
        .route("/invoices", get(invoices::list).post(invoices::generate))
        .route("/invoices/:id", get(invoices::detail))
        .route("/invoices/:id/send", post(invoices::send))
        // Customers
        .route("/customers", get(customers::list).post(customers::create))
        .route(
            "/customers/:id",
            get(customers::detail).put(customers::update).delete(customers::remove),
        )
        // Market events
        .route("/market-events", get(events::list).post(events::create))
        .route("/market-events/calendar", get(events::calendar))
        .route(
            "/market-events/:id",
            get(events::detail).put(events::update).delete(events::remove),
        )
        // Reports
        .route("/reports/sales", get(reports::sales))
        .route("/reports/low-stock", get(reports::low_stock))
        .route("/reports/expiring", get(reports::expiring))
        // CSV import
        .route("/import-sales/preview", post(imports::preview))
        .route("/import-sales", post(imports::commit))
        // Administration
        .route("/business-settings", get(settings::list).post(settings::create))
        .route("/business-settings/:id", put(settings::update))
        .route("/user-roles", get(roles::list).post(roles::assign))
        .route("/user-roles/:id", delete(roles::revoke))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth));

    let functions = protected.route("/payment-webhook", post(payments::webhook));

    Router::new()
        .route("/health", get(health::health))
        .nest("/functions/v1", functions)
        .fallback(handlers::not_found)
        .layer(middleware::map_response(json_method_not_allowed))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .with_state(state)
}

/// axum answers a wrong method with an empty 405; give it the JSON body.
async fn json_method_not_allowed(response: Response) -> Response {
    if response.status() != StatusCode::METHOD_NOT_ALLOWED
        || response.headers().contains_key(CONTENT_TYPE)
    {
        return response;
    }

    let allow = response.headers().get(ALLOW).cloned();
    let mut replacement = ApiError::MethodNotAllowed.into_response();
    if let Some(allow) = allow {
        replacement.headers_mut().insert(ALLOW, allow);
    }
    replacement
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    if config.server.cors_origins.is_empty() {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
