//! Error types for the HTTP layer.
//!
//! ## Status Mapping
//! ```text
//! ┌─────────────────────────────────────────────┬────────┐
//! │ Cause                                       │ Status │
//! ├─────────────────────────────────────────────┼────────┤
//! │ Validation, malformed JSON, bad refund sum  │  400   │
//! │ Missing / invalid bearer token              │  401   │
//! │ Role too low                                │  403   │
//! │ Unknown row or route                        │  404   │
//! │ Wrong HTTP method                           │  405   │
//! │ Order state, duplicates, concurrent update  │  409   │
//! │ Not enough stock                            │  422   │
//! │ Payment provider or mail API failed         │  502   │
//! │ Anything else (logged, message hidden)      │  500   │
//! └─────────────────────────────────────────────┴────────┘
//! ```
//!
//! Every error body is `{ "error": "<message>" }`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::mailer::MailError;
use crate::services::payment_provider::ProviderError;
use harvest_core::CoreError;
use harvest_db::DbError;

/// API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InsufficientStock(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                "Internal server error".to_string()
            }
            ApiError::Upstream(msg) => {
                tracing::warn!(error = %msg, "Upstream service failed");
                msg.clone()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ProductNotFound(_) | CoreError::OrderNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            CoreError::InsufficientStock { .. } => ApiError::InsufficientStock(err.to_string()),
            CoreError::InvalidOrderStatus { .. } => ApiError::Conflict(err.to_string()),
            CoreError::ProductInactive(_)
            | CoreError::RefundExceedsBalance { .. }
            | CoreError::InvalidPaymentAmount { .. }
            | CoreError::DiscountExceedsSubtotal { .. }
            | CoreError::Validation(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<harvest_core::ValidationError> for ApiError {
    fn from(err: harvest_core::ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            DbError::UniqueViolation { .. }
            | DbError::ForeignKeyViolation { .. }
            | DbError::CheckViolation { .. }
            | DbError::Conflict(_)
            | DbError::Busy(_) => ApiError::Conflict(err.to_string()),
            DbError::Core(core) => ApiError::from(core),
            DbError::Import(import) => ApiError::BadRequest(import.to_string()),
            DbError::PoolExhausted => ApiError::Internal("database pool exhausted".to_string()),
            DbError::ConnectionFailed(_)
            | DbError::MigrationFailed(_)
            | DbError::QueryFailed(_)
            | DbError::Internal(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<MailError> for ApiError {
    fn from(err: MailError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
