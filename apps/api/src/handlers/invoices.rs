//! Invoice handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiQuery};
use crate::handlers::Page;
use crate::services::delivery;
use crate::AppState;
use harvest_core::validation::validate_email;
use harvest_core::{Invoice, InvoiceDetail, Role, ValidationError};

/// GET /functions/v1/invoices?limit=&offset=
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<Json<Vec<Invoice>>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.invoices().list(page.limit(), page.offset()).await?))
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub order_id: String,
}

/// POST /functions/v1/invoices
///
/// One invoice per paid order; a second request answers 409.
pub async fn generate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(body): ApiJson<GenerateRequest>,
) -> ApiResult<(StatusCode, Json<InvoiceDetail>)> {
    user.require(Role::Staff)?;

    let order_id = body.order_id.trim();
    if order_id.is_empty() {
        return Err(ValidationError::required("order_id").into());
    }
    let detail = state.db.invoices().generate(order_id).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// GET /functions/v1/invoices/:id
pub async fn detail(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<InvoiceDetail>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.invoices().detail(&id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    /// Defaults to the customer's email.
    #[serde(default)]
    pub to: Option<String>,
}

/// POST /functions/v1/invoices/:id/send
pub async fn send(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Option<ApiJson<SendRequest>>,
) -> ApiResult<Json<Invoice>> {
    user.require(Role::Staff)?;

    let request = body.map(|ApiJson(b)| b).unwrap_or_default();
    let detail = state.db.invoices().detail(&id).await?;

    let to = request
        .to
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| detail.customer.as_ref().and_then(|c| c.email.clone()))
        .ok_or_else(|| ApiError::bad_request("No email address for this invoice"))?;
    validate_email(&to)?;

    let invoice = delivery::send_invoice(&state, &detail, &to).await?;
    Ok(Json(invoice))
}
