//! Order handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery};
use crate::AppState;
use harvest_core::{NewOrder, Order, OrderDetail, OrderFilter, Role};

/// GET /functions/v1/orders?status=&customer_id=&market_event_id=&from=&to=&limit=&offset=
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiQuery(filter): ApiQuery<OrderFilter>,
) -> ApiResult<Json<Vec<Order>>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.orders().list(&filter).await?))
}

/// POST /functions/v1/orders
///
/// Deducts stock FIFO by expiry; answers 422 when any line cannot be
/// covered, in which case nothing is written.
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewOrder>,
) -> ApiResult<(StatusCode, Json<OrderDetail>)> {
    user.require(Role::Staff)?;
    let detail = state.db.orders().create_order(&input, Some(&user.user_id)).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// GET /functions/v1/orders/:id
pub async fn detail(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<OrderDetail>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.orders().get_detail(&id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /functions/v1/orders/:id/cancel
///
/// Only pending orders without a completed payment; stock goes back to the
/// batches it came from. The body is optional.
pub async fn cancel(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Option<ApiJson<CancelRequest>>,
) -> ApiResult<Json<OrderDetail>> {
    user.require(Role::Staff)?;
    let request = body.map(|ApiJson(b)| b).unwrap_or_default();
    let detail = state
        .db
        .orders()
        .cancel_order(&id, request.reason.as_deref(), Some(&user.user_id))
        .await?;
    Ok(Json(detail))
}
