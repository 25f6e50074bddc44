//! Product batch handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery};
use crate::AppState;
use harvest_core::{BatchAdjustment, NewBatch, ProductBatch, Role};

#[derive(Debug, Default, Deserialize)]
pub struct BatchQuery {
    pub product_id: Option<String>,
}

/// GET /functions/v1/product-batches?product_id=
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiQuery(query): ApiQuery<BatchQuery>,
) -> ApiResult<Json<Vec<ProductBatch>>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.batches().list(query.product_id.as_deref()).await?))
}

/// POST /functions/v1/product-batches
///
/// 400 for a negative quantity, 404 for an unknown product.
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewBatch>,
) -> ApiResult<(StatusCode, Json<ProductBatch>)> {
    user.require(Role::Staff)?;
    let batch = state.db.batches().create(&input).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

/// PATCH /functions/v1/product-batches/:id
///
/// Sets the counted quantity; the difference is logged as an adjustment.
pub async fn adjust(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(adjustment): ApiJson<BatchAdjustment>,
) -> ApiResult<Json<ProductBatch>> {
    user.require(Role::Staff)?;
    Ok(Json(state.db.batches().adjust(&id, &adjustment).await?))
}

/// DELETE /functions/v1/product-batches/:id
pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    user.require(Role::Staff)?;
    state.db.batches().remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
