//! Product and stock-movement handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery};
use crate::handlers::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::AppState;
use harvest_core::{NewProduct, ProductDetail, ProductUpdate, ProductWithStock, Role, StockMovement};

/// Movements returned when no limit is given.
const DEFAULT_MOVEMENT_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    #[serde(default)]
    pub include_inactive: bool,
    pub search: Option<String>,
    pub limit: Option<i64>,
}

/// GET /functions/v1/products?include_inactive=&search=&limit=
///
/// Every row carries its total stock and low-stock flag.
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiQuery(query): ApiQuery<ProductQuery>,
) -> ApiResult<Json<Vec<ProductWithStock>>> {
    user.require(Role::Viewer)?;

    let products = match query.search.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(search) => {
            let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
            state.db.products().search(search, limit).await?
        }
        None => state.db.products().list(query.include_inactive).await?,
    };
    Ok(Json(products))
}

/// POST /functions/v1/products
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewProduct>,
) -> ApiResult<(StatusCode, Json<ProductWithStock>)> {
    user.require(Role::Staff)?;
    let product = state.db.products().create(&input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// GET /functions/v1/products/:id
pub async fn detail(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProductDetail>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.products().get_detail(&id).await?))
}

/// PUT /functions/v1/products/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<ProductUpdate>,
) -> ApiResult<Json<ProductWithStock>> {
    user.require(Role::Staff)?;
    Ok(Json(state.db.products().update(&id, &update).await?))
}

/// DELETE /functions/v1/products/:id
///
/// Soft delete; past orders keep their snapshots.
pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    user.require(Role::Admin)?;
    state.db.products().deactivate(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct MovementQuery {
    pub limit: Option<i64>,
}

/// GET /functions/v1/products/:id/movements
pub async fn movements(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<MovementQuery>,
) -> ApiResult<Json<Vec<StockMovement>>> {
    user.require(Role::Viewer)?;

    // 404 for an unknown product rather than an empty trail.
    state.db.products().get(&id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_MOVEMENT_LIMIT).clamp(1, 1000);
    Ok(Json(state.db.batches().movements(&id, limit).await?))
}
