//! Customer handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery};
use crate::handlers::Page;
use crate::AppState;
use harvest_core::{Customer, CustomerDetail, NewCustomer, Role};

#[derive(Debug, Default, Deserialize)]
pub struct CustomerQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /functions/v1/customers?search=&limit=&offset=
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiQuery(query): ApiQuery<CustomerQuery>,
) -> ApiResult<Json<Vec<Customer>>> {
    user.require(Role::Viewer)?;
    let page = Page {
        limit: query.limit,
        offset: query.offset,
    };
    let customers = state
        .db
        .customers()
        .list(query.search.as_deref(), page.limit(), page.offset())
        .await?;
    Ok(Json(customers))
}

/// POST /functions/v1/customers
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewCustomer>,
) -> ApiResult<(StatusCode, Json<Customer>)> {
    user.require(Role::Staff)?;
    let customer = state.db.customers().create(&input).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

/// GET /functions/v1/customers/:id
///
/// Includes lifetime spend (net of refunds) and recent orders.
pub async fn detail(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<CustomerDetail>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.customers().get_detail(&id).await?))
}

/// PUT /functions/v1/customers/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<NewCustomer>,
) -> ApiResult<Json<Customer>> {
    user.require(Role::Staff)?;
    Ok(Json(state.db.customers().update(&id, &input).await?))
}

/// DELETE /functions/v1/customers/:id
pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    user.require(Role::Staff)?;
    state.db.customers().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
