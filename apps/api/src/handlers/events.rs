//! Market event handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery};
use crate::AppState;
use harvest_core::{CalendarEntry, MarketEvent, MarketEventDetail, NewMarketEvent, Role};

/// GET /functions/v1/market-events
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<MarketEvent>>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.events().list().await?))
}

/// POST /functions/v1/market-events
///
/// Single, multi-day and recurring events are expanded into event days.
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewMarketEvent>,
) -> ApiResult<(StatusCode, Json<MarketEventDetail>)> {
    user.require(Role::Staff)?;
    let detail = state.db.events().create(&input).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// GET /functions/v1/market-events/calendar?from=YYYY-MM-DD&to=YYYY-MM-DD
pub async fn calendar(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiQuery(range): ApiQuery<CalendarQuery>,
) -> ApiResult<Json<Vec<CalendarEntry>>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.events().calendar(range.from, range.to).await?))
}

/// GET /functions/v1/market-events/:id
pub async fn detail(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<MarketEventDetail>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.events().get_detail(&id).await?))
}

/// PUT /functions/v1/market-events/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<NewMarketEvent>,
) -> ApiResult<Json<MarketEventDetail>> {
    user.require(Role::Staff)?;
    Ok(Json(state.db.events().update(&id, &input).await?))
}

/// DELETE /functions/v1/market-events/:id
pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    user.require(Role::Staff)?;
    state.db.events().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
