//! Report handlers.

use axum::extract::State;
use axum::{Extension, Json};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::ApiQuery;
use crate::AppState;
use harvest_core::report::{ExpiringBatch, SalesSummary};
use harvest_core::{ProductWithStock, Role, ValidationError};

/// Look-ahead for the expiring report when `days` is omitted.
pub const DEFAULT_EXPIRY_WINDOW_DAYS: i64 = 14;
const MAX_EXPIRY_WINDOW_DAYS: i64 = 365;

#[derive(Debug, Deserialize)]
pub struct SalesQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// GET /functions/v1/reports/sales?from=&to=
pub async fn sales(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiQuery(range): ApiQuery<SalesQuery>,
) -> ApiResult<Json<SalesSummary>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.reports().sales_summary(range.from, range.to).await?))
}

/// GET /functions/v1/reports/low-stock
pub async fn low_stock(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<ProductWithStock>>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.reports().low_stock().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpiringQuery {
    pub days: Option<i64>,
}

/// GET /functions/v1/reports/expiring?days=
pub async fn expiring(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiQuery(query): ApiQuery<ExpiringQuery>,
) -> ApiResult<Json<Vec<ExpiringBatch>>> {
    user.require(Role::Viewer)?;

    let days = query.days.unwrap_or(DEFAULT_EXPIRY_WINDOW_DAYS);
    if !(0..=MAX_EXPIRY_WINDOW_DAYS).contains(&days) {
        return Err(ValidationError::OutOfRange {
            field: "days".to_string(),
            min: 0,
            max: MAX_EXPIRY_WINDOW_DAYS,
        }
        .into());
    }

    let today = Utc::now().date_naive();
    Ok(Json(state.db.reports().expiring(today, days).await?))
}
