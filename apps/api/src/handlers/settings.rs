//! Business profile handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::AppState;
use harvest_core::{BusinessSettings, BusinessSettingsUpdate, NewBusinessSettings, Role};

/// GET /functions/v1/business-settings
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<BusinessSettings>>> {
    user.require(Role::Viewer)?;
    Ok(Json(state.db.settings().list().await?))
}

/// POST /functions/v1/business-settings
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewBusinessSettings>,
) -> ApiResult<(StatusCode, Json<BusinessSettings>)> {
    user.require(Role::Admin)?;
    let profile = state.db.settings().create(&input).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// PUT /functions/v1/business-settings/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<BusinessSettingsUpdate>,
) -> ApiResult<Json<BusinessSettings>> {
    user.require(Role::Admin)?;
    Ok(Json(state.db.settings().update(&id, &update).await?))
}
