//! User role handlers. Admin only.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::AppState;
use harvest_core::{NewUserRole, Role, UserRoleAssignment};

/// GET /functions/v1/user-roles
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<UserRoleAssignment>>> {
    user.require(Role::Admin)?;
    Ok(Json(state.db.roles().list().await?))
}

/// POST /functions/v1/user-roles
pub async fn assign(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewUserRole>,
) -> ApiResult<(StatusCode, Json<UserRoleAssignment>)> {
    user.require(Role::Admin)?;
    let assignment = state.db.roles().assign(&input).await?;
    tracing::info!(
        by = %user.user_id,
        user_id = %assignment.user_id,
        role = %assignment.role,
        "Role granted"
    );
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// DELETE /functions/v1/user-roles/:id
///
/// The last admin cannot be revoked (409).
pub async fn revoke(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    user.require(Role::Admin)?;

    let assignment = state.db.roles().get(&id).await?;
    if assignment.role == Role::Admin && state.db.roles().admin_count().await? <= 1 {
        return Err(ApiError::Conflict("Cannot revoke the last admin".to_string()));
    }

    state.db.roles().revoke(&id).await?;
    tracing::info!(
        by = %user.user_id,
        user_id = %assignment.user_id,
        role = %assignment.role,
        "Role revoked"
    );
    Ok(StatusCode::NO_CONTENT)
}
