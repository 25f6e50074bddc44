//! CSV sales import handlers.
//!
//! The frontend uploads the vendor export as text, shows the preview, lets
//! the user map unmatched items to products, then commits.

use std::collections::HashMap;

use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::AppState;
use harvest_core::import::{ImportPreview, ImportResult};
use harvest_core::Role;

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub csv: String,
    /// External item key (SKU or name) to product id.
    #[serde(default)]
    pub mappings: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    pub csv: String,
    #[serde(default)]
    pub mappings: HashMap<String, String>,
    /// Import matched lines and drop the rest instead of refusing.
    #[serde(default)]
    pub skip_unmatched: bool,
}

/// POST /functions/v1/import-sales/preview
pub async fn preview(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(body): ApiJson<PreviewRequest>,
) -> ApiResult<Json<ImportPreview>> {
    user.require(Role::Staff)?;
    Ok(Json(state.db.imports().preview(&body.csv, &body.mappings).await?))
}

/// POST /functions/v1/import-sales
///
/// Receipts already imported are skipped, so re-uploading a file is safe.
pub async fn commit(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(body): ApiJson<CommitRequest>,
) -> ApiResult<Json<ImportResult>> {
    user.require(Role::Staff)?;
    let result = state
        .db
        .imports()
        .commit(&body.csv, &body.mappings, body.skip_unmatched)
        .await?;
    tracing::info!(
        user_id = %user.user_id,
        orders = result.orders_created,
        duplicates = result.duplicates_skipped,
        "Sales import committed"
    );
    Ok(Json(result))
}
