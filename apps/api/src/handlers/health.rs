//! Liveness and database check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: bool,
    /// False when the binary knows migrations the store has not applied.
    pub schema_current: bool,
    pub server_time: String,
}

/// GET /health
///
/// 200 when the database answers, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = state.db.health_check().await;
    let schema_current = database
        && match state.db.schema_status().await {
            Ok(status) => status.is_current(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read schema status");
                false
            }
        };
    let (code, status) = if database {
        (StatusCode::OK, "ok")
    } else {
        tracing::warn!("Health check failed: database unreachable");
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            database,
            schema_current,
            server_time: Utc::now().to_rfc3339(),
        }),
    )
}
