//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub version: &'static str,
}

/// `GET /api/health`: liveness plus a database round-trip.
pub async fn check(State(ctx): State<ApiContext>) -> Result<Json<HealthResponse>, ApiError> {
    let database = ctx
        .core
        .open_db()
        .map(|conn| conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)).is_ok())
        .unwrap_or(false);

    Ok(Json(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
        version: crate::config::APP_VERSION,
    }))
}
