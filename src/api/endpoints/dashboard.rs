//! Dashboard and practice analytics.
//!
//! `GET /api/dashboard`: runs maintenance, then today's overview
//! `GET /api/analytics`: practice statistics over the last 12 months

use axum::extract::State;
use axum::{Extension, Json};

use crate::analytics::{self, Dashboard, PracticeStats};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};

/// `GET /api/dashboard`
pub async fn overview(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Dashboard>, ApiError> {
    let conn = ctx.core.open_db()?;
    let now = chrono::Local::now().naive_local();
    let dashboard = analytics::dashboard(&conn, &auth.user.id, now)?;
    Ok(Json(dashboard))
}

/// `GET /api/analytics`
pub async fn practice_stats(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<PracticeStats>, ApiError> {
    let conn = ctx.core.open_db()?;
    let today = chrono::Local::now().date_naive();
    let stats = analytics::practice_stats(&conn, &auth.user.id, today)?;
    Ok(Json(stats))
}
