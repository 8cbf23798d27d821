//! Financial settings and the yearly report.
//!
//! - `GET  /api/finance/settings`: settings, brackets and fixed costs
//! - `PUT  /api/finance/settings`
//! - `PUT  /api/finance/brackets`: replace the contribution table
//! - `GET | POST /api/finance/fixed-costs`, `DELETE /api/finance/fixed-costs/:id`
//! - `GET  /api/finance/report?year=`: months, quarters and the year

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db::repository;
use crate::finance::{self, YearReport};
use crate::models::{ContributionBracket, FinancialSettings, FixedCost};

#[derive(Serialize)]
pub struct FinanceSetup {
    pub settings: FinancialSettings,
    pub brackets: Vec<ContributionBracket>,
    pub fixed_costs: Vec<FixedCost>,
}

#[derive(Deserialize)]
pub struct NewFixedCost {
    pub description: String,
    pub monthly_amount: f64,
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub year: Option<i32>,
}

fn load_setup(conn: &rusqlite::Connection, user_id: &Uuid) -> Result<FinanceSetup, ApiError> {
    Ok(FinanceSetup {
        settings: repository::get_financial_settings(conn, user_id)?,
        brackets: repository::list_brackets(conn, user_id)?,
        fixed_costs: repository::list_fixed_costs(conn, user_id)?,
    })
}

/// `GET /api/finance/settings`
pub async fn settings(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<FinanceSetup>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(load_setup(&conn, &auth.user.id)?))
}

/// `PUT /api/finance/settings`
pub async fn save_settings(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(settings): Json<FinancialSettings>,
) -> Result<Json<FinanceSetup>, ApiError> {
    let conn = ctx.core.open_db()?;
    finance::save_settings(&conn, &auth.user.id, &settings)?;
    tracing::info!(user_id = %auth.user.id, "Financial settings saved");
    Ok(Json(load_setup(&conn, &auth.user.id)?))
}

/// `PUT /api/finance/brackets`
pub async fn save_brackets(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(brackets): Json<Vec<ContributionBracket>>,
) -> Result<Json<Vec<ContributionBracket>>, ApiError> {
    let conn = ctx.core.open_db()?;
    finance::save_brackets(&conn, &auth.user.id, &brackets)?;
    Ok(Json(repository::list_brackets(&conn, &auth.user.id)?))
}

/// `GET /api/finance/fixed-costs`
pub async fn fixed_costs(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<FixedCost>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(repository::list_fixed_costs(&conn, &auth.user.id)?))
}

/// `POST /api/finance/fixed-costs`
pub async fn add_fixed_cost(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<NewFixedCost>,
) -> Result<(StatusCode, Json<FixedCost>), ApiError> {
    let conn = ctx.core.open_db()?;
    let cost = finance::add_fixed_cost(&conn, &auth.user.id, &req.description, req.monthly_amount)?;
    Ok((StatusCode::CREATED, Json(cost)))
}

/// `DELETE /api/finance/fixed-costs/:id`
pub async fn delete_fixed_cost(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    if !repository::delete_fixed_cost(&conn, &auth.user.id, &id)? {
        return Err(ApiError::NotFound(format!("fixed cost not found: {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/finance/report?year=`: defaults to the current year.
pub async fn report(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<YearReport>, ApiError> {
    let year = query.year.unwrap_or_else(|| chrono::Local::now().year());
    let conn = ctx.core.open_db()?;
    Ok(Json(finance::financial_year(&conn, &auth.user.id, year)?))
}
