//! Patient progress and practice reports.
//!
//! - `POST /api/patients/:id/reports`: generate a progress report
//! - `GET  /api/patients/:id/reports`: list a patient's reports
//! - `GET | DELETE /api/reports/:id`
//! - `POST /api/reports/practice`: generate a practice report
//! - `GET  /api/reports/practice`: list practice reports
//!
//! Generation never holds a database connection while the LLM is working.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db::repository;
use crate::models::{PatientReport, PracticeReport};
use crate::reports;

/// `POST /api/patients/:id/reports`
pub async fn generate_patient(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(patient_id): Path<Uuid>,
) -> Result<(StatusCode, Json<PatientReport>), ApiError> {
    let draft = {
        let conn = ctx.core.open_db()?;
        let now = chrono::Local::now().naive_local();
        reports::draft_patient_report(&conn, ctx.core.field_key(), &auth.user, &patient_id, now)?
    };

    let written = reports::write_report(ctx.llm.as_deref(), draft).await;

    let conn = ctx.core.open_db()?;
    let report = reports::save_patient_report(&conn, &patient_id, written)?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// `GET /api/patients/:id/reports`
pub async fn list_patient(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<PatientReport>>, ApiError> {
    let conn = ctx.core.open_db()?;
    if !repository::patient_belongs_to(&conn, &auth.user.id, &patient_id)? {
        return Err(ApiError::NotFound(format!("patient not found: {patient_id}")));
    }
    Ok(Json(repository::list_patient_reports(&conn, &auth.user.id, &patient_id)?))
}

/// `GET /api/reports/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<PatientReport>, ApiError> {
    let conn = ctx.core.open_db()?;
    repository::get_patient_report(&conn, &auth.user.id, &id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("report not found: {id}")))
}

/// `DELETE /api/reports/:id`
pub async fn delete(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    if !repository::delete_patient_report(&conn, &auth.user.id, &id)? {
        return Err(ApiError::NotFound(format!("report not found: {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/reports/practice`
pub async fn generate_practice(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<(StatusCode, Json<PracticeReport>), ApiError> {
    let draft = {
        let conn = ctx.core.open_db()?;
        reports::draft_practice_report(&conn, &auth.user, chrono::Local::now().date_naive())?
    };

    let written = reports::write_report(ctx.llm.as_deref(), draft).await;

    let conn = ctx.core.open_db()?;
    let report = reports::save_practice_report(&conn, &auth.user.id, written)?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// `GET /api/reports/practice`
pub async fn list_practice(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<PracticeReport>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(repository::list_practice_reports(&conn, &auth.user.id)?))
}
