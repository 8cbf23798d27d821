//! Treatment (session) endpoints.
//!
//! - `GET  /api/treatments`: list with patient/status/date filters
//! - `POST /api/treatments`: create with trigger points
//! - `POST /api/treatments/bulk-update`: set fields on many sessions
//! - `GET | PUT | DELETE /api/treatments/:id`
//! - `PUT  /api/treatments/:id/status`

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::NaiveDateTime;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db::repository;
use crate::models::{Treatment, TreatmentDetail, TreatmentFilter, TreatmentStatus};
use crate::practice::{self, BulkOutcome, TreatmentInput, TreatmentPatch};

#[derive(Deserialize)]
pub struct TreatmentListQuery {
    pub patient_id: Option<Uuid>,
    pub status: Option<TreatmentStatus>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

#[derive(Deserialize)]
pub struct StatusChange {
    pub status: TreatmentStatus,
}

#[derive(Deserialize)]
pub struct BulkUpdateRequest {
    pub ids: Vec<Uuid>,
    #[serde(flatten)]
    pub patch: TreatmentPatch,
}

/// `GET /api/treatments`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<TreatmentListQuery>,
) -> Result<Json<Vec<Treatment>>, ApiError> {
    let conn = ctx.core.open_db()?;
    let filter = TreatmentFilter {
        patient_id: query.patient_id,
        status: query.status,
        from: query.from,
        to: query.to,
    };
    Ok(Json(repository::list_treatments(&conn, &auth.user.id, &filter)?))
}

/// `POST /api/treatments`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<TreatmentInput>,
) -> Result<(StatusCode, Json<TreatmentDetail>), ApiError> {
    let conn = ctx.core.open_db()?;
    let detail = practice::create_treatment(&conn, &auth.user.id, input)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// `GET /api/treatments/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<TreatmentDetail>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(practice::get_treatment_detail(&conn, &auth.user.id, &id)?))
}

/// `PUT /api/treatments/:id`: `patient_id` in the body is ignored.
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<TreatmentInput>,
) -> Result<Json<TreatmentDetail>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(practice::update_treatment(&conn, &auth.user.id, &id, input)?))
}

/// `DELETE /api/treatments/:id`
pub async fn delete(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    practice::delete_treatment(&conn, &auth.user.id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/treatments/:id/status`
pub async fn set_status(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusChange>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    practice::set_treatment_status(&conn, &auth.user.id, &id, req.status)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/treatments/bulk-update`
pub async fn bulk_update(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<BulkUpdateRequest>,
) -> Result<Json<BulkOutcome>, ApiError> {
    if req.ids.is_empty() {
        return Err(ApiError::BadRequest("no treatments selected".into()));
    }
    let conn = ctx.core.open_db()?;
    let outcome = practice::bulk_update_treatments(&conn, &auth.user.id, &req.ids, &req.patch)?;
    Ok(Json(outcome))
}
