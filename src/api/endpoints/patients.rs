//! Patient endpoints.
//!
//! - `GET    /api/patients`: list (status filter, free-text search)
//! - `POST   /api/patients`: create, subject to the plan's patient limit
//! - `GET    /api/patients/search?q=`: quick search
//! - `POST   /api/patients/bulk-status`, `/api/patients/bulk-delete`
//! - `GET | PUT | DELETE /api/patients/:id`
//! - `PUT    /api/patients/:id/status`
//! - `GET    /api/patients/:id/treatments`
//! - `POST   /api/patients/:id/mark-past-completed`

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db::repository;
use crate::models::{Patient, PatientFilter, PatientStatus, Treatment};
use crate::practice::{self, BulkOutcome, PatientInput};

#[derive(Deserialize)]
pub struct PatientListQuery {
    pub status: Option<PatientStatus>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Serialize)]
pub struct PatientDetail {
    #[serde(flatten)]
    pub patient: Patient,
    pub treatments: Vec<Treatment>,
}

#[derive(Deserialize)]
pub struct StatusChange {
    pub status: PatientStatus,
}

#[derive(Deserialize)]
pub struct BulkStatusRequest {
    pub ids: Vec<Uuid>,
    pub status: PatientStatus,
}

#[derive(Deserialize)]
pub struct BulkIds {
    pub ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct MarkedCompleted {
    pub updated: usize,
}

/// `GET /api/patients`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<PatientListQuery>,
) -> Result<Json<Vec<Patient>>, ApiError> {
    let conn = ctx.core.open_db()?;
    let filter = PatientFilter {
        status: query.status,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };
    let patients = repository::list_patients(&conn, ctx.core.field_key(), &auth.user.id, &filter)?;
    Ok(Json(patients))
}

/// `GET /api/patients/search?q=`
pub async fn search(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Patient>>, ApiError> {
    let term = query.q.trim();
    if term.is_empty() {
        return Ok(Json(Vec::new()));
    }
    let conn = ctx.core.open_db()?;
    let filter = PatientFilter {
        status: None,
        search: Some(term.to_string()),
    };
    let patients = repository::list_patients(&conn, ctx.core.field_key(), &auth.user.id, &filter)?;
    Ok(Json(patients))
}

/// `POST /api/patients`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<PatientInput>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let conn = ctx.core.open_db()?;
    let patient = practice::create_patient(&conn, ctx.core.field_key(), &auth.user, input)?;
    Ok((StatusCode::CREATED, Json(patient)))
}

/// `GET /api/patients/:id`: patient plus their sessions, newest first.
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<PatientDetail>, ApiError> {
    let conn = ctx.core.open_db()?;
    let patient = repository::get_patient(&conn, ctx.core.field_key(), &auth.user.id, &id)?
        .ok_or_else(|| ApiError::NotFound(format!("patient not found: {id}")))?;
    let treatments = repository::list_patient_treatments(&conn, &id)?;
    Ok(Json(PatientDetail { patient, treatments }))
}

/// `PUT /api/patients/:id`
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<PatientInput>,
) -> Result<Json<Patient>, ApiError> {
    let conn = ctx.core.open_db()?;
    let patient = practice::update_patient(&conn, ctx.core.field_key(), &auth.user.id, &id, input)?;
    Ok(Json(patient))
}

/// `DELETE /api/patients/:id`: removes sessions, rules, reports and consents too.
pub async fn delete(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    practice::delete_patient(&conn, &auth.user.id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/patients/:id/status`
pub async fn set_status(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusChange>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    practice::set_patient_status(&conn, &auth.user.id, &id, req.status)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/patients/bulk-status`
pub async fn bulk_status(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<BulkStatusRequest>,
) -> Result<Json<BulkOutcome>, ApiError> {
    if req.ids.is_empty() {
        return Err(ApiError::BadRequest("no patients selected".into()));
    }
    let conn = ctx.core.open_db()?;
    let outcome = practice::bulk_update_patient_status(&conn, &auth.user.id, &req.ids, req.status)?;
    Ok(Json(outcome))
}

/// `POST /api/patients/bulk-delete`
pub async fn bulk_delete(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<BulkIds>,
) -> Result<Json<BulkOutcome>, ApiError> {
    if req.ids.is_empty() {
        return Err(ApiError::BadRequest("no patients selected".into()));
    }
    let conn = ctx.core.open_db()?;
    let outcome = practice::bulk_delete_patients(&conn, &auth.user.id, &req.ids)?;
    Ok(Json(outcome))
}

/// `GET /api/patients/:id/treatments`
pub async fn treatments(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Treatment>>, ApiError> {
    let conn = ctx.core.open_db()?;
    if !repository::patient_belongs_to(&conn, &auth.user.id, &id)? {
        return Err(ApiError::NotFound(format!("patient not found: {id}")));
    }
    Ok(Json(repository::list_patient_treatments(&conn, &id)?))
}

/// `POST /api/patients/:id/mark-past-completed`
pub async fn mark_past_completed(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<MarkedCompleted>, ApiError> {
    let conn = ctx.core.open_db()?;
    let now = chrono::Local::now().naive_local();
    let updated = practice::mark_patient_past_completed(&conn, &auth.user.id, &id, now)?;
    Ok(Json(MarkedCompleted { updated }))
}
