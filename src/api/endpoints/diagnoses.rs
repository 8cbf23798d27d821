//! ICD-10 catalogue and per-patient diagnoses.
//!
//! - `GET    /api/icd10/search?q=&category=&limit=`
//! - `GET    /api/icd10/categories`
//! - `GET    /api/icd10/templates`
//! - `GET | POST /api/patients/:id/diagnoses`
//! - `GET | PUT | DELETE /api/patients/:id/diagnoses/:diagnosis_id`
//! - `POST   /api/diagnosis-templates/:template_id/apply/:patient_id`
//! - `GET    /api/analytics/diagnoses`
//! - `POST   /api/admin/diagnosis-templates`: admin only

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::models::{CategoryCount, DiagnosisRecord, DiagnosisTemplate, Icd10Code};
use crate::practice::{
    self, DiagnosisAnalytics, DiagnosisUpdate, NewDiagnosis, TemplateApplication, TemplateInput,
};

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub category: Option<String>,
    pub limit: Option<usize>,
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// `GET /api/icd10/search`
pub async fn search(
    State(ctx): State<ApiContext>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Icd10Code>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(practice::search_codes(
        &conn,
        &query.q,
        query.category.as_deref(),
        query.limit,
    )?))
}

/// `GET /api/icd10/categories`
pub async fn categories(State(ctx): State<ApiContext>) -> Result<Json<Vec<CategoryCount>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(practice::list_categories(&conn)?))
}

/// `GET /api/icd10/templates`
pub async fn templates(State(ctx): State<ApiContext>) -> Result<Json<Vec<DiagnosisTemplate>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(practice::list_templates(&conn)?))
}

pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<DiagnosisRecord>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(practice::list_diagnoses(&conn, &auth.user.id, &patient_id, today())?))
}

pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(patient_id): Path<Uuid>,
    Json(input): Json<NewDiagnosis>,
) -> Result<(StatusCode, Json<DiagnosisRecord>), ApiError> {
    let conn = ctx.core.open_db()?;
    let record = practice::add_diagnosis(&conn, &auth.user.id, &patient_id, input, today())?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path((patient_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DiagnosisRecord>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(practice::get_diagnosis(&conn, &auth.user.id, &patient_id, &id, today())?))
}

pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path((patient_id, id)): Path<(Uuid, Uuid)>,
    Json(update): Json<DiagnosisUpdate>,
) -> Result<Json<DiagnosisRecord>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(practice::update_diagnosis(
        &conn,
        &auth.user.id,
        &patient_id,
        &id,
        update,
        today(),
    )?))
}

pub async fn remove(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path((patient_id, id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    practice::delete_diagnosis(&conn, &auth.user.id, &patient_id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/diagnosis-templates/:template_id/apply/:patient_id`: body optional.
pub async fn apply_template(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path((template_id, patient_id)): Path<(i64, Uuid)>,
    input: Option<Json<TemplateApplication>>,
) -> Result<(StatusCode, Json<DiagnosisRecord>), ApiError> {
    let input = input.map(|Json(i)| i).unwrap_or_default();
    let conn = ctx.core.open_db()?;
    let record = practice::apply_template(&conn, &auth.user.id, template_id, &patient_id, input, today())?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /api/analytics/diagnoses`
pub async fn analytics(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<DiagnosisAnalytics>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(practice::diagnosis_analytics(&conn, &auth.user.id, today())?))
}

/// `POST /api/admin/diagnosis-templates`
pub async fn create_template(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<TemplateInput>,
) -> Result<(StatusCode, Json<DiagnosisTemplate>), ApiError> {
    let conn = ctx.core.open_db()?;
    let template = practice::create_template(&conn, &auth.user.id, input)?;
    tracing::info!(template_id = template.id, admin_id = %auth.user.id, "Diagnosis template created");
    Ok((StatusCode::CREATED, Json(template)))
}
