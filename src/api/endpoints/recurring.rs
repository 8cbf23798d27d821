//! Recurring appointment rules.
//!
//! - `GET  /api/recurring`: rules with patient names (`?active_only=true`)
//! - `POST /api/recurring`: create
//! - `GET | PUT | DELETE /api/recurring/:id`
//! - `POST /api/recurring/:id/deactivate`
//! - `GET  /api/recurring/:id/next`: next occurrence from now
//! - `POST /api/recurring/:id/materialize`: turn one occurrence into a session

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db::repository;
use crate::models::{PaymentMethod, RecurrenceType, RecurringAppointment, Treatment};
use crate::scheduling;

#[derive(Deserialize)]
pub struct RuleListQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Serialize)]
pub struct RuleView {
    #[serde(flatten)]
    pub rule: RecurringAppointment,
    pub patient_name: String,
}

#[derive(Deserialize)]
pub struct RuleInput {
    pub patient_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub recurrence_type: RecurrenceType,
    pub time_of_day: NaiveTime,
    pub treatment_type: String,
    pub notes: Option<String>,
    pub location_id: Option<Uuid>,
    pub provider: Option<String>,
    pub fee_charged: Option<f64>,
    pub payment_method: Option<PaymentMethod>,
    pub is_active: Option<bool>,
}

impl RuleInput {
    fn apply(self, rule: &mut RecurringAppointment) -> Result<(), ApiError> {
        if self.treatment_type.trim().is_empty() {
            return Err(ApiError::BadRequest("treatment_type must not be empty".into()));
        }
        if self.fee_charged.is_some_and(|f| !(f.is_finite() && f >= 0.0)) {
            return Err(ApiError::BadRequest("fee_charged must not be negative".into()));
        }
        rule.patient_id = self.patient_id;
        rule.start_date = self.start_date;
        rule.end_date = self.end_date;
        rule.recurrence_type = self.recurrence_type;
        rule.time_of_day = self.time_of_day;
        rule.treatment_type = self.treatment_type.trim().to_string();
        rule.notes = self.notes.filter(|n| !n.trim().is_empty());
        rule.location_id = self.location_id;
        rule.provider = self.provider.filter(|p| !p.trim().is_empty());
        rule.fee_charged = self.fee_charged;
        rule.payment_method = self.payment_method;
        if let Some(active) = self.is_active {
            rule.is_active = active;
        }
        rule.updated_at = chrono::Local::now().naive_local();
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct MaterializeRequest {
    #[serde(alias = "date")]
    pub datetime: NaiveDateTime,
}

#[derive(Serialize)]
pub struct MaterializeResponse {
    pub treatment: Treatment,
    pub created: bool,
}

#[derive(Serialize)]
pub struct NextOccurrence {
    pub next: Option<NaiveDateTime>,
}

fn load_rule(
    conn: &rusqlite::Connection,
    user_id: &Uuid,
    id: &Uuid,
) -> Result<RecurringAppointment, ApiError> {
    repository::get_recurring(conn, user_id, id)?
        .ok_or_else(|| ApiError::NotFound(format!("recurring appointment not found: {id}")))
}

/// `GET /api/recurring`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<RuleListQuery>,
) -> Result<Json<Vec<RuleView>>, ApiError> {
    let conn = ctx.core.open_db()?;
    let rules = repository::list_recurring(&conn, &auth.user.id, query.active_only)?
        .into_iter()
        .map(|(rule, patient_name)| RuleView { rule, patient_name })
        .collect();
    Ok(Json(rules))
}

/// `POST /api/recurring`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<RuleInput>,
) -> Result<(StatusCode, Json<RecurringAppointment>), ApiError> {
    let mut rule = RecurringAppointment::new(
        input.patient_id,
        input.start_date,
        input.recurrence_type,
        input.time_of_day,
        &input.treatment_type,
    );
    input.apply(&mut rule)?;

    let conn = ctx.core.open_db()?;
    scheduling::create_rule(&conn, &auth.user.id, &rule)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// `GET /api/recurring/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<RecurringAppointment>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(load_rule(&conn, &auth.user.id, &id)?))
}

/// `PUT /api/recurring/:id`
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<RuleInput>,
) -> Result<Json<RecurringAppointment>, ApiError> {
    let conn = ctx.core.open_db()?;
    let mut rule = load_rule(&conn, &auth.user.id, &id)?;
    input.apply(&mut rule)?;
    scheduling::update_rule(&conn, &auth.user.id, &rule)?;
    Ok(Json(rule))
}

/// `POST /api/recurring/:id/deactivate`
pub async fn deactivate(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    scheduling::deactivate_rule(&conn, &auth.user.id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/recurring/:id`: materialized sessions stay, unlinked.
pub async fn delete(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    scheduling::delete_rule(&conn, &auth.user.id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/recurring/:id/next`
pub async fn next(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<NextOccurrence>, ApiError> {
    let conn = ctx.core.open_db()?;
    let rule = load_rule(&conn, &auth.user.id, &id)?;
    let now = chrono::Local::now().naive_local();
    Ok(Json(NextOccurrence {
        next: scheduling::next_occurrence(&rule, now),
    }))
}

/// `POST /api/recurring/:id/materialize`
pub async fn materialize(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<MaterializeRequest>,
) -> Result<(StatusCode, Json<MaterializeResponse>), ApiError> {
    let conn = ctx.core.open_db()?;
    let (treatment, created) = scheduling::materialize_occurrence(&conn, &auth.user.id, &id, req.datetime)?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(MaterializeResponse { treatment, created })))
}
