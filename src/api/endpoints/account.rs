//! Data-subject rights: export, erasure and consent records.
//!
//! - `GET    /api/account/export`: everything the user owns, as JSON
//! - `DELETE /api/account`: soft-delete and anonymise the account
//! - `GET    /api/account/consents?patient_id=`
//! - `POST   /api/account/consents`
//! - `DELETE /api/account/consents/:id`: revoke

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser, ClientInfo};
use crate::crypto;
use crate::db::repository::{self, NewSecurityEvent};
use crate::models::{
    ContributionBracket, FinancialSettings, FixedCost, Location, Patient, PatientDiagnosis, PatientFilter,
    PatientReport, PracticeReport, RecurringAppointment, Treatment, TreatmentFilter, User, UserConsent, UserSubscription,
};

#[derive(Serialize)]
pub struct AccountExport {
    pub exported_at: NaiveDateTime,
    pub user: User,
    pub patients: Vec<Patient>,
    pub diagnoses: Vec<PatientDiagnosis>,
    pub treatments: Vec<Treatment>,
    pub recurring_appointments: Vec<RecurringAppointment>,
    pub locations: Vec<Location>,
    pub financial_settings: FinancialSettings,
    pub contribution_brackets: Vec<ContributionBracket>,
    pub fixed_costs: Vec<FixedCost>,
    pub patient_reports: Vec<PatientReport>,
    pub practice_reports: Vec<PracticeReport>,
    pub consents: Vec<UserConsent>,
    pub subscriptions: Vec<UserSubscription>,
}

#[derive(Deserialize)]
pub struct DeleteAccountRequest {
    pub password: String,
}

#[derive(Deserialize)]
pub struct ConsentQuery {
    pub patient_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct NewConsent {
    pub patient_id: Uuid,
    pub purpose: String,
    pub expires_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

/// `GET /api/account/export`
pub async fn export(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<AccountExport>, ApiError> {
    let conn = ctx.core.open_db()?;
    let user_id = auth.user.id;

    let patients = repository::list_patients(&conn, ctx.core.field_key(), &user_id, &PatientFilter::default())?;
    let mut patient_reports = Vec::new();
    for patient in &patients {
        patient_reports.extend(repository::list_patient_reports(&conn, &user_id, &patient.id)?);
    }

    let export = AccountExport {
        exported_at: chrono::Local::now().naive_local(),
        diagnoses: repository::list_user_diagnoses(&conn, &user_id)?,
        treatments: repository::list_treatments(&conn, &user_id, &TreatmentFilter::default())?,
        recurring_appointments: repository::list_recurring(&conn, &user_id, false)?
            .into_iter()
            .map(|(rule, _)| rule)
            .collect(),
        locations: repository::list_locations(&conn, &user_id, false)?,
        financial_settings: repository::get_financial_settings(&conn, &user_id)?,
        contribution_brackets: repository::list_brackets(&conn, &user_id)?,
        fixed_costs: repository::list_fixed_costs(&conn, &user_id)?,
        practice_reports: repository::list_practice_reports(&conn, &user_id)?,
        consents: repository::list_consents(&conn, &user_id, None)?,
        subscriptions: repository::list_subscriptions(&conn, &user_id)?,
        patients,
        patient_reports,
        user: auth.user,
    };
    tracing::info!(%user_id, "Account data exported");
    Ok(Json(export))
}

/// `DELETE /api/account`: requires the current password. Practice data is
/// kept for the legal retention period; the login is anonymised and every
/// session is revoked.
pub async fn delete_account(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(req): Json<DeleteAccountRequest>,
) -> Result<StatusCode, ApiError> {
    if !crypto::verify_password(&req.password, &auth.user.password_hash)? {
        return Err(ApiError::InvalidCredentials);
    }

    let conn = ctx.core.open_db()?;
    repository::soft_delete_user(&conn, &auth.user.id)?;
    ctx.core.revoke_user_sessions(&auth.user.id);

    let client = ClientInfo::from_headers(&headers);
    ctx.core.record_security_event(NewSecurityEvent {
        user_id: Some(auth.user.id),
        event_type: "account_deleted".into(),
        ip_address: client.ip,
        user_agent: client.user_agent,
        details: None,
        success: true,
        created_at: chrono::Local::now().naive_local(),
    });
    tracing::info!(user_id = %auth.user.id, "Account deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/account/consents`
pub async fn consents(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ConsentQuery>,
) -> Result<Json<Vec<UserConsent>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(repository::list_consents(&conn, &auth.user.id, query.patient_id.as_ref())?))
}

/// `POST /api/account/consents`
pub async fn give_consent(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<NewConsent>,
) -> Result<(StatusCode, Json<UserConsent>), ApiError> {
    let purpose = req.purpose.trim();
    if purpose.is_empty() {
        return Err(ApiError::BadRequest("purpose must not be empty".into()));
    }
    let conn = ctx.core.open_db()?;
    if !repository::patient_belongs_to(&conn, &auth.user.id, &req.patient_id)? {
        return Err(ApiError::NotFound(format!("patient not found: {}", req.patient_id)));
    }

    let consent = UserConsent {
        id: Uuid::new_v4(),
        user_id: auth.user.id,
        patient_id: req.patient_id,
        purpose: purpose.to_string(),
        given_at: chrono::Local::now().naive_local(),
        expires_at: req.expires_at,
        notes: req.notes,
        is_active: true,
    };
    repository::insert_consent(&conn, &consent)?;
    Ok((StatusCode::CREATED, Json(consent)))
}

/// `DELETE /api/account/consents/:id`
pub async fn revoke_consent(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    if !repository::revoke_consent(&conn, &auth.user.id, &id)? {
        return Err(ApiError::NotFound(format!("consent not found: {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}
