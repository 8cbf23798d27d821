//! Multi-practitioner clinic membership.
//!
//! - `GET | POST | PUT /api/clinic`: overview, create, settings
//! - `POST   /api/clinic/invitations`: returns the token once
//! - `POST   /api/clinic/join`
//! - `PUT    /api/clinic/members/:id/permissions`
//! - `DELETE /api/clinic/members/:id`: also withdraws a pending invitation
//! - `POST   /api/clinic/leave`

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::clinic::{self, ClinicInput, ClinicOverview, Invitation, InvitationRequest, PermissionUpdate};
use crate::models::{Clinic, ClinicMembership};

#[derive(Deserialize)]
pub struct JoinRequest {
    pub token: String,
}

fn now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub async fn overview(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<ClinicOverview>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(clinic::clinic_overview(&conn, &auth.user, now())?))
}

pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<ClinicInput>,
) -> Result<(StatusCode, Json<ClinicOverview>), ApiError> {
    let conn = ctx.core.open_db()?;
    let overview = clinic::create_clinic(&conn, &auth.user, input, now())?;
    Ok((StatusCode::CREATED, Json(overview)))
}

pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<ClinicInput>,
) -> Result<Json<Clinic>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(clinic::update_clinic(&conn, &auth.user, input)?))
}

pub async fn invite(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<InvitationRequest>,
) -> Result<(StatusCode, Json<Invitation>), ApiError> {
    let conn = ctx.core.open_db()?;
    let invitation = clinic::invite(&conn, &auth.user, req, now())?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

pub async fn join(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<ClinicMembership>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(clinic::accept_invitation(&conn, &auth.user, &req.token, now())?))
}

pub async fn update_permissions(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(update): Json<PermissionUpdate>,
) -> Result<Json<ClinicMembership>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(clinic::update_permissions(&conn, &auth.user, &id, update)?))
}

pub async fn remove_member(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    clinic::remove_member(&conn, &auth.user, &id, now())?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    clinic::leave(&conn, &auth.user, now())?;
    Ok(StatusCode::NO_CONTENT)
}
