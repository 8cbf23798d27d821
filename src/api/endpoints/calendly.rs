//! Calendly connection, sync and booking review.
//!
//! - `PUT    /api/calendly/token`: store a personal access token
//! - `DELETE /api/calendly/token`: disconnect
//! - `POST   /api/calendly/sync`: import bookings from the last 30 / next 60 days
//! - `GET    /api/calendly/bookings?status=`: bookings awaiting review
//! - `POST   /api/calendly/bookings/:id/match`: link to an existing patient
//! - `POST   /api/calendly/bookings/:id/create-patient`
//! - `POST   /api/calendly/bookings/:id/ignore`
//! - `POST   /api/calendly/webhook`: Unprotected: `invitee.created` deliveries

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db::repository;
use crate::integrations::calendly::{self, CalendlyClient, SyncSummary, WebhookResult};
use crate::models::{BookingStatus, Patient, Treatment, UnmatchedCalendlyBooking};

#[derive(Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub user_uri: Option<String>,
}

#[derive(Deserialize)]
pub struct BookingQuery {
    pub status: Option<BookingStatus>,
}

#[derive(Deserialize)]
pub struct MatchRequest {
    pub patient_id: Uuid,
}

#[derive(Serialize)]
pub struct MatchResponse {
    /// The session created for the booking, if it did not exist yet.
    pub treatment: Option<Treatment>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum WebhookReply {
    Skipped { status: &'static str },
    Applied(WebhookResult),
}

/// `PUT /api/calendly/token`: the token is verified against `users/me`
/// before it is stored.
pub async fn save_token(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    let token = req.token.trim();
    if token.is_empty() {
        return Err(ApiError::BadRequest("token must not be empty".into()));
    }
    let client = CalendlyClient::new(&ctx.core.config().calendly_base_url, token)?;
    let user_uri = client.current_user_uri().await?;

    let sealed = ctx.core.field_key().encrypt_str(token)?;
    let conn = ctx.core.open_db()?;
    repository::set_calendly_credentials(&conn, &auth.user.id, Some(&sealed), Some(&user_uri))?;
    tracing::info!(user_id = %auth.user.id, "Calendly connected");
    Ok(Json(ConnectionStatus {
        connected: true,
        user_uri: Some(user_uri),
    }))
}

/// `DELETE /api/calendly/token`
pub async fn disconnect(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    repository::set_calendly_credentials(&conn, &auth.user.id, None, None)?;
    tracing::info!(user_id = %auth.user.id, "Calendly disconnected");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/calendly/sync`
pub async fn sync(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<SyncSummary>, ApiError> {
    let key = ctx.core.field_key();
    let client = CalendlyClient::for_user(&ctx.core.config().calendly_base_url, &auth.user, key)?;
    let user_uri = match auth.user.calendly_user_uri.clone() {
        Some(uri) => uri,
        None => client.current_user_uri().await?,
    };
    let bookings = client.fetch_bookings(&user_uri, chrono::Utc::now()).await?;

    let conn = ctx.core.open_db()?;
    let summary = calendly::apply_bookings(&conn, key, &auth.user.id, &bookings)?;
    Ok(Json(summary))
}

/// `GET /api/calendly/bookings`
pub async fn bookings(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<BookingQuery>,
) -> Result<Json<Vec<UnmatchedCalendlyBooking>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(repository::list_bookings(&conn, &auth.user.id, query.status)?))
}

/// `POST /api/calendly/bookings/:id/match`
pub async fn match_booking(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<MatchRequest>,
) -> Result<Json<MatchResponse>, ApiError> {
    let conn = ctx.core.open_db()?;
    let treatment = calendly::match_booking(&conn, &auth.user.id, &id, &req.patient_id)?;
    Ok(Json(MatchResponse { treatment }))
}

/// `POST /api/calendly/bookings/:id/create-patient`
pub async fn create_patient(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let conn = ctx.core.open_db()?;
    let patient = calendly::create_patient_from_booking(&conn, ctx.core.field_key(), &auth.user.id, &id)?;
    Ok((StatusCode::CREATED, Json(patient)))
}

/// `POST /api/calendly/bookings/:id/ignore`
pub async fn ignore(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    calendly::ignore_booking(&conn, &auth.user.id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/calendly/webhook`
///
/// The practitioner is the connected user among the event's hosts.
/// Unknown hosts and other event types are acknowledged and dropped so
/// Calendly does not retry them.
pub async fn webhook(
    State(ctx): State<ApiContext>,
    Json(body): Json<Value>,
) -> Result<Json<WebhookReply>, ApiError> {
    let Some(created) = calendly::parse_webhook(&body)? else {
        return Ok(Json(WebhookReply::Skipped { status: "ignored" }));
    };

    let conn = ctx.core.open_db()?;
    let mut practitioner = None;
    for uri in &created.host_uris {
        if let Some(user) = repository::find_user_by_calendly_uri(&conn, uri)? {
            practitioner = Some(user);
            break;
        }
    }
    let Some(user) = practitioner else {
        tracing::warn!(hosts = ?created.host_uris, "Calendly webhook for an unknown practitioner");
        return Ok(Json(WebhookReply::Skipped {
            status: "unknown_practitioner",
        }));
    };

    let result = calendly::apply_invitee_created(&conn, ctx.core.field_key(), &user.id, &created.booking)?;
    Ok(Json(WebhookReply::Applied(result)))
}
