//! Google Calendar connection and event export.
//!
//! - `PUT    /api/google-calendar/client`: store the practitioner's OAuth client
//! - `GET    /api/google-calendar/auth-url`: consent screen URL
//! - `GET    /api/google-calendar/callback`: Unprotected: OAuth redirect target
//! - `GET    /api/google-calendar/status`
//! - `DELETE /api/google-calendar`: forget the tokens
//! - `POST   /api/google-calendar/events/:treatment_id`: push a session

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db::repository;
use crate::integrations::google_calendar::{self, CreatedEvent, GoogleCalendarClient, GoogleCredentials, GoogleStatus};

#[derive(Deserialize)]
pub struct ClientRequest {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Serialize)]
pub struct AuthUrl {
    pub url: String,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct CallbackResponse {
    pub connected: bool,
}

/// `PUT /api/google-calendar/client`
pub async fn save_client(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<ClientRequest>,
) -> Result<Json<GoogleStatus>, ApiError> {
    let conn = ctx.core.open_db()?;
    google_calendar::save_client(
        &conn,
        ctx.core.field_key(),
        &auth.user.id,
        &req.client_id,
        &req.client_secret,
        &req.redirect_uri,
    )?;
    let user = repository::get_user(&conn, &auth.user.id)?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(Json(google_calendar::status(&user)))
}

/// `GET /api/google-calendar/auth-url`
pub async fn auth_url(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<AuthUrl>, ApiError> {
    let creds = GoogleCredentials::for_user(&auth.user, ctx.core.field_key())?;
    let url = google_calendar::authorization_url(&creds, &auth.user.id)?;
    Ok(Json(AuthUrl { url }))
}

/// `GET /api/google-calendar/callback`: `state` carries the user id.
pub async fn callback(
    State(ctx): State<ApiContext>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<CallbackResponse>, ApiError> {
    if let Some(error) = query.error {
        return Err(ApiError::BadRequest(format!("authorization denied: {error}")));
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing code".into()))?;
    let user_id: Uuid = query
        .state
        .as_deref()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ApiError::BadRequest("invalid state".into()))?;

    let user = {
        let conn = ctx.core.open_db()?;
        repository::get_user(&conn, &user_id)?
            .filter(|u| !u.is_deleted)
            .ok_or_else(|| ApiError::BadRequest("invalid state".into()))?
    };
    let creds = GoogleCredentials::for_user(&user, ctx.core.field_key())?;
    let tokens = GoogleCalendarClient::new()?
        .exchange_code(&creds, &code, chrono::Utc::now().timestamp())
        .await?;

    let conn = ctx.core.open_db()?;
    google_calendar::store_tokens(&conn, ctx.core.field_key(), &user.id, &tokens)?;
    tracing::info!(user_id = %user.id, "Google Calendar connected");
    Ok(Json(CallbackResponse { connected: true }))
}

/// `GET /api/google-calendar/status`
pub async fn status(Extension(auth): Extension<AuthUser>) -> Json<GoogleStatus> {
    Json(google_calendar::status(&auth.user))
}

/// `DELETE /api/google-calendar`
pub async fn disconnect(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    google_calendar::disconnect(&conn, &auth.user.id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/google-calendar/events/:treatment_id`
///
/// Refreshes an expired access token first and stores the new one.
pub async fn create_event(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(treatment_id): Path<Uuid>,
) -> Result<(StatusCode, Json<CreatedEvent>), ApiError> {
    let key = ctx.core.field_key();
    let creds = GoogleCredentials::for_user(&auth.user, key)?;
    let tokens = google_calendar::load_tokens(&auth.user, key)?
        .ok_or_else(|| ApiError::BadRequest("Google Calendar is not connected".into()))?;

    let request = {
        let conn = ctx.core.open_db()?;
        let treatment = repository::get_treatment(&conn, &auth.user.id, &treatment_id)?
            .ok_or_else(|| ApiError::NotFound(format!("treatment not found: {treatment_id}")))?;
        let patient = repository::get_patient(&conn, key, &auth.user.id, &treatment.patient_id)?
            .ok_or_else(|| ApiError::NotFound(format!("patient not found: {}", treatment.patient_id)))?;
        let location = match treatment.location_id {
            Some(id) => repository::get_location(&conn, &auth.user.id, &id)?.map(|l| l.name),
            None => None,
        };
        google_calendar::event_for_treatment(&treatment, &patient.name, location.as_deref())
    };

    let client = GoogleCalendarClient::new()?;
    let now = chrono::Utc::now().timestamp();
    let tokens = if tokens.is_expired(now) {
        let refreshed = client.refresh(&creds, &tokens, now).await?;
        let conn = ctx.core.open_db()?;
        google_calendar::store_tokens(&conn, key, &auth.user.id, &refreshed)?;
        refreshed
    } else {
        tokens
    };

    let event = client.create_event(&tokens.access_token, &request).await?;

    let conn = ctx.core.open_db()?;
    repository::set_google_event_id(&conn, &treatment_id, &event.id)?;
    tracing::info!(%treatment_id, event_id = %event.id, "Session exported to Google Calendar");
    Ok((StatusCode::CREATED, Json(event)))
}
