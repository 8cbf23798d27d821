//! Practice locations.
//!
//! - `GET    /api/locations`: active locations
//! - `GET    /api/locations/all`: including inactive ones
//! - `POST   /api/locations`
//! - `GET | PUT | DELETE /api/locations/:id`: delete deactivates when in use

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db::repository;
use crate::models::Location;
use crate::practice::{self, LocationInput, LocationRemoval};

#[derive(Serialize)]
pub struct RemovalResponse {
    pub result: LocationRemoval,
}

async fn list_locations(ctx: ApiContext, auth: AuthUser, active_only: bool) -> Result<Json<Vec<Location>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(repository::list_locations(&conn, &auth.user.id, active_only)?))
}

/// `GET /api/locations`
pub async fn list_active(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<Location>>, ApiError> {
    list_locations(ctx, auth, true).await
}

/// `GET /api/locations/all`
pub async fn list_all(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<Location>>, ApiError> {
    list_locations(ctx, auth, false).await
}

pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<LocationInput>,
) -> Result<(StatusCode, Json<Location>), ApiError> {
    let conn = ctx.core.open_db()?;
    let location = practice::create_location(&conn, &auth.user.id, input)?;
    Ok((StatusCode::CREATED, Json(location)))
}

pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Location>, ApiError> {
    let conn = ctx.core.open_db()?;
    repository::get_location(&conn, &auth.user.id, &id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("location not found: {id}")))
}

pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<LocationInput>,
) -> Result<Json<Location>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(practice::update_location(&conn, &auth.user.id, &id, input)?))
}

pub async fn remove(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<RemovalResponse>, ApiError> {
    let conn = ctx.core.open_db()?;
    let result = practice::remove_location(&conn, &auth.user.id, &id)?;
    Ok(Json(RemovalResponse { result }))
}
