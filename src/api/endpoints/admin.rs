//! Administration. Admin role only.
//!
//! - `GET /api/admin/users`
//! - `PUT /api/admin/users/:id/role`
//! - `GET /api/admin/security-log?user_id=&limit=`

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db::repository;
use crate::models::{SecurityLogEntry, User, UserRole};

const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

#[derive(Deserialize)]
pub struct RoleRequest {
    pub role: UserRole,
}

#[derive(Deserialize)]
pub struct LogQuery {
    pub user_id: Option<Uuid>,
    pub limit: Option<usize>,
}

pub async fn users(State(ctx): State<ApiContext>) -> Result<Json<Vec<User>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(repository::list_users(&conn)?))
}

/// Admins cannot demote themselves, so at least one admin remains.
pub async fn set_role(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RoleRequest>,
) -> Result<Json<User>, ApiError> {
    if id == auth.user.id && req.role != UserRole::Admin {
        return Err(ApiError::BadRequest("cannot change your own admin role".into()));
    }
    let conn = ctx.core.open_db()?;
    repository::set_user_role(&conn, &id, req.role)?;
    tracing::info!(admin = %auth.user.id, user_id = %id, role = %req.role, "User role changed");
    repository::get_user(&conn, &id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("user not found: {id}")))
}

pub async fn security_log(
    State(ctx): State<ApiContext>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<SecurityLogEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    ctx.core.flush_audit()?;
    let conn = ctx.core.open_db()?;
    Ok(Json(repository::list_security_log(&conn, query.user_id.as_ref(), limit)?))
}
