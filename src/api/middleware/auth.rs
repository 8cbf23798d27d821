//! Bearer token authentication and role guards.
//!
//! `require_auth` extracts `Authorization: Bearer <token>`, resolves it
//! against the in-memory session registry, loads the user and injects
//! `AuthUser` into request extensions for downstream handlers.

use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db::repository;

pub(crate) fn bearer_token(req: &Request<axum::body::Body>) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Require a live session.
pub async fn require_auth(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_auth_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_auth_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let token = bearer_token(&req).ok_or(ApiError::Unauthorized)?;
    let user_id = ctx.core.resolve_session(&token).ok_or(ApiError::Unauthorized)?;

    // Connection dropped before the handler runs.
    let user = {
        let conn = ctx.core.open_db()?;
        repository::get_user(&conn, &user_id)?
    };
    let user = match user {
        Some(u) if !u.is_deleted => u,
        _ => {
            ctx.core.revoke_session(&token);
            return Err(ApiError::Unauthorized);
        }
    };

    req.extensions_mut().insert(AuthUser { user, token });

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("Cache-Control", HeaderValue::from_static("no-store"));
    Ok(response)
}

/// Practice data is reserved to physiotherapists and admins.
/// Must run inside `require_auth`.
pub async fn require_practitioner(req: Request<axum::body::Body>, next: Next) -> Response {
    match req.extensions().get::<AuthUser>() {
        Some(auth) if auth.user.can_access_practice() => next.run(req).await,
        Some(_) => ApiError::Forbidden.into_response(),
        None => ApiError::Unauthorized.into_response(),
    }
}

/// Admin-only routes. Must run inside `require_auth`.
pub async fn require_admin(req: Request<axum::body::Body>, next: Next) -> Response {
    match req.extensions().get::<AuthUser>() {
        Some(auth) if auth.user.is_admin() => next.run(req).await,
        Some(_) => ApiError::Forbidden.into_response(),
        None => ApiError::Unauthorized.into_response(),
    }
}
