//! Account endpoints.
//!
//! `POST /api/auth/register`: Unprotected: create an account
//! `POST /api/auth/login`: Unprotected: username or email + password → bearer token
//! `POST /api/auth/logout`: Protected: revoke the current token
//! `GET  /api/auth/me`: Protected: current user
//! `PUT  /api/auth/me`: Protected: update profile fields
//! `POST /api/auth/password`: Protected: change password

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser, ClientInfo};
use crate::crypto;
use crate::db::repository::{self, NewSecurityEvent};
use crate::models::{User, UserRole};

const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub clinic_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    pub login: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn check_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn auth_event(user_id: Option<uuid::Uuid>, event_type: &str, client: &ClientInfo, details: String, success: bool) -> NewSecurityEvent {
    NewSecurityEvent {
        user_id,
        event_type: event_type.to_string(),
        ip_address: client.ip.clone(),
        user_agent: client.user_agent.clone(),
        details: Some(details),
        success,
        created_at: chrono::Local::now().naive_local(),
    }
}

/// `POST /api/auth/register`: the very first account becomes admin.
pub async fn register(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let username = req.username.trim();
    let email = req.email.trim();
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "username must be at least {MIN_USERNAME_LEN} characters"
        )));
    }
    if !email.contains('@') {
        return Err(ApiError::BadRequest("a valid email is required".into()));
    }
    check_password(&req.password)?;

    let user = {
        let conn = ctx.core.open_db()?;
        if repository::username_or_email_taken(&conn, username, email)? {
            return Err(ApiError::Conflict("username or email already registered".into()));
        }
        let role = if repository::count_users(&conn)? == 0 {
            UserRole::Admin
        } else {
            UserRole::Physio
        };
        let mut user = User::new(username, email, crypto::hash_password(&req.password), role);
        user.first_name = non_empty(req.first_name);
        user.last_name = non_empty(req.last_name);
        user.clinic_name = non_empty(req.clinic_name);
        repository::insert_user(&conn, &user)?;
        user
    };

    tracing::info!(user_id = %user.id, role = user.role.as_str(), "User registered");
    let client = ClientInfo::from_headers(&headers);
    ctx.core
        .record_security_event(auth_event(Some(user.id), "register", &client, user.username.clone(), true));

    let token = ctx.core.create_session(user.id)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

/// `POST /api/auth/login`
pub async fn login(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let client = ClientInfo::from_headers(&headers);
    let login = req.login.trim();

    let user = {
        let conn = ctx.core.open_db()?;
        repository::find_user_by_login(&conn, login)?
    };

    let verified = match &user {
        Some(u) => crypto::verify_password(&req.password, &u.password_hash).unwrap_or_else(|e| {
            tracing::warn!(user_id = %u.id, "Stored password hash unreadable: {e}");
            false
        }),
        None => false,
    };

    let user = match user {
        Some(u) if verified => u,
        other => {
            tracing::info!(login, ip = ?client.ip, "Login failed");
            ctx.core.record_security_event(auth_event(
                other.map(|u| u.id),
                "login_failed",
                &client,
                login.to_string(),
                false,
            ));
            return Err(ApiError::InvalidCredentials);
        }
    };

    let token = ctx.core.create_session(user.id)?;
    ctx.core
        .record_security_event(auth_event(Some(user.id), "login", &client, user.username.clone(), true));
    tracing::info!(user_id = %user.id, "Login succeeded");
    Ok(Json(AuthResponse { token, user }))
}

/// `POST /api/auth/logout`
pub async fn logout(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    ctx.core.revoke_session(&auth.token);
    tracing::info!(user_id = %auth.user.id, "Logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/auth/me`
pub async fn me(Extension(auth): Extension<AuthUser>) -> Json<User> {
    Json(auth.user)
}

#[derive(Deserialize)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub clinic_name: Option<String>,
    pub language: Option<String>,
    pub consent_given: Option<bool>,
}

/// `PUT /api/auth/me`
pub async fn update_me(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<ProfileUpdate>,
) -> Result<Json<User>, ApiError> {
    let mut user = auth.user;
    user.first_name = non_empty(req.first_name);
    user.last_name = non_empty(req.last_name);
    user.clinic_name = non_empty(req.clinic_name);
    if let Some(language) = non_empty(req.language) {
        user.language = language;
    }
    if let Some(consent) = req.consent_given {
        if consent && !user.consent_given {
            user.consent_date = Some(chrono::Local::now().naive_local());
        }
        user.consent_given = consent;
    }

    let conn = ctx.core.open_db()?;
    repository::update_user_profile(&conn, &user)?;
    Ok(Json(user))
}

#[derive(Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

/// `POST /api/auth/password`
pub async fn change_password(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(req): Json<PasswordChange>,
) -> Result<StatusCode, ApiError> {
    let client = ClientInfo::from_headers(&headers);
    if !crypto::verify_password(&req.current_password, &auth.user.password_hash)? {
        ctx.core.record_security_event(auth_event(
            Some(auth.user.id),
            "password_change_failed",
            &client,
            "wrong current password".into(),
            false,
        ));
        return Err(ApiError::InvalidCredentials);
    }
    check_password(&req.new_password)?;

    let conn = ctx.core.open_db()?;
    repository::update_password_hash(&conn, &auth.user.id, &crypto::hash_password(&req.new_password))?;
    drop(conn);

    ctx.core.record_security_event(auth_event(
        Some(auth.user.id),
        "password_changed",
        &client,
        auth.user.username.clone(),
        true,
    ));
    Ok(StatusCode::NO_CONTENT)
}
