//! Audit logging middleware.
//!
//! Records every API request with method, path, response status and the
//! user (when authenticated) into the buffered security log. Runs
//! innermost, after auth has injected `AuthUser`.

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::types::{ApiContext, AuthUser, ClientInfo};
use crate::db::repository::NewSecurityEvent;

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let client = ClientInfo::from_headers(req.headers());

    let ctx = req.extensions().get::<ApiContext>().cloned();
    let user_id = req.extensions().get::<AuthUser>().map(|a| a.user.id);

    let response = next.run(req).await;

    if let Some(ctx) = ctx {
        let status = response.status();
        ctx.core.log_access(NewSecurityEvent {
            user_id,
            event_type: "api_access".into(),
            ip_address: client.ip,
            user_agent: client.user_agent,
            details: Some(format!("{method} {path} status:{}", status.as_u16())),
            success: !(status.is_client_error() || status.is_server_error()),
            created_at: chrono::Local::now().naive_local(),
        });
    }

    response
}
