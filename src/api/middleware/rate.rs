//! Per-client rate limiting middleware.
//!
//! Applies sliding-window rate limits per client:
//! - 100 requests per minute
//! - 1000 requests per hour
//!
//! A request counts against its user when it carries a live session token,
//! otherwise against the peer address of the TCP connection. Forwarding
//! headers and unknown tokens are client-controlled and never pick a bucket.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::middleware::auth::bearer_token;
use crate::api::types::ApiContext;

fn rate_key(ctx: &ApiContext, req: &Request<axum::body::Body>) -> String {
    if let Some(user_id) = bearer_token(req).and_then(|t| ctx.core.resolve_session(&t)) {
        return format!("user:{user_id}");
    }
    match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(peer)) => format!("ip:{}", peer.ip()),
        None => "anonymous".to_string(),
    }
}

/// Returns 429 if exceeded.
pub async fn limit(req: Request<axum::body::Body>, next: Next) -> Response {
    match limit_inner(req, next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn limit_inner(req: Request<axum::body::Body>, next: Next) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let key = rate_key(&ctx, &req);

    // MutexGuard is !Send, drop before .await
    {
        let mut limiter = ctx
            .rate_limiter
            .lock()
            .map_err(|_| ApiError::Internal("rate limiter lock".into()))?;

        limiter
            .check(&key)
            .map_err(|retry_after| ApiError::RateLimited { retry_after })?;
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::AppConfig;
    use crate::core_state::CoreState;
    use crate::crypto::FieldKey;

    fn context() -> (ApiContext, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig::for_database(tmp.path().join("rate.db"));
        let core = Arc::new(CoreState::new(config, FieldKey::from_bytes([4u8; 32])));
        (ApiContext::new(core, None), tmp)
    }

    fn request(token: Option<&str>, forwarded: Option<&str>, peer: Option<&str>) -> Request<axum::body::Body> {
        let mut builder = Request::builder().uri("/api/auth/login");
        if let Some(t) = token {
            builder = builder.header("Authorization", format!("Bearer {t}"));
        }
        if let Some(f) = forwarded {
            builder = builder.header("X-Forwarded-For", f);
        }
        let mut req = builder.body(axum::body::Body::empty()).unwrap();
        if let Some(p) = peer {
            req.extensions_mut()
                .insert(ConnectInfo(p.parse::<SocketAddr>().unwrap()));
        }
        req
    }

    #[test]
    fn unknown_tokens_and_forwarded_headers_share_the_peer_bucket() {
        let (ctx, _tmp) = context();
        let a = rate_key(&ctx, &request(Some("aaaaaaaaaaaaaaaa"), Some("1.1.1.1"), Some("203.0.113.5:4000")));
        let b = rate_key(&ctx, &request(Some("bbbbbbbbbbbbbbbb"), Some("2.2.2.2"), Some("203.0.113.5:4001")));
        assert_eq!(a, "ip:203.0.113.5");
        assert_eq!(a, b);
    }

    #[test]
    fn live_session_is_keyed_by_user() {
        let (ctx, _tmp) = context();
        let user_id = uuid::Uuid::new_v4();
        let token = ctx.core.create_session(user_id).unwrap();
        let key = rate_key(&ctx, &request(Some(&token), None, Some("203.0.113.5:4000")));
        assert_eq!(key, format!("user:{user_id}"));
    }

    #[test]
    fn missing_peer_falls_back_to_a_shared_bucket() {
        let (ctx, _tmp) = context();
        assert_eq!(rate_key(&ctx, &request(Some("random"), Some("9.9.9.9"), None)), "anonymous");
    }
}
