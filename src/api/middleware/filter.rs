//! Drop requests for paths that only scanners ask for.

use std::sync::LazyLock;

use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use regex::Regex;

use crate::api::types::{ApiContext, ClientInfo};
use crate::db::repository::NewSecurityEvent;

static BLOCKED_PATHS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\.(?:php\d?|asp|aspx|jsp|cgi)$").unwrap(),
        Regex::new(r"(?i)/(?:wp-admin|wp-login|wp-content|phpmyadmin|cgi-bin)\b").unwrap(),
        Regex::new(r"(?i)/\.(?:env|git|svn|htaccess|aws|ssh)\b").unwrap(),
        Regex::new(r"\.\./|%2e%2e").unwrap(),
    ]
});

pub fn is_blocked_path(path: &str) -> bool {
    BLOCKED_PATHS.iter().any(|re| re.is_match(path))
}

const SECURITY_HEADERS: [(&str, &str); 4] = [
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "DENY"),
    ("Referrer-Policy", "no-referrer"),
    ("Permissions-Policy", "camera=(), microphone=(), geolocation=()"),
];

/// Answer scanner paths with a bare 404 and note them in the security log.
/// Everything else gets the standard security headers on the way out.
pub async fn block_scanners(req: Request<axum::body::Body>, next: Next) -> Response {
    let path = req.uri().path();
    if !is_blocked_path(path) {
        let mut response = next.run(req).await;
        let headers = response.headers_mut();
        for (name, value) in SECURITY_HEADERS {
            headers.insert(name, HeaderValue::from_static(value));
        }
        return response;
    }

    let client = ClientInfo::from_headers(req.headers());
    tracing::warn!(path, ip = ?client.ip, "Blocked suspicious request");
    if let Some(ctx) = req.extensions().get::<ApiContext>() {
        ctx.core.log_access(NewSecurityEvent {
            user_id: None,
            event_type: "blocked_request".into(),
            ip_address: client.ip,
            user_agent: client.user_agent,
            details: Some(path.to_string()),
            success: false,
            created_at: chrono::Local::now().naive_local(),
        });
    }
    StatusCode::NOT_FOUND.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_paths_are_blocked() {
        for path in ["/wp-admin/setup.php", "/.env", "/index.php", "/api/../etc/passwd", "/.git/config"] {
            assert!(is_blocked_path(path), "{path} should be blocked");
        }
    }

    #[test]
    fn application_paths_pass() {
        for path in ["/api/patients", "/api/reports/practice", "/webhooks/stripe", "/api/legal/privacy"] {
            assert!(!is_blocked_path(path), "{path} should pass");
        }
    }
}
