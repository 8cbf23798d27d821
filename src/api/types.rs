//! Shared types for the HTTP layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;

use crate::core_state::CoreState;
use crate::integrations::llm::LlmClient;
use crate::models::User;

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
/// Wraps `CoreState` plus HTTP-specific state.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    /// `None` when no LLM key is configured; reports use templates.
    pub llm: Option<Arc<dyn LlmClient>>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            core,
            llm,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new())),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Authenticated user: injected by auth middleware
// ═══════════════════════════════════════════════════════════

/// The signed-in user, loaded fresh for every request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

/// Who made a request, as far as the headers tell.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let ip = header("X-Forwarded-For")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .filter(|v| !v.is_empty())
            .or_else(|| header("X-Real-IP"));
        Self {
            ip,
            user_agent: header("User-Agent"),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Rate limiter: per-client sliding window
// ═══════════════════════════════════════════════════════════

/// Per-client rate limiter with per-minute and per-hour limits.
///
/// Keys whose timestamps have all aged out of the hour are dropped on a
/// periodic sweep, so the map only holds clients seen in the last hour.
pub struct RateLimiter {
    windows: HashMap<String, Vec<Instant>>,
    per_minute: u32,
    per_hour: u32,
    last_sweep: Instant,
}

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_limits(100, 1000)
    }

    pub fn with_limits(per_minute: u32, per_hour: u32) -> Self {
        Self {
            windows: HashMap::new(),
            per_minute,
            per_hour,
            last_sweep: Instant::now(),
        }
    }

    /// Check if a client is within rate limits. Returns `Ok(())` or
    /// `Err(retry_after_secs)` if exceeded.
    pub fn check(&mut self, client: &str) -> Result<(), u64> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&mut self, client: &str, now: Instant) -> Result<(), u64> {
        if now.saturating_duration_since(self.last_sweep) >= MINUTE {
            self.sweep(now);
        }

        let entries = self.windows.entry(client.to_string()).or_default();
        entries.retain(|ts| now.saturating_duration_since(*ts) < HOUR);

        let last_minute = entries
            .iter()
            .filter(|ts| now.saturating_duration_since(**ts) < MINUTE)
            .count() as u32;
        let verdict = if last_minute >= self.per_minute {
            Err(60)
        } else if entries.len() as u32 >= self.per_hour {
            Err(3600)
        } else {
            entries.push(now);
            Ok(())
        };

        if entries.is_empty() {
            self.windows.remove(client);
        }
        verdict
    }

    /// Drop every timestamp older than an hour and every key left empty.
    fn sweep(&mut self, now: Instant) {
        self.windows.retain(|_, entries| {
            entries.retain(|ts| now.saturating_duration_since(*ts) < HOUR);
            !entries.is_empty()
        });
        self.last_sweep = now;
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn rate_limiter_allows_under_limit() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.check("client-1").is_ok());
        assert!(limiter.check("client-1").is_ok());
    }

    #[test]
    fn rate_limiter_rejects_over_per_minute() {
        let mut limiter = RateLimiter::with_limits(2, 1000);
        assert!(limiter.check("client-1").is_ok());
        assert!(limiter.check("client-1").is_ok());
        assert_eq!(limiter.check("client-1"), Err(60));
    }

    #[test]
    fn rate_limiter_rejects_over_per_hour() {
        let mut limiter = RateLimiter::with_limits(100, 3);
        for _ in 0..3 {
            assert!(limiter.check("client-1").is_ok());
        }
        assert_eq!(limiter.check("client-1"), Err(3600));
    }

    #[test]
    fn rate_limiter_isolates_clients() {
        let mut limiter = RateLimiter::with_limits(1, 1000);
        assert!(limiter.check("client-1").is_ok());
        assert!(limiter.check("client-2").is_ok());
        assert_eq!(limiter.check("client-1"), Err(60));
    }

    #[test]
    fn idle_clients_are_forgotten() {
        let mut limiter = RateLimiter::new();
        let start = Instant::now();
        for i in 0..5000 {
            assert!(limiter.check_at(&format!("ip:10.0.{}.{}", i / 256, i % 256), start).is_ok());
        }
        assert_eq!(limiter.tracked_clients(), 5000);

        let later = start + HOUR + MINUTE;
        assert!(limiter.check_at("ip:10.9.9.9", later).is_ok());
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn rejected_client_keeps_its_window() {
        let mut limiter = RateLimiter::with_limits(1, 1000);
        let now = Instant::now();
        assert!(limiter.check_at("ip:10.0.0.1", now).is_ok());
        assert_eq!(limiter.check_at("ip:10.0.0.1", now), Err(60));
        assert!(limiter.check_at("ip:10.0.0.1", now + MINUTE).is_ok());
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn client_info_prefers_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_static("10.0.0.7, 172.16.0.1"));
        headers.insert("User-Agent", HeaderValue::from_static("curl/8"));
        let info = ClientInfo::from_headers(&headers);
        assert_eq!(info.ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8"));
    }
}
