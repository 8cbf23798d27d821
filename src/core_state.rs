//! Shared application state.
//!
//! `CoreState` is created once at startup, wrapped in `Arc` and handed to
//! the HTTP layer and the CLI jobs. It owns the configuration, the field
//! encryption key, the bearer-session registry and the buffered audit
//! logger. Database connections are opened per call.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::{self, CryptoError, FieldKey};
use crate::db;
use crate::db::repository::NewSecurityEvent;

/// Maximum audit buffer size before flush.
const AUDIT_BUFFER_CAPACITY: usize = 100;

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    config: AppConfig,
    field_key: FieldKey,
    /// SHA-256 of the bearer token → session.
    sessions: RwLock<HashMap<String, Session>>,
    session_ttl: Duration,
    audit: AuditLogger,
}

#[derive(Debug, Clone)]
struct Session {
    user_id: Uuid,
    expires_at: Instant,
}

impl CoreState {
    pub fn new(config: AppConfig, field_key: FieldKey) -> Self {
        let session_ttl = Duration::from_secs(config.session_ttl_secs);
        Self {
            config,
            field_key,
            sessions: RwLock::new(HashMap::new()),
            session_ttl,
            audit: AuditLogger::new(),
        }
    }

    /// Build state from configuration. The field key is mandatory: patient
    /// notes written under one key cannot be read under another.
    pub fn from_config(config: AppConfig) -> Result<Self, CoreError> {
        let encoded = config
            .field_encryption_key
            .as_deref()
            .ok_or(CoreError::MissingFieldKey)?;
        let key = FieldKey::from_base64(encoded)?;
        Ok(Self::new(config, key))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn field_key(&self) -> &FieldKey {
        &self.field_key
    }

    /// Open a database connection (migrations applied, foreign keys on).
    pub fn open_db(&self) -> Result<rusqlite::Connection, CoreError> {
        db::open_database(&self.config.database_path).map_err(CoreError::Database)
    }

    // ── Sessions ────────────────────────────────────────────

    /// Start a session and return the bearer token. Only its hash is kept.
    pub fn create_session(&self, user_id: Uuid) -> Result<String, CoreError> {
        let token = crypto::generate_session_token();
        let mut sessions = self.sessions.write().map_err(|_| CoreError::LockPoisoned)?;
        let now = Instant::now();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(
            crypto::hash_token(&token),
            Session {
                user_id,
                expires_at: now + self.session_ttl,
            },
        );
        Ok(token)
    }

    /// Resolve a bearer token to its user, if the session is still alive.
    pub fn resolve_session(&self, token: &str) -> Option<Uuid> {
        let hash = crypto::hash_token(token);
        let sessions = self.sessions.read().ok()?;
        sessions
            .get(&hash)
            .filter(|s| s.expires_at > Instant::now())
            .map(|s| s.user_id)
    }

    pub fn revoke_session(&self, token: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(&crypto::hash_token(token));
        }
    }

    /// Drop every session of a user (account deletion).
    pub fn revoke_user_sessions(&self, user_id: &Uuid) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.retain(|_, s| s.user_id != *user_id);
        }
    }

    pub fn active_session_count(&self) -> usize {
        let now = Instant::now();
        self.sessions
            .read()
            .map(|s| s.values().filter(|s| s.expires_at > now).count())
            .unwrap_or(0)
    }

    // ── Audit logging ───────────────────────────────────────

    /// Buffer an API access event. Auto-flushes when the buffer is full.
    pub fn log_access(&self, event: NewSecurityEvent) {
        if self.audit.log(event) {
            if let Err(e) = self.flush_audit() {
                tracing::warn!("Auto-flush audit failed: {e}");
            }
        }
    }

    /// Write a security event right away (authentication outcomes).
    pub fn record_security_event(&self, event: NewSecurityEvent) {
        let result = self
            .open_db()
            .and_then(|conn| Ok(db::repository::insert_security_events(&conn, &[event])?));
        if let Err(e) = result {
            tracing::warn!("Failed to record security event: {e}");
        }
    }

    pub fn flush_audit(&self) -> Result<usize, CoreError> {
        let conn = self.open_db()?;
        self.audit.flush_to_db(&conn)
    }

    pub fn audit_buffer_len(&self) -> usize {
        self.audit.buffer_len()
    }
}

// ═══════════════════════════════════════════════════════════
// Error types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("FIELD_ENCRYPTION_KEY is not set")]
    MissingFieldKey,
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

// ═══════════════════════════════════════════════════════════
// Audit logger
// ═══════════════════════════════════════════════════════════

/// In-memory audit log buffer. Entries are flushed to the security log
/// when the buffer reaches capacity or on explicit flush.
pub struct AuditLogger {
    buffer: Mutex<Vec<NewSecurityEvent>>,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::with_capacity(AUDIT_BUFFER_CAPACITY)),
        }
    }

    /// Returns `true` if the buffer has reached flush threshold.
    pub fn log(&self, event: NewSecurityEvent) -> bool {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.push(event);
            buf.len() >= AUDIT_BUFFER_CAPACITY
        } else {
            false
        }
    }

    pub fn drain(&self) -> Vec<NewSecurityEvent> {
        self.buffer
            .lock()
            .map(|mut buf| buf.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    pub fn flush_to_db(&self, conn: &rusqlite::Connection) -> Result<usize, CoreError> {
        let entries = self.drain();
        if entries.is_empty() {
            return Ok(0);
        }
        let count = entries.len();
        db::repository::insert_security_events(conn, &entries)?;
        tracing::debug!(count, "Flushed audit entries to database");
        Ok(count)
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
