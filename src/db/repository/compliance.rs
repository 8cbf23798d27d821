use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::row::{self, fmt_datetime, fmt_opt_datetime};
use crate::db::DatabaseError;
use crate::models::{SecurityLogEntry, UserConsent};

pub fn insert_consent(conn: &Connection, c: &UserConsent) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO user_consents (id, user_id, patient_id, purpose, given_at, expires_at,
         notes, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            c.id.to_string(),
            c.user_id.to_string(),
            c.patient_id.to_string(),
            c.purpose,
            fmt_datetime(&c.given_at),
            fmt_opt_datetime(&c.expires_at),
            c.notes,
            c.is_active,
        ],
    )?;
    Ok(())
}

pub fn list_consents(
    conn: &Connection,
    user_id: &Uuid,
    patient_id: Option<&Uuid>,
) -> Result<Vec<UserConsent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, patient_id, purpose, given_at, expires_at, notes, is_active
         FROM user_consents
         WHERE user_id = ?1 AND (?2 IS NULL OR patient_id = ?2)
         ORDER BY given_at DESC",
    )?;
    let rows = stmt.query_map(
        params![user_id.to_string(), patient_id.map(|p| p.to_string())],
        |r| {
            Ok(UserConsent {
                id: row::uuid(r, 0)?,
                user_id: row::uuid(r, 1)?,
                patient_id: row::uuid(r, 2)?,
                purpose: r.get(3)?,
                given_at: row::datetime(r, 4)?,
                expires_at: row::opt_datetime(r, 5)?,
                notes: r.get(6)?,
                is_active: r.get(7)?,
            })
        },
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn revoke_consent(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE user_consents SET is_active = 0 WHERE id = ?1 AND user_id = ?2",
        params![id.to_string(), user_id.to_string()],
    )?;
    Ok(affected > 0)
}

/// Security-log row as produced by the API layer.
#[derive(Debug, Clone)]
pub struct NewSecurityEvent {
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: NaiveDateTime,
}

pub fn insert_security_events(conn: &Connection, events: &[NewSecurityEvent]) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO security_log (user_id, event_type, ip_address, user_agent, details, success, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for e in events {
        stmt.execute(params![
            e.user_id.map(|u| u.to_string()),
            e.event_type,
            e.ip_address,
            e.user_agent,
            e.details,
            e.success,
            fmt_datetime(&e.created_at),
        ])?;
    }
    Ok(())
}

/// Latest entries first, optionally limited to one user.
pub fn list_security_log(
    conn: &Connection,
    user_id: Option<&Uuid>,
    limit: usize,
) -> Result<Vec<SecurityLogEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, event_type, ip_address, user_agent, details, success, created_at
         FROM security_log
         WHERE (?1 IS NULL OR user_id = ?1)
         ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user_id.map(|u| u.to_string()), limit as i64], |r| {
        Ok(SecurityLogEntry {
            id: r.get(0)?,
            user_id: row::opt_uuid(r, 1)?,
            event_type: r.get(2)?,
            ip_address: r.get(3)?,
            user_agent: r.get(4)?,
            details: r.get(5)?,
            success: r.get(6)?,
            created_at: row::datetime(r, 7)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}
