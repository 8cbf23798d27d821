use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::row::{self, fmt_datetime, fmt_opt_datetime};
use crate::db::DatabaseError;
use crate::models::{User, UserRole};

const USER_COLUMNS: &str = "id, username, email, password_hash, role, first_name, last_name,
     clinic_name, language, stripe_customer_id, calendly_token_encrypted, calendly_user_uri,
     google_client_id, google_client_secret_encrypted, google_redirect_uri,
     google_tokens_encrypted, google_calendar_enabled, consent_given, consent_date,
     is_deleted, created_at";

pub fn insert_user(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO users (id, username, email, password_hash, role, first_name, last_name,
         clinic_name, language, consent_given, consent_date, is_deleted, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            user.id.to_string(),
            user.username,
            user.email,
            user.password_hash,
            user.role.as_str(),
            user.first_name,
            user.last_name,
            user.clinic_name,
            user.language,
            user.consent_given,
            fmt_opt_datetime(&user.consent_date),
            user.is_deleted,
            fmt_datetime(&user.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], row_to_user)
        .optional()
        .map_err(DatabaseError::from)
}

/// Look a user up by username or email, case-insensitively. Soft-deleted
/// accounts are invisible.
pub fn find_user_by_login(conn: &Connection, login: &str) -> Result<Option<User>, DatabaseError> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE (LOWER(username) = LOWER(?1) OR LOWER(email) = LOWER(?1)) AND is_deleted = 0
         LIMIT 1"
    );
    conn.query_row(&sql, params![login.trim()], row_to_user)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER(?1) AND is_deleted = 0");
    conn.query_row(&sql, params![email.trim()], row_to_user)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn find_user_by_stripe_customer(
    conn: &Connection,
    customer_id: &str,
) -> Result<Option<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE stripe_customer_id = ?1");
    conn.query_row(&sql, params![customer_id], row_to_user)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn find_user_by_calendly_uri(conn: &Connection, user_uri: &str) -> Result<Option<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE calendly_user_uri = ?1 AND is_deleted = 0");
    conn.query_row(&sql, params![user_uri], row_to_user)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn username_or_email_taken(
    conn: &Connection,
    username: &str,
    email: &str,
) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE LOWER(username) = LOWER(?1) OR LOWER(email) = LOWER(?2)",
        params![username, email],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn count_users(conn: &Connection) -> Result<i64, DatabaseError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_user)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Ids of practitioners whose practice data is subject to maintenance jobs.
pub fn list_practitioner_ids(conn: &Connection) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM users WHERE role IN ('physio', 'admin') AND is_deleted = 0",
    )?;
    let rows = stmt.query_map([], |r| row::uuid(r, 0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn update_user_profile(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE users SET first_name = ?2, last_name = ?3, clinic_name = ?4, language = ?5,
         consent_given = ?6, consent_date = ?7
         WHERE id = ?1",
        params![
            user.id.to_string(),
            user.first_name,
            user.last_name,
            user.clinic_name,
            user.language,
            user.consent_given,
            fmt_opt_datetime(&user.consent_date),
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("user", user.id));
    }
    Ok(())
}

pub fn update_password_hash(conn: &Connection, id: &Uuid, hash: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET password_hash = ?2 WHERE id = ?1",
        params![id.to_string(), hash],
    )?;
    Ok(())
}

pub fn set_user_role(conn: &Connection, id: &Uuid, role: UserRole) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE users SET role = ?2 WHERE id = ?1",
        params![id.to_string(), role.as_str()],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("user", id));
    }
    Ok(())
}

pub fn set_stripe_customer_id(
    conn: &Connection,
    id: &Uuid,
    customer_id: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET stripe_customer_id = ?2 WHERE id = ?1",
        params![id.to_string(), customer_id],
    )?;
    Ok(())
}

pub fn set_calendly_credentials(
    conn: &Connection,
    id: &Uuid,
    token_encrypted: Option<&str>,
    user_uri: Option<&str>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET calendly_token_encrypted = ?2, calendly_user_uri = ?3 WHERE id = ?1",
        params![id.to_string(), token_encrypted, user_uri],
    )?;
    Ok(())
}

pub fn set_google_client(
    conn: &Connection,
    id: &Uuid,
    client_id: &str,
    client_secret_encrypted: &str,
    redirect_uri: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET google_client_id = ?2, google_client_secret_encrypted = ?3,
         google_redirect_uri = ?4 WHERE id = ?1",
        params![id.to_string(), client_id, client_secret_encrypted, redirect_uri],
    )?;
    Ok(())
}

/// Store (or clear, with `None`) the encrypted OAuth token bundle.
pub fn set_google_tokens(
    conn: &Connection,
    id: &Uuid,
    tokens_encrypted: Option<&str>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET google_tokens_encrypted = ?2, google_calendar_enabled = ?3 WHERE id = ?1",
        params![id.to_string(), tokens_encrypted, tokens_encrypted.is_some()],
    )?;
    Ok(())
}

/// GDPR erasure: the row stays for referential integrity, personal fields go.
pub fn soft_delete_user(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let anon = format!("deleted-{}", id.simple());
    let affected = conn.execute(
        "UPDATE users SET is_deleted = 1, username = ?2, email = ?3, first_name = NULL,
         last_name = NULL, clinic_name = NULL, calendly_token_encrypted = NULL,
         calendly_user_uri = NULL, google_client_secret_encrypted = NULL,
         google_tokens_encrypted = NULL, google_calendar_enabled = 0
         WHERE id = ?1",
        params![id.to_string(), anon, format!("{anon}@invalid")],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("user", id));
    }
    Ok(())
}

fn row_to_user(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
    Ok(User {
        id: row::uuid(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: row::enumeration(row, 4)?,
        first_name: row.get(5)?,
        last_name: row.get(6)?,
        clinic_name: row.get(7)?,
        language: row.get(8)?,
        stripe_customer_id: row.get(9)?,
        calendly_token_encrypted: row.get(10)?,
        calendly_user_uri: row.get(11)?,
        google_client_id: row.get(12)?,
        google_client_secret_encrypted: row.get(13)?,
        google_redirect_uri: row.get(14)?,
        google_tokens_encrypted: row.get(15)?,
        google_calendar_enabled: row.get(16)?,
        consent_given: row.get(17)?,
        consent_date: row::opt_datetime(row, 18)?,
        is_deleted: row.get(19)?,
        created_at: row::datetime(row, 20)?,
    })
}
