use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::row::{self, fmt_datetime, fmt_opt_datetime};
use crate::db::DatabaseError;
use crate::models::{Clinic, ClinicMembership, ClinicPermissions};

const CLINIC_COLUMNS: &str = "id, owner_id, name, description, address, phone, email, website,
     first_session_fee, subsequent_session_fee, percentage_agreement, percentage_amount, created_at";

const MEMBERSHIP_COLUMNS: &str = "id, clinic_id, user_id, invited_email, role, is_active,
     can_manage_patients, can_view_reports, can_manage_billing, can_manage_practitioners,
     can_manage_settings, invitation_token_hash, invitation_expires_at, invited_by, invited_at,
     joined_at, left_at";

pub fn insert_clinic(conn: &Connection, c: &Clinic) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO clinics (id, owner_id, name, description, address, phone, email, website,
         first_session_fee, subsequent_session_fee, percentage_agreement, percentage_amount, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            c.id.to_string(),
            c.owner_id.to_string(),
            c.name,
            c.description,
            c.address,
            c.phone,
            c.email,
            c.website,
            c.first_session_fee,
            c.subsequent_session_fee,
            c.percentage_agreement,
            c.percentage_amount,
            fmt_datetime(&c.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_clinic(conn: &Connection, id: &Uuid) -> Result<Option<Clinic>, DatabaseError> {
    let sql = format!("SELECT {CLINIC_COLUMNS} FROM clinics WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], row_to_clinic)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn update_clinic(conn: &Connection, c: &Clinic) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE clinics SET name = ?2, description = ?3, address = ?4, phone = ?5, email = ?6,
         website = ?7, first_session_fee = ?8, subsequent_session_fee = ?9,
         percentage_agreement = ?10, percentage_amount = ?11
         WHERE id = ?1",
        params![
            c.id.to_string(),
            c.name,
            c.description,
            c.address,
            c.phone,
            c.email,
            c.website,
            c.first_session_fee,
            c.subsequent_session_fee,
            c.percentage_agreement,
            c.percentage_amount,
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("clinic", c.id));
    }
    Ok(())
}

pub fn insert_membership(conn: &Connection, m: &ClinicMembership) -> Result<(), DatabaseError> {
    let p = &m.permissions;
    let result = conn.execute(
        "INSERT INTO clinic_memberships (id, clinic_id, user_id, invited_email, role, is_active,
         can_manage_patients, can_view_reports, can_manage_billing, can_manage_practitioners,
         can_manage_settings, invitation_token_hash, invitation_expires_at, invited_by, invited_at,
         joined_at, left_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            m.id.to_string(),
            m.clinic_id.to_string(),
            m.user_id.map(|u| u.to_string()),
            m.invited_email,
            m.role.as_str(),
            m.is_active,
            p.can_manage_patients,
            p.can_view_reports,
            p.can_manage_billing,
            p.can_manage_practitioners,
            p.can_manage_settings,
            m.invitation_token_hash,
            fmt_opt_datetime(&m.invitation_expires_at),
            m.invited_by.map(|u| u.to_string()),
            fmt_opt_datetime(&m.invited_at),
            fmt_opt_datetime(&m.joined_at),
            fmt_opt_datetime(&m.left_at),
        ],
    );
    map_membership_conflict(result)
}

pub fn update_membership(conn: &Connection, m: &ClinicMembership) -> Result<(), DatabaseError> {
    let p = &m.permissions;
    let result = conn.execute(
        "UPDATE clinic_memberships SET user_id = ?2, invited_email = ?3, role = ?4, is_active = ?5,
         can_manage_patients = ?6, can_view_reports = ?7, can_manage_billing = ?8,
         can_manage_practitioners = ?9, can_manage_settings = ?10, invitation_token_hash = ?11,
         invitation_expires_at = ?12, invited_by = ?13, invited_at = ?14, joined_at = ?15, left_at = ?16
         WHERE id = ?1",
        params![
            m.id.to_string(),
            m.user_id.map(|u| u.to_string()),
            m.invited_email,
            m.role.as_str(),
            m.is_active,
            p.can_manage_patients,
            p.can_view_reports,
            p.can_manage_billing,
            p.can_manage_practitioners,
            p.can_manage_settings,
            m.invitation_token_hash,
            fmt_opt_datetime(&m.invitation_expires_at),
            m.invited_by.map(|u| u.to_string()),
            fmt_opt_datetime(&m.invited_at),
            fmt_opt_datetime(&m.joined_at),
            fmt_opt_datetime(&m.left_at),
        ],
    );
    map_membership_conflict(result)
}

/// A second active membership for the same user hits the partial unique
/// index.
fn map_membership_conflict(result: rusqlite::Result<usize>) -> Result<(), DatabaseError> {
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Err(DatabaseError::ConstraintViolation("user already belongs to a clinic".into()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_membership(conn: &Connection, clinic_id: &Uuid, id: &Uuid) -> Result<Option<ClinicMembership>, DatabaseError> {
    let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM clinic_memberships WHERE id = ?1 AND clinic_id = ?2");
    conn.query_row(&sql, params![id.to_string(), clinic_id.to_string()], row_to_membership)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn active_membership_for(conn: &Connection, user_id: &Uuid) -> Result<Option<ClinicMembership>, DatabaseError> {
    let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM clinic_memberships WHERE user_id = ?1 AND is_active = 1");
    conn.query_row(&sql, params![user_id.to_string()], row_to_membership)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn find_membership_by_token_hash(conn: &Connection, hash: &str) -> Result<Option<ClinicMembership>, DatabaseError> {
    let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM clinic_memberships WHERE invitation_token_hash = ?1");
    conn.query_row(&sql, params![hash], row_to_membership)
        .optional()
        .map_err(DatabaseError::from)
}

/// An open (never joined, never removed) invitation for the user or email.
pub fn find_open_invitation(
    conn: &Connection,
    clinic_id: &Uuid,
    user_id: Option<&Uuid>,
    email: &str,
) -> Result<Option<ClinicMembership>, DatabaseError> {
    let sql = format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM clinic_memberships
         WHERE clinic_id = ?1 AND is_active = 0 AND joined_at IS NULL AND left_at IS NULL
           AND ((?2 IS NOT NULL AND user_id = ?2) OR LOWER(invited_email) = LOWER(?3))
         LIMIT 1"
    );
    conn.query_row(
        &sql,
        params![clinic_id.to_string(), user_id.map(|u| u.to_string()), email],
        row_to_membership,
    )
    .optional()
    .map_err(DatabaseError::from)
}

pub fn list_active_members(conn: &Connection, clinic_id: &Uuid) -> Result<Vec<ClinicMembership>, DatabaseError> {
    let sql = format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM clinic_memberships
         WHERE clinic_id = ?1 AND is_active = 1 ORDER BY joined_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![clinic_id.to_string()], row_to_membership)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn list_pending_invitations(
    conn: &Connection,
    clinic_id: &Uuid,
    now: NaiveDateTime,
) -> Result<Vec<ClinicMembership>, DatabaseError> {
    let sql = format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM clinic_memberships
         WHERE clinic_id = ?1 AND is_active = 0 AND left_at IS NULL
           AND invitation_token_hash IS NOT NULL AND invitation_expires_at > ?2
         ORDER BY invited_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![clinic_id.to_string(), fmt_datetime(&now)], row_to_membership)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Practitioner seats taken: active members plus unexpired invitations,
/// assistants excluded.
pub fn count_seats(conn: &Connection, clinic_id: &Uuid, now: NaiveDateTime) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM clinic_memberships
         WHERE clinic_id = ?1 AND role <> 'assistant' AND left_at IS NULL
           AND (is_active = 1
                OR (invitation_token_hash IS NOT NULL AND invitation_expires_at > ?2))",
        params![clinic_id.to_string(), fmt_datetime(&now)],
        |r| r.get(0),
    )?)
}

pub fn count_active_admins(conn: &Connection, clinic_id: &Uuid) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM clinic_memberships
         WHERE clinic_id = ?1 AND is_active = 1 AND role = 'admin'",
        params![clinic_id.to_string()],
        |r| r.get(0),
    )?)
}

fn row_to_clinic(r: &rusqlite::Row) -> Result<Clinic, rusqlite::Error> {
    Ok(Clinic {
        id: row::uuid(r, 0)?,
        owner_id: row::uuid(r, 1)?,
        name: r.get(2)?,
        description: r.get(3)?,
        address: r.get(4)?,
        phone: r.get(5)?,
        email: r.get(6)?,
        website: r.get(7)?,
        first_session_fee: r.get(8)?,
        subsequent_session_fee: r.get(9)?,
        percentage_agreement: r.get(10)?,
        percentage_amount: r.get(11)?,
        created_at: row::datetime(r, 12)?,
    })
}

fn row_to_membership(r: &rusqlite::Row) -> Result<ClinicMembership, rusqlite::Error> {
    Ok(ClinicMembership {
        id: row::uuid(r, 0)?,
        clinic_id: row::uuid(r, 1)?,
        user_id: row::opt_uuid(r, 2)?,
        invited_email: r.get(3)?,
        role: row::enumeration(r, 4)?,
        is_active: r.get(5)?,
        permissions: ClinicPermissions {
            can_manage_patients: r.get(6)?,
            can_view_reports: r.get(7)?,
            can_manage_billing: r.get(8)?,
            can_manage_practitioners: r.get(9)?,
            can_manage_settings: r.get(10)?,
        },
        invitation_token_hash: r.get(11)?,
        invitation_expires_at: row::opt_datetime(r, 12)?,
        invited_by: row::opt_uuid(r, 13)?,
        invited_at: row::opt_datetime(r, 14)?,
        joined_at: row::opt_datetime(r, 15)?,
        left_at: row::opt_datetime(r, 16)?,
    })
}
