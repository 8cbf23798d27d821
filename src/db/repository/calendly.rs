use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::row::{self, fmt_datetime, fmt_opt_datetime};
use crate::db::DatabaseError;
use crate::models::{BookingStatus, UnmatchedCalendlyBooking};

const BOOKING_COLUMNS: &str = "id, user_id, name, email, event_type, start_time, end_time,
     calendly_invitee_id, status, matched_patient_id, created_at";

pub fn insert_booking(conn: &Connection, b: &UnmatchedCalendlyBooking) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO unmatched_calendly_bookings (id, user_id, name, email, event_type,
         start_time, end_time, calendly_invitee_id, status, matched_patient_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            b.id.to_string(),
            b.user_id.to_string(),
            b.name,
            b.email,
            b.event_type,
            fmt_opt_datetime(&b.start_time),
            fmt_opt_datetime(&b.end_time),
            b.calendly_invitee_id,
            b.status.as_str(),
            b.matched_patient_id.map(|id| id.to_string()),
            fmt_datetime(&b.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking(
    conn: &Connection,
    user_id: &Uuid,
    id: &Uuid,
) -> Result<Option<UnmatchedCalendlyBooking>, DatabaseError> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM unmatched_calendly_bookings WHERE id = ?1 AND user_id = ?2");
    conn.query_row(&sql, params![id.to_string(), user_id.to_string()], row_to_booking)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn find_booking_by_invitee(
    conn: &Connection,
    invitee_id: &str,
) -> Result<Option<UnmatchedCalendlyBooking>, DatabaseError> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM unmatched_calendly_bookings WHERE calendly_invitee_id = ?1");
    conn.query_row(&sql, params![invitee_id], row_to_booking)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn list_bookings(
    conn: &Connection,
    user_id: &Uuid,
    status: Option<BookingStatus>,
) -> Result<Vec<UnmatchedCalendlyBooking>, DatabaseError> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM unmatched_calendly_bookings
         WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY start_time ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![user_id.to_string(), status.map(|s| s.as_str())],
        row_to_booking,
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn set_booking_status(
    conn: &Connection,
    id: &Uuid,
    status: BookingStatus,
    matched_patient_id: Option<&Uuid>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE unmatched_calendly_bookings SET status = ?2, matched_patient_id = ?3 WHERE id = ?1",
        params![id.to_string(), status.as_str(), matched_patient_id.map(|p| p.to_string())],
    )?;
    Ok(())
}

fn row_to_booking(row: &rusqlite::Row) -> Result<UnmatchedCalendlyBooking, rusqlite::Error> {
    Ok(UnmatchedCalendlyBooking {
        id: row::uuid(row, 0)?,
        user_id: row::uuid(row, 1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        event_type: row.get(4)?,
        start_time: row::opt_datetime(row, 5)?,
        end_time: row::opt_datetime(row, 6)?,
        calendly_invitee_id: row.get(7)?,
        status: row::enumeration(row, 8)?,
        matched_patient_id: row::opt_uuid(row, 9)?,
        created_at: row::datetime(row, 10)?,
    })
}
