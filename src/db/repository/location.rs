use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::row::{self, fmt_datetime};
use crate::db::DatabaseError;
use crate::models::Location;

const LOCATION_COLUMNS: &str = "id, user_id, name, address, phone, email, first_session_fee,
     subsequent_session_fee, fee_percentage, location_type, is_active, created_at";

pub fn insert_location(conn: &Connection, l: &Location) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO locations (id, user_id, name, address, phone, email, first_session_fee,
         subsequent_session_fee, fee_percentage, location_type, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            l.id.to_string(),
            l.user_id.to_string(),
            l.name,
            l.address,
            l.phone,
            l.email,
            l.first_session_fee,
            l.subsequent_session_fee,
            l.fee_percentage,
            l.location_type.as_str(),
            l.is_active,
            fmt_datetime(&l.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_location(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<Option<Location>, DatabaseError> {
    let sql = format!("SELECT {LOCATION_COLUMNS} FROM locations WHERE id = ?1 AND user_id = ?2");
    conn.query_row(&sql, params![id.to_string(), user_id.to_string()], row_to_location)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn list_locations(conn: &Connection, user_id: &Uuid, active_only: bool) -> Result<Vec<Location>, DatabaseError> {
    let sql = format!(
        "SELECT {LOCATION_COLUMNS} FROM locations
         WHERE user_id = ?1 AND (?2 = 0 OR is_active = 1)
         ORDER BY name COLLATE NOCASE ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id.to_string(), active_only], row_to_location)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn update_location(conn: &Connection, l: &Location) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE locations SET name = ?3, address = ?4, phone = ?5, email = ?6,
         first_session_fee = ?7, subsequent_session_fee = ?8, fee_percentage = ?9,
         location_type = ?10, is_active = ?11
         WHERE id = ?1 AND user_id = ?2",
        params![
            l.id.to_string(),
            l.user_id.to_string(),
            l.name,
            l.address,
            l.phone,
            l.email,
            l.first_session_fee,
            l.subsequent_session_fee,
            l.fee_percentage,
            l.location_type.as_str(),
            l.is_active,
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("location", l.id));
    }
    Ok(())
}

/// Number of treatments and recurring rules pointing at a location.
pub fn location_usage(conn: &Connection, id: &Uuid) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT (SELECT COUNT(*) FROM treatments WHERE location_id = ?1)
              + (SELECT COUNT(*) FROM recurring_appointments WHERE location_id = ?1)
              + (SELECT COUNT(*) FROM financial_settings WHERE clinic_location_id = ?1)",
        params![id.to_string()],
        |row| row.get(0),
    )?)
}

pub fn deactivate_location(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE locations SET is_active = 0 WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(())
}

pub fn delete_location(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM locations WHERE id = ?1", params![id.to_string()])?;
    Ok(())
}

fn row_to_location(row: &rusqlite::Row) -> Result<Location, rusqlite::Error> {
    Ok(Location {
        id: row::uuid(row, 0)?,
        user_id: row::uuid(row, 1)?,
        name: row.get(2)?,
        address: row.get(3)?,
        phone: row.get(4)?,
        email: row.get(5)?,
        first_session_fee: row.get(6)?,
        subsequent_session_fee: row.get(7)?,
        fee_percentage: row.get(8)?,
        location_type: row::enumeration(row, 9)?,
        is_active: row.get(10)?,
        created_at: row::datetime(row, 11)?,
    })
}
