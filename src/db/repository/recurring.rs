use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::row::{self, fmt_date, fmt_datetime, fmt_time};
use crate::db::DatabaseError;
use crate::models::RecurringAppointment;

const RULE_COLUMNS: &str = "r.id, r.patient_id, r.start_date, r.end_date, r.recurrence_type,
     r.time_of_day, r.treatment_type, r.notes, r.location_id, r.provider, r.fee_charged,
     r.payment_method, r.is_active, r.created_at, r.updated_at";

pub fn insert_recurring(conn: &Connection, r: &RecurringAppointment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO recurring_appointments (id, patient_id, start_date, end_date,
         recurrence_type, time_of_day, treatment_type, notes, location_id, provider,
         fee_charged, payment_method, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            r.id.to_string(),
            r.patient_id.to_string(),
            fmt_date(&r.start_date),
            r.end_date.as_ref().map(fmt_date),
            r.recurrence_type.as_str(),
            fmt_time(&r.time_of_day),
            r.treatment_type,
            r.notes,
            r.location_id.map(|id| id.to_string()),
            r.provider,
            r.fee_charged,
            r.payment_method.map(|m| m.as_str()),
            r.is_active,
            fmt_datetime(&r.created_at),
            fmt_datetime(&r.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_recurring(
    conn: &Connection,
    user_id: &Uuid,
    id: &Uuid,
) -> Result<Option<RecurringAppointment>, DatabaseError> {
    let sql = format!(
        "SELECT {RULE_COLUMNS} FROM recurring_appointments r
         JOIN patients p ON p.id = r.patient_id
         WHERE r.id = ?1 AND p.user_id = ?2"
    );
    conn.query_row(&sql, params![id.to_string(), user_id.to_string()], row_to_rule)
        .optional()
        .map_err(DatabaseError::from)
}

/// Rules of a practitioner, with the patient name, optionally restricted to
/// active ones.
pub fn list_recurring(
    conn: &Connection,
    user_id: &Uuid,
    active_only: bool,
) -> Result<Vec<(RecurringAppointment, String)>, DatabaseError> {
    let sql = format!(
        "SELECT {RULE_COLUMNS}, p.name FROM recurring_appointments r
         JOIN patients p ON p.id = r.patient_id
         WHERE p.user_id = ?1 AND (?2 = 0 OR r.is_active = 1)
         ORDER BY r.start_date ASC, r.time_of_day ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id.to_string(), active_only], |r| {
        Ok((row_to_rule(r)?, r.get(15)?))
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn update_recurring(conn: &Connection, r: &RecurringAppointment) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE recurring_appointments SET start_date = ?2, end_date = ?3, recurrence_type = ?4,
         time_of_day = ?5, treatment_type = ?6, notes = ?7, location_id = ?8, provider = ?9,
         fee_charged = ?10, payment_method = ?11, is_active = ?12, updated_at = ?13
         WHERE id = ?1",
        params![
            r.id.to_string(),
            fmt_date(&r.start_date),
            r.end_date.as_ref().map(fmt_date),
            r.recurrence_type.as_str(),
            fmt_time(&r.time_of_day),
            r.treatment_type,
            r.notes,
            r.location_id.map(|id| id.to_string()),
            r.provider,
            r.fee_charged,
            r.payment_method.map(|m| m.as_str()),
            r.is_active,
            fmt_datetime(&chrono::Local::now().naive_local()),
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("recurring_appointment", r.id));
    }
    Ok(())
}

/// Delete a rule. Treatments it produced stay, unlinked.
pub fn delete_recurring(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<bool, DatabaseError> {
    if get_recurring(conn, user_id, id)?.is_none() {
        return Ok(false);
    }
    conn.execute(
        "UPDATE treatments SET recurring_id = NULL WHERE recurring_id = ?1",
        params![id.to_string()],
    )?;
    conn.execute(
        "DELETE FROM recurring_appointments WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(true)
}

fn row_to_rule(row: &rusqlite::Row) -> Result<RecurringAppointment, rusqlite::Error> {
    Ok(RecurringAppointment {
        id: row::uuid(row, 0)?,
        patient_id: row::uuid(row, 1)?,
        start_date: row::date(row, 2)?,
        end_date: row::opt_date(row, 3)?,
        recurrence_type: row::enumeration(row, 4)?,
        time_of_day: row::time(row, 5)?,
        treatment_type: row.get(6)?,
        notes: row.get(7)?,
        location_id: row::opt_uuid(row, 8)?,
        provider: row.get(9)?,
        fee_charged: row.get(10)?,
        payment_method: row::opt_enumeration(row, 11)?,
        is_active: row.get(12)?,
        created_at: row::datetime(row, 13)?,
        updated_at: row::datetime(row, 14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldKey;
    use crate::db::repository::{insert_patient, insert_user};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{Patient, RecurrenceType, User, UserRole};
    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn insert_list_and_deactivate() {
        let conn = open_memory_database().unwrap();
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &user).unwrap();
        let patient = Patient::new(user.id, "Iker");
        insert_patient(&conn, &FieldKey::from_bytes([1u8; 32]), &patient).unwrap();

        let mut rule = RecurringAppointment::new(
            patient.id,
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            RecurrenceType::Weekly,
            NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            "Rehab",
        );
        insert_recurring(&conn, &rule).unwrap();

        let loaded = get_recurring(&conn, &user.id, &rule.id).unwrap().unwrap();
        assert_eq!(loaded.time_of_day, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
        assert_eq!(list_recurring(&conn, &user.id, true).unwrap().len(), 1);

        rule.is_active = false;
        update_recurring(&conn, &rule).unwrap();
        assert!(list_recurring(&conn, &user.id, true).unwrap().is_empty());
        assert_eq!(list_recurring(&conn, &user.id, false).unwrap().len(), 1);

        assert!(delete_recurring(&conn, &user.id, &rule.id).unwrap());
        assert!(get_recurring(&conn, &user.id, &rule.id).unwrap().is_none());
    }
}
