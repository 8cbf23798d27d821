use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::row::{self, fmt_datetime};
use crate::db::DatabaseError;
use crate::models::{PatientReport, PracticeReport};

pub fn insert_patient_report(conn: &Connection, r: &PatientReport) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patient_reports (id, patient_id, content, report_type, generated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            r.id.to_string(),
            r.patient_id.to_string(),
            r.content,
            r.report_type,
            fmt_datetime(&r.generated_at),
        ],
    )?;
    Ok(())
}

/// Reports of one of the user's patients, newest first.
pub fn list_patient_reports(
    conn: &Connection,
    user_id: &Uuid,
    patient_id: &Uuid,
) -> Result<Vec<PatientReport>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.patient_id, r.content, r.report_type, r.generated_at
         FROM patient_reports r JOIN patients p ON p.id = r.patient_id
         WHERE r.patient_id = ?1 AND p.user_id = ?2
         ORDER BY r.generated_at DESC",
    )?;
    let rows = stmt.query_map(params![patient_id.to_string(), user_id.to_string()], row_to_patient_report)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn get_patient_report(
    conn: &Connection,
    user_id: &Uuid,
    id: &Uuid,
) -> Result<Option<PatientReport>, DatabaseError> {
    conn.query_row(
        "SELECT r.id, r.patient_id, r.content, r.report_type, r.generated_at
         FROM patient_reports r JOIN patients p ON p.id = r.patient_id
         WHERE r.id = ?1 AND p.user_id = ?2",
        params![id.to_string(), user_id.to_string()],
        row_to_patient_report,
    )
    .optional()
    .map_err(DatabaseError::from)
}

pub fn delete_patient_report(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM patient_reports WHERE id = ?1
         AND patient_id IN (SELECT id FROM patients WHERE user_id = ?2)",
        params![id.to_string(), user_id.to_string()],
    )?;
    Ok(affected > 0)
}

pub fn insert_practice_report(conn: &Connection, r: &PracticeReport) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO practice_reports (id, user_id, content, report_type, generated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            r.id.to_string(),
            r.user_id.to_string(),
            r.content,
            r.report_type,
            fmt_datetime(&r.generated_at),
        ],
    )?;
    Ok(())
}

pub fn list_practice_reports(conn: &Connection, user_id: &Uuid) -> Result<Vec<PracticeReport>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, content, report_type, generated_at FROM practice_reports
         WHERE user_id = ?1 ORDER BY generated_at DESC",
    )?;
    let rows = stmt.query_map(params![user_id.to_string()], |r| {
        Ok(PracticeReport {
            id: row::uuid(r, 0)?,
            user_id: row::uuid(r, 1)?,
            content: r.get(2)?,
            report_type: r.get(3)?,
            generated_at: row::datetime(r, 4)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

fn row_to_patient_report(r: &rusqlite::Row) -> Result<PatientReport, rusqlite::Error> {
    Ok(PatientReport {
        id: row::uuid(r, 0)?,
        patient_id: row::uuid(r, 1)?,
        content: r.get(2)?,
        report_type: r.get(3)?,
        generated_at: row::datetime(r, 4)?,
    })
}
