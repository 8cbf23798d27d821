use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::row::{self, fmt_date, fmt_datetime};
use crate::db::DatabaseError;
use crate::models::{Treatment, TreatmentFilter, TreatmentStatus, TriggerPoint};

const TREATMENT_COLUMNS: &str = "t.id, t.patient_id, t.treatment_type, t.assessment, t.notes,
     t.status, t.provider, t.created_at, t.updated_at, t.location_id, t.visit_type,
     t.fee_charged, t.payment_method, t.pain_level, t.movement_restriction,
     t.evaluation_data, t.calendly_invitee_uri, t.recurring_id, t.google_event_id";

pub fn insert_treatment(conn: &Connection, t: &Treatment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO treatments (id, patient_id, treatment_type, assessment, notes, status,
         provider, created_at, updated_at, location_id, visit_type, fee_charged, payment_method,
         pain_level, movement_restriction, evaluation_data, calendly_invitee_uri, recurring_id,
         google_event_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            t.id.to_string(),
            t.patient_id.to_string(),
            t.treatment_type,
            t.assessment,
            t.notes,
            t.status.as_str(),
            t.provider,
            fmt_datetime(&t.created_at),
            fmt_datetime(&t.updated_at),
            t.location_id.map(|id| id.to_string()),
            t.visit_type,
            t.fee_charged,
            t.payment_method.map(|m| m.as_str()),
            t.pain_level,
            t.movement_restriction,
            t.evaluation_data.as_ref().map(|v| v.to_string()),
            t.calendly_invitee_uri,
            t.recurring_id.map(|id| id.to_string()),
            t.google_event_id,
        ],
    )?;
    Ok(())
}

/// Fetch a treatment whose patient belongs to `user_id`.
pub fn get_treatment(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<Option<Treatment>, DatabaseError> {
    let sql = format!(
        "SELECT {TREATMENT_COLUMNS} FROM treatments t
         JOIN patients p ON p.id = t.patient_id
         WHERE t.id = ?1 AND p.user_id = ?2"
    );
    conn.query_row(&sql, params![id.to_string(), user_id.to_string()], row_to_treatment)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn list_treatments(
    conn: &Connection,
    user_id: &Uuid,
    filter: &TreatmentFilter,
) -> Result<Vec<Treatment>, DatabaseError> {
    let sql = format!(
        "SELECT {TREATMENT_COLUMNS} FROM treatments t
         JOIN patients p ON p.id = t.patient_id
         WHERE p.user_id = ?1
           AND (?2 IS NULL OR t.patient_id = ?2)
           AND (?3 IS NULL OR t.status = ?3)
           AND (?4 IS NULL OR t.created_at >= ?4)
           AND (?5 IS NULL OR t.created_at < ?5)
         ORDER BY t.created_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            user_id.to_string(),
            filter.patient_id.map(|id| id.to_string()),
            filter.status.map(|s| s.as_str()),
            filter.from.as_ref().map(fmt_datetime),
            filter.to.as_ref().map(fmt_datetime),
        ],
        row_to_treatment,
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Treatments in the half-open window `[start, end)` with the owning
/// patient's name, ascending.
pub fn list_treatments_in_window(
    conn: &Connection,
    user_id: &Uuid,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> Result<Vec<(Treatment, String)>, DatabaseError> {
    let sql = format!(
        "SELECT {TREATMENT_COLUMNS}, p.name FROM treatments t
         JOIN patients p ON p.id = t.patient_id
         WHERE p.user_id = ?1 AND t.created_at >= ?2 AND t.created_at < ?3
         ORDER BY t.created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![user_id.to_string(), fmt_datetime(start), fmt_datetime(end)],
        |r| Ok((row_to_treatment(r)?, r.get(19)?)),
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Next Scheduled sessions from `now`, with patient names.
pub fn list_upcoming_treatments(
    conn: &Connection,
    user_id: &Uuid,
    now: &NaiveDateTime,
    limit: usize,
) -> Result<Vec<(Treatment, String)>, DatabaseError> {
    let sql = format!(
        "SELECT {TREATMENT_COLUMNS}, p.name FROM treatments t
         JOIN patients p ON p.id = t.patient_id
         WHERE p.user_id = ?1 AND t.status = 'Scheduled' AND t.created_at >= ?2
         ORDER BY t.created_at ASC LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![user_id.to_string(), fmt_datetime(now), limit as i64],
        |r| Ok((row_to_treatment(r)?, r.get(19)?)),
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn list_recent_treatments(
    conn: &Connection,
    user_id: &Uuid,
    limit: usize,
) -> Result<Vec<(Treatment, String)>, DatabaseError> {
    let sql = format!(
        "SELECT {TREATMENT_COLUMNS}, p.name FROM treatments t
         JOIN patients p ON p.id = t.patient_id
         WHERE p.user_id = ?1
         ORDER BY t.created_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id.to_string(), limit as i64], |r| {
        Ok((row_to_treatment(r)?, r.get(19)?))
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// All sessions of one patient, most recent first.
pub fn list_patient_treatments(conn: &Connection, patient_id: &Uuid) -> Result<Vec<Treatment>, DatabaseError> {
    let sql = format!(
        "SELECT {TREATMENT_COLUMNS} FROM treatments t
         WHERE t.patient_id = ?1 ORDER BY t.created_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![patient_id.to_string()], row_to_treatment)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Exact `created_at` match: the dedup key for recurring occurrences and
/// calendar imports.
pub fn find_treatment_at(
    conn: &Connection,
    patient_id: &Uuid,
    at: &NaiveDateTime,
) -> Result<Option<Treatment>, DatabaseError> {
    let sql = format!(
        "SELECT {TREATMENT_COLUMNS} FROM treatments t
         WHERE t.patient_id = ?1 AND t.created_at = ?2 LIMIT 1"
    );
    conn.query_row(&sql, params![patient_id.to_string(), fmt_datetime(at)], row_to_treatment)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn find_treatment_by_invitee_uri(conn: &Connection, uri: &str) -> Result<Option<Treatment>, DatabaseError> {
    let sql = format!("SELECT {TREATMENT_COLUMNS} FROM treatments t WHERE t.calendly_invitee_uri = ?1");
    conn.query_row(&sql, params![uri], row_to_treatment)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn update_treatment(conn: &Connection, t: &Treatment) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE treatments SET treatment_type = ?2, assessment = ?3, notes = ?4, status = ?5,
         provider = ?6, created_at = ?7, updated_at = ?8, location_id = ?9, visit_type = ?10,
         fee_charged = ?11, payment_method = ?12, pain_level = ?13, movement_restriction = ?14,
         evaluation_data = ?15
         WHERE id = ?1",
        params![
            t.id.to_string(),
            t.treatment_type,
            t.assessment,
            t.notes,
            t.status.as_str(),
            t.provider,
            fmt_datetime(&t.created_at),
            fmt_datetime(&chrono::Local::now().naive_local()),
            t.location_id.map(|id| id.to_string()),
            t.visit_type,
            t.fee_charged,
            t.payment_method.map(|m| m.as_str()),
            t.pain_level,
            t.movement_restriction,
            t.evaluation_data.as_ref().map(|v| v.to_string()),
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("treatment", t.id));
    }
    Ok(())
}

pub fn update_treatment_status(
    conn: &Connection,
    user_id: &Uuid,
    id: &Uuid,
    status: TreatmentStatus,
) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE treatments SET status = ?3, updated_at = ?4
         WHERE id = ?1 AND patient_id IN (SELECT id FROM patients WHERE user_id = ?2)",
        params![
            id.to_string(),
            user_id.to_string(),
            status.as_str(),
            fmt_datetime(&chrono::Local::now().naive_local()),
        ],
    )?;
    Ok(affected > 0)
}

pub fn set_google_event_id(conn: &Connection, id: &Uuid, event_id: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE treatments SET google_event_id = ?2 WHERE id = ?1",
        params![id.to_string(), event_id],
    )?;
    Ok(())
}

/// Delete a treatment and its trigger points. False when not owned.
pub fn delete_treatment(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<bool, DatabaseError> {
    if get_treatment(conn, user_id, id)?.is_none() {
        return Ok(false);
    }
    conn.execute(
        "DELETE FROM trigger_points WHERE treatment_id = ?1",
        params![id.to_string()],
    )?;
    conn.execute("DELETE FROM treatments WHERE id = ?1", params![id.to_string()])?;
    Ok(true)
}

/// Scheduled sessions strictly before `before` become Completed.
pub fn complete_past_scheduled_treatments(
    conn: &Connection,
    user_id: Option<&Uuid>,
    before: &NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE treatments SET status = 'Completed', updated_at = ?3
         WHERE status = 'Scheduled' AND created_at < ?2
           AND (?1 IS NULL OR patient_id IN (SELECT id FROM patients WHERE user_id = ?1))",
        params![
            user_id.map(|u| u.to_string()),
            fmt_datetime(before),
            fmt_datetime(&chrono::Local::now().naive_local()),
        ],
    )?;
    Ok(affected)
}

/// Same as above, for one patient.
pub fn complete_past_patient_treatments(
    conn: &Connection,
    patient_id: &Uuid,
    before: &NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE treatments SET status = 'Completed', updated_at = ?3
         WHERE patient_id = ?1 AND status = 'Scheduled' AND created_at < ?2",
        params![
            patient_id.to_string(),
            fmt_datetime(before),
            fmt_datetime(&chrono::Local::now().naive_local()),
        ],
    )?;
    Ok(affected)
}

pub fn count_treatments(
    conn: &Connection,
    user_id: &Uuid,
    status: Option<TreatmentStatus>,
) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM treatments t JOIN patients p ON p.id = t.patient_id
         WHERE p.user_id = ?1 AND (?2 IS NULL OR t.status = ?2)",
        params![user_id.to_string(), status.map(|s| s.as_str())],
        |row| row.get(0),
    )?)
}

/// Number of sessions on a given calendar day.
pub fn count_treatments_on(conn: &Connection, user_id: &Uuid, day: NaiveDate) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM treatments t JOIN patients p ON p.id = t.patient_id
         WHERE p.user_id = ?1 AND DATE(t.created_at) = ?2",
        params![user_id.to_string(), fmt_date(&day)],
        |row| row.get(0),
    )?)
}

pub fn treatments_by_month(
    conn: &Connection,
    user_id: &Uuid,
    from: NaiveDate,
) -> Result<Vec<(String, i64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT strftime('%Y-%m', t.created_at) AS month, COUNT(*)
         FROM treatments t JOIN patients p ON p.id = t.patient_id
         WHERE p.user_id = ?1 AND DATE(t.created_at) >= ?2
         GROUP BY month ORDER BY month ASC",
    )?;
    let rows = stmt.query_map(params![user_id.to_string(), fmt_date(&from)], |r| {
        Ok((r.get(0)?, r.get(1)?))
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

// ─── Trigger points ─────────────────────────────────────────

pub fn insert_trigger_point(conn: &Connection, tp: &TriggerPoint) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO trigger_points (id, treatment_id, location_x, location_y, kind, muscle,
         intensity, symptoms, referral_pattern)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            tp.id.to_string(),
            tp.treatment_id.to_string(),
            tp.location_x,
            tp.location_y,
            tp.kind.map(|k| k.as_str()),
            tp.muscle,
            tp.intensity,
            tp.symptoms,
            tp.referral_pattern,
        ],
    )?;
    Ok(())
}

/// Replace the full set of trigger points of a treatment.
pub fn replace_trigger_points(
    conn: &Connection,
    treatment_id: &Uuid,
    points: &[TriggerPoint],
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM trigger_points WHERE treatment_id = ?1",
        params![treatment_id.to_string()],
    )?;
    for tp in points {
        insert_trigger_point(conn, tp)?;
    }
    Ok(())
}

pub fn list_trigger_points(conn: &Connection, treatment_id: &Uuid) -> Result<Vec<TriggerPoint>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, treatment_id, location_x, location_y, kind, muscle, intensity, symptoms,
         referral_pattern
         FROM trigger_points WHERE treatment_id = ?1",
    )?;
    let rows = stmt.query_map(params![treatment_id.to_string()], |r| {
        Ok(TriggerPoint {
            id: row::uuid(r, 0)?,
            treatment_id: row::uuid(r, 1)?,
            location_x: r.get(2)?,
            location_y: r.get(3)?,
            kind: row::opt_enumeration(r, 4)?,
            muscle: r.get(5)?,
            intensity: r.get(6)?,
            symptoms: r.get(7)?,
            referral_pattern: r.get(8)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

fn row_to_treatment(row: &rusqlite::Row) -> Result<Treatment, rusqlite::Error> {
    let evaluation: Option<String> = row.get(15)?;
    Ok(Treatment {
        id: row::uuid(row, 0)?,
        patient_id: row::uuid(row, 1)?,
        treatment_type: row.get(2)?,
        assessment: row.get(3)?,
        notes: row.get(4)?,
        status: row::enumeration(row, 5)?,
        provider: row.get(6)?,
        created_at: row::datetime(row, 7)?,
        updated_at: row::datetime(row, 8)?,
        location_id: row::opt_uuid(row, 9)?,
        visit_type: row.get(10)?,
        fee_charged: row.get(11)?,
        payment_method: row::opt_enumeration(row, 12)?,
        pain_level: row.get(13)?,
        movement_restriction: row.get(14)?,
        evaluation_data: evaluation.and_then(|s| serde_json::from_str(&s).ok()),
        calendly_invitee_uri: row.get(16)?,
        recurring_id: row::opt_uuid(row, 17)?,
        google_event_id: row.get(18)?,
    })
}
